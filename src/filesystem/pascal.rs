/// Apple Pascal file system
///
/// The directory occupies blocks 2 to 5 as one 2048-byte array of 26-byte
/// entries. Entry 0 describes the volume. Files are contiguous runs of
/// blocks, so free space is whatever lies between them.

use crate::buffer::Buffer;
use crate::error::{FsError, Result};
use crate::file::{AppleFile, FileDetail, FileKind};
use crate::filesystem::{AppleFileSystem, FileSystemType};
use crate::image::{BlockReader, BlockType, DiskParameters};
use chrono::{NaiveDate, NaiveDateTime};
use log::debug;
use std::ops::Range;

/// Block size
pub const BLOCK_SIZE: usize = 512;
/// First directory block
pub const CATALOG_BLOCK: usize = 2;
/// Directory blocks
pub const CATALOG_BLOCKS: usize = 4;
/// Size of a directory entry
pub const ENTRY_SIZE: usize = 26;
/// Most files a directory can hold
pub const MAX_FILES: usize = 77;

/// Pascal file kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PascalFileKind {
    /// Volume header
    Volume,
    /// Bad block marker
    Bad,
    /// Compiled code
    Code,
    /// Editor text
    Text,
    /// Debugger information
    Info,
    /// Data
    Data,
    /// Graphics
    Graf,
    /// Photo
    Foto,
    /// Secure directory
    SecureDir,
    /// Anything else
    Unknown(u16),
}

impl PascalFileKind {
    /// Decode the low nibble of the kind word
    pub fn from_word(word: u16) -> Self {
        match word & 0x0F {
            0 => PascalFileKind::Volume,
            1 => PascalFileKind::Bad,
            2 => PascalFileKind::Code,
            3 => PascalFileKind::Text,
            4 => PascalFileKind::Info,
            5 => PascalFileKind::Data,
            6 => PascalFileKind::Graf,
            7 => PascalFileKind::Foto,
            8 => PascalFileKind::SecureDir,
            other => PascalFileKind::Unknown(other),
        }
    }
}

impl std::fmt::Display for PascalFileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PascalFileKind::Volume => write!(f, "Volume"),
            PascalFileKind::Bad => write!(f, "Badblocks"),
            PascalFileKind::Code => write!(f, "Codefile"),
            PascalFileKind::Text => write!(f, "Textfile"),
            PascalFileKind::Info => write!(f, "Infofile"),
            PascalFileKind::Data => write!(f, "Datafile"),
            PascalFileKind::Graf => write!(f, "Graffile"),
            PascalFileKind::Foto => write!(f, "Fotofile"),
            PascalFileKind::SecureDir => write!(f, "Securedir"),
            PascalFileKind::Unknown(kind) => write!(f, "Kind {}", kind),
        }
    }
}

/// A Pascal directory entry
#[derive(Debug, Clone, PartialEq)]
pub struct PascalEntry {
    /// File kind
    pub kind: PascalFileKind,
    /// First block of the file
    pub first_block: u16,
    /// Block after the last one
    pub next_block: u16,
    /// Bytes used in the last block
    pub bytes_in_last: u16,
    /// Directory slot (1-based; slot 0 is the volume)
    pub slot: usize,
}

/// Volume entry
#[derive(Debug, Clone, PartialEq, Eq)]
struct VolumeEntry {
    name: String,
    catalog_end: usize,
    total_blocks: usize,
    files: usize,
}

fn word(data: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([data[pos], data[pos + 1]])
}

/// Pascal date word: month in bits 0-3, day in 4-8, year in 9-15
pub fn pascal_date(date: u16) -> Option<NaiveDateTime> {
    let month = (date & 0x0F) as u32;
    let day = ((date >> 4) & 0x1F) as u32;
    let year = (date >> 9) as i32;
    if year == 100 {
        return None;
    }
    NaiveDate::from_ymd_opt(1900 + year, month, day)?.and_hms_opt(0, 0, 0)
}

fn read_volume(catalog: &[u8], reader: &BlockReader) -> Result<VolumeEntry> {
    let mismatch = |reason: String| FsError::mismatch(FileSystemType::Pascal, reason);
    if word(catalog, 0) != 0 {
        return Err(mismatch("volume entry does not start at block 0".to_string()));
    }
    let catalog_end = word(catalog, 2) as usize;
    if !(CATALOG_BLOCK + 1..=CATALOG_BLOCK + CATALOG_BLOCKS).contains(&catalog_end) {
        return Err(mismatch(format!("catalog ends at block {}", catalog_end)));
    }
    if word(catalog, 4) != 0 {
        return Err(mismatch("volume entry has a file kind".to_string()));
    }
    let name_length = catalog[6] as usize;
    if name_length == 0 || name_length > 7 {
        return Err(mismatch(format!("volume name length {}", name_length)));
    }
    let name_bytes = &catalog[7..7 + name_length];
    if name_bytes.iter().any(|&b| !(0x21..0x7F).contains(&b) || b == b'/' || b == b':') {
        return Err(mismatch("bad volume name".to_string()));
    }
    let total_blocks = word(catalog, 14) as usize;
    if total_blocks < catalog_end {
        return Err(mismatch(format!("volume has {} blocks", total_blocks)));
    }
    let files = word(catalog, 16) as usize;
    if files > MAX_FILES {
        return Err(mismatch(format!("{} files", files)));
    }
    if total_blocks > reader.total_blocks() {
        debug!(
            "Pascal volume claims {} blocks but image holds {}",
            total_blocks,
            reader.total_blocks()
        );
    }
    Ok(VolumeEntry {
        name: String::from_utf8_lossy(name_bytes).to_string(),
        catalog_end,
        total_blocks,
        files,
    })
}

/// Parse a Pascal volume
pub fn parse(name: &str, disk: Buffer, params: DiskParameters) -> Result<AppleFileSystem> {
    let reader = BlockReader::new(name, disk, params)?;
    if reader.total_blocks() < CATALOG_BLOCK + CATALOG_BLOCKS {
        return Err(FsError::mismatch(FileSystemType::Pascal, "image too small"));
    }
    let catalog = read_catalog(&reader);
    let volume = read_volume(&catalog, &reader)?;
    debug!("{}: Pascal volume {}:", name, volume.name);

    let mut entries = Vec::new();
    for slot in 1..=volume.files {
        let entry = &catalog[slot * ENTRY_SIZE..(slot + 1) * ENTRY_SIZE];
        let first = word(entry, 0) as usize;
        let next = word(entry, 2) as usize;
        let name_length = entry[6] as usize;
        if name_length == 0 || name_length > 15 {
            return Err(FsError::mismatch(
                FileSystemType::Pascal,
                format!("slot {} has name length {}", slot, name_length),
            ));
        }
        if first < volume.catalog_end || next < first || next > volume.total_blocks {
            return Err(FsError::mismatch(
                FileSystemType::Pascal,
                format!("slot {} spans blocks {}..{}", slot, first, next),
            ));
        }
        entries.push((slot, entry.to_vec()));
    }

    let mut fs = AppleFileSystem::new(name, FileSystemType::Pascal, reader);
    fs.set_volume_name(volume.name.clone());
    fs.set_catalog_blocks(volume.catalog_end - CATALOG_BLOCK);
    for block_no in 0..CATALOG_BLOCK {
        fs.mark_fs_block(block_no, "BOOT");
    }
    for block_no in CATALOG_BLOCK..volume.catalog_end {
        fs.mark_fs_block(block_no, "CATALOG");
    }

    for (slot, entry) in entries {
        let file = build_file(&mut fs, slot, &entry);
        fs.claim_blocks(&file);
        fs.add_file(file);
    }

    let gaps = free_space(&fs, volume.total_blocks);
    let mut free = 0;
    for gap in &gaps {
        for block_no in gap.clone() {
            fs.reader_mut().set_block_type(block_no, BlockType::Empty, None);
        }
        free += gap.len();
    }
    fs.set_free_blocks(free);
    Ok(fs)
}

/// The 2048-byte directory
fn read_catalog(reader: &BlockReader) -> Vec<u8> {
    let blocks: Vec<usize> = (CATALOG_BLOCK..CATALOG_BLOCK + CATALOG_BLOCKS).collect();
    reader.read_many(&blocks)
}

fn build_file(fs: &mut AppleFileSystem, slot: usize, entry: &[u8]) -> AppleFile {
    let detail = PascalEntry {
        kind: PascalFileKind::from_word(word(entry, 4)),
        first_block: word(entry, 0),
        next_block: word(entry, 2),
        bytes_in_last: word(entry, 22),
        slot,
    };
    let name_length = entry[6] as usize;
    let name = String::from_utf8_lossy(&entry[7..7 + name_length]).to_string();

    let blocks: Vec<Option<usize>> = (detail.first_block as usize..detail.next_block as usize)
        .map(Some)
        .collect();
    let block_count = blocks.len();
    let mut file = AppleFile::new(fs.next_file_id(), name, FileKind::File)
        .with_blocks(blocks, BLOCK_SIZE);

    let bytes_in_last = detail.bytes_in_last as usize;
    if bytes_in_last > BLOCK_SIZE {
        file.anomaly(format!("{} bytes used in last block", bytes_in_last));
    }
    file.eof = match block_count {
        0 => 0,
        count => (count - 1) * BLOCK_SIZE + bytes_in_last.min(BLOCK_SIZE),
    };
    file.modified = pascal_date(word(entry, 24));
    for block_no in detail.first_block as usize..detail.next_block as usize {
        if !fs.reader().is_valid_block(block_no) {
            file.anomaly(format!("block {} is off the disk", block_no));
            break;
        }
    }
    file.detail = FileDetail::Pascal(detail);
    file
}

/// Unused block ranges between files, up to the end of the volume
pub fn free_space(fs: &AppleFileSystem, total_blocks: usize) -> Vec<Range<usize>> {
    let mut extents: Vec<(usize, usize)> = fs
        .files()
        .iter()
        .filter_map(|f| match &f.detail {
            FileDetail::Pascal(entry) => {
                Some((entry.first_block as usize, entry.next_block as usize))
            }
            _ => None,
        })
        .collect();
    extents.sort();

    let mut gaps = Vec::new();
    let mut position = CATALOG_BLOCK + fs.total_catalog_blocks();
    for (first, next) in extents {
        if first > position {
            gaps.push(position..first);
        }
        position = position.max(next);
    }
    let end = total_blocks.min(fs.reader().total_blocks());
    if end > position {
        gaps.push(position..end);
    }
    gaps
}

/// Remove a directory entry by moving the following entries up one slot
pub(crate) fn delete(fs: &mut AppleFileSystem, file: &AppleFile) -> Result<()> {
    let entry = match &file.detail {
        FileDetail::Pascal(entry) => entry.clone(),
        _ => return Err(FsError::unsupported(format!("{} is not a Pascal file", file.name))),
    };

    let mut catalog = read_catalog(fs.reader());
    let files = word(&catalog, 16) as usize;
    if entry.slot == 0 || entry.slot > files {
        return Err(FsError::corrupt(
            FileSystemType::Pascal,
            format!("{} is in slot {} of {}", file.name, entry.slot, files),
        ));
    }
    let start = entry.slot * ENTRY_SIZE;
    let end = (files + 1) * ENTRY_SIZE;
    catalog.copy_within(start + ENTRY_SIZE..end, start);
    catalog[end - ENTRY_SIZE..end].fill(0);
    catalog[16..18].copy_from_slice(&((files - 1) as u16).to_le_bytes());

    for (i, chunk) in catalog.chunks(BLOCK_SIZE).enumerate() {
        let block_no = CATALOG_BLOCK + i;
        if let Some(block) = fs.reader_mut().buffer_mut(block_no) {
            if block.as_slice() != chunk {
                block.copy_from_slice(chunk);
                fs.reader_mut().mark_dirty(block_no);
            }
        }
    }

    for block_no in entry.first_block as usize..entry.next_block as usize {
        fs.reader_mut().set_block_type(block_no, BlockType::Empty, None);
    }
    let released = (entry.next_block - entry.first_block) as usize;
    fs.set_free_blocks(fs.free_blocks() + released);
    for other in fs.files_mut() {
        if let FileDetail::Pascal(e) = &mut other.detail {
            if e.slot > entry.slot {
                e.slot -= 1;
            }
        }
    }
    fs.add_deleted(file.name.clone());
    Ok(())
}

fn date_text(date: Option<NaiveDateTime>) -> String {
    date.map_or_else(String::new, |d| d.format("%-d-%b-%y").to_string())
}

/// One line in the style of the Filer's extended directory listing
pub fn catalog_line(file: &AppleFile) -> String {
    match &file.detail {
        FileDetail::Pascal(entry) => format!(
            "{:<15} {:>4} {:>10} {:>5} {:>5}  {}",
            file.name,
            entry.next_block - entry.first_block,
            date_text(file.modified),
            entry.first_block,
            entry.bytes_in_last,
            entry.kind
        ),
        _ => file.name.clone(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 280-block volume "WORK" with the given (name, first, next, bytes) files
    pub(crate) fn volume(files: &[(&str, u16, u16, u16)]) -> Vec<u8> {
        let mut disk = vec![0u8; 280 * BLOCK_SIZE];
        let cat = CATALOG_BLOCK * BLOCK_SIZE;
        disk[cat + 2..cat + 4].copy_from_slice(&6u16.to_le_bytes());
        disk[cat + 6] = 4;
        disk[cat + 7..cat + 11].copy_from_slice(b"WORK");
        disk[cat + 14..cat + 16].copy_from_slice(&280u16.to_le_bytes());
        disk[cat + 16..cat + 18].copy_from_slice(&(files.len() as u16).to_le_bytes());
        for (i, (name, first, next, bytes)) in files.iter().enumerate() {
            let at = cat + (i + 1) * ENTRY_SIZE;
            disk[at..at + 2].copy_from_slice(&first.to_le_bytes());
            disk[at + 2..at + 4].copy_from_slice(&next.to_le_bytes());
            disk[at + 4] = 3;
            disk[at + 6] = name.len() as u8;
            disk[at + 7..at + 7 + name.len()].copy_from_slice(name.as_bytes());
            disk[at + 22..at + 24].copy_from_slice(&bytes.to_le_bytes());
            // 4-May-79
            let date: u16 = (79 << 9) | (4 << 4) | 5;
            disk[at + 24..at + 26].copy_from_slice(&date.to_le_bytes());
        }
        disk
    }

    fn parse_volume(disk: Vec<u8>) -> AppleFileSystem {
        parse("t", Buffer::new(disk), DiskParameters::prodos(0)).unwrap()
    }

    #[test]
    fn test_file_length() {
        let fs = parse_volume(volume(&[("NOTES.TEXT", 10, 12, 50)]));
        assert_eq!(fs.volume_name(), Some("WORK"));
        let file = fs.find_file("NOTES.TEXT").unwrap();
        assert_eq!(file.file_length(), BLOCK_SIZE + 50);
        assert_eq!(file.data_blocks(), &[Some(10), Some(11)]);
        assert_eq!(file.type_text(), "Textfile");
    }

    #[test]
    fn test_free_space_gaps() {
        let fs = parse_volume(volume(&[("A", 6, 10, 512), ("B", 20, 30, 1)]));
        let gaps = free_space(&fs, 280);
        assert_eq!(gaps, vec![10..20, 30..280]);
        assert_eq!(fs.free_blocks(), 10 + 250);
        assert_eq!(fs.total_catalog_blocks(), 4);
    }

    #[test]
    fn test_rejects_bad_header() {
        let mut disk = volume(&[]);
        disk[CATALOG_BLOCK * BLOCK_SIZE + 6] = 9;
        let err = parse("t", Buffer::new(disk), DiskParameters::prodos(0)).unwrap_err();
        assert!(err.is_format_mismatch());
    }

    #[test]
    fn test_rejects_overlapping_catalog() {
        let err = parse(
            "t",
            Buffer::new(volume(&[("A", 4, 8, 1)])),
            DiskParameters::prodos(0),
        )
        .unwrap_err();
        assert!(err.is_format_mismatch());
    }

    #[test]
    fn test_date() {
        let fs = parse_volume(volume(&[("A", 6, 7, 10)]));
        let file = fs.find_file("A").unwrap();
        assert_eq!(date_text(file.modified), "4-May-79");
        assert!(catalog_line(file).ends_with("Textfile"));
    }

    #[test]
    fn test_delete_squeezes_entries() {
        let mut fs = parse_volume(volume(&[("A", 6, 8, 1), ("B", 8, 9, 1), ("C", 9, 12, 1)]));
        let free = fs.free_blocks();
        fs.delete_file("A").unwrap();
        assert_eq!(fs.free_blocks(), free + 2);
        match &fs.find_file("C").unwrap().detail {
            FileDetail::Pascal(entry) => assert_eq!(entry.slot, 2),
            other => panic!("unexpected detail {:?}", other),
        }

        let bytes = fs.into_bytes();
        let fs = parse_volume(bytes);
        let names: Vec<&str> = fs.files().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["B", "C"]);
        assert_eq!(fs.free_blocks(), 280 - 12 + 2);
    }
}
