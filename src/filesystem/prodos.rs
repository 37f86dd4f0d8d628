/// ProDOS file system
///
/// The volume directory starts at block 2. Directory blocks are doubly
/// linked and hold thirteen 39-byte entries; the first entry of a key block
/// is the volume or subdirectory header.

use crate::buffer::Buffer;
use crate::error::{FsError, Result};
use crate::file::{text, AppleFile, FileDetail, FileKind, ForkType, TextLayout};
use crate::filesystem::{pascal, AppleFileSystem, FileSystemType};
use crate::image::{BlockReader, BlockType, DiskParameters, FileId};
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, trace};
use std::collections::HashSet;

/// Block size
pub const BLOCK_SIZE: usize = 512;
/// Key block of the volume directory
pub const VOLUME_DIR_BLOCK: usize = 2;
/// Size of a directory entry
pub const ENTRY_LENGTH: usize = 0x27;
/// Entries in a directory block
pub const ENTRIES_PER_BLOCK: usize = 0x0D;
/// Offset of the first entry in a directory block
pub const FIRST_ENTRY: usize = 4;

/// Storage type: deleted entry
pub const DELETED: u8 = 0x0;
/// Storage type: one data block
pub const SEEDLING: u8 = 0x1;
/// Storage type: one index block
pub const SAPLING: u8 = 0x2;
/// Storage type: master index block
pub const TREE: u8 = 0x3;
/// Storage type: Pascal area on a ProDOS volume
pub const PASCAL_AREA: u8 = 0x4;
/// Storage type: GS/OS extended file (data + resource fork)
pub const EXTENDED: u8 = 0x5;
/// Storage type: subdirectory file
pub const SUBDIRECTORY: u8 = 0xD;
/// Storage type: subdirectory header
pub const SUBDIR_HEADER: u8 = 0xE;
/// Storage type: volume directory header
pub const VOLUME_HEADER: u8 = 0xF;

/// Deepest folder nesting accepted
const MAX_DIRECTORY_DEPTH: usize = 64;

/// A ProDOS directory entry
#[derive(Debug, Clone, PartialEq)]
pub struct ProdosEntry {
    /// Storage type nibble
    pub storage_type: u8,
    /// File type byte
    pub file_type: u8,
    /// Key block
    pub key_pointer: u16,
    /// Blocks used, as stored
    pub blocks_used: u16,
    /// EOF, as stored
    pub eof: u32,
    /// Access byte
    pub access: u8,
    /// Key block of the directory holding the entry
    pub header_pointer: u16,
    /// Directory block holding the entry
    pub dir_block: usize,
    /// Byte offset of the entry in that block
    pub entry_offset: usize,
}

/// Volume directory header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeHeader {
    /// Volume name
    pub name: String,
    /// Number of active entries in the volume directory
    pub file_count: u16,
    /// First bitmap block
    pub bitmap_pointer: u16,
    /// Blocks on the volume
    pub total_blocks: u16,
    /// Creation time
    pub created: Option<NaiveDateTime>,
}

fn u16_at(data: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([data[pos], data[pos + 1]])
}

/// ProDOS date and time words
pub fn prodos_date(date: u16, time: u16) -> Option<NaiveDateTime> {
    if date == 0 {
        return None;
    }
    let year = (date >> 9) as i32;
    let year = if year < 40 { 2000 + year } else { 1900 + year };
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;
    let hour = ((time >> 8) & 0x1F) as u32;
    let minute = (time & 0x3F) as u32;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)
}

/// Apply GS/OS lowercase flags to an uppercase name
fn apply_case(name: &str, flags: u16) -> String {
    if flags & 0x8000 == 0 {
        return name.to_string();
    }
    name.chars()
        .enumerate()
        .map(|(i, c)| {
            if i < 15 && flags & (0x4000 >> i) != 0 {
                c.to_ascii_lowercase()
            } else {
                c
            }
        })
        .collect()
}

fn entry_name(entry: &[u8]) -> String {
    let length = (entry[0] & 0x0F) as usize;
    String::from_utf8_lossy(&entry[1..1 + length]).to_string()
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'.')
}

/// Read and check the volume directory header
fn read_volume_header(reader: &BlockReader) -> Result<VolumeHeader> {
    let mismatch = |reason: &str| FsError::mismatch(FileSystemType::Prodos, reason);
    if !reader.is_valid_block(VOLUME_DIR_BLOCK) {
        return Err(mismatch("image too small"));
    }
    let block = reader.read(VOLUME_DIR_BLOCK);
    if u16_at(&block, 0) != 0 {
        return Err(mismatch("volume directory has a previous block"));
    }
    let header = &block[FIRST_ENTRY..FIRST_ENTRY + ENTRY_LENGTH];
    if header[0] >> 4 != VOLUME_HEADER {
        return Err(mismatch("bad volume header storage type"));
    }
    if header[0x1F] as usize != ENTRY_LENGTH || header[0x20] as usize != ENTRIES_PER_BLOCK {
        return Err(mismatch("bad entry length"));
    }
    let name = entry_name(header);
    if !valid_name(&name) {
        return Err(mismatch("bad volume name"));
    }
    let total_blocks = u16_at(header, 0x25);
    if total_blocks == 0 {
        return Err(mismatch("volume has no blocks"));
    }

    Ok(VolumeHeader {
        name: apply_case(&name, u16_at(header, 0x16)),
        file_count: u16_at(header, 0x21),
        bitmap_pointer: u16_at(header, 0x23),
        total_blocks,
        created: prodos_date(u16_at(header, 0x18), u16_at(header, 0x1A)),
    })
}

/// Parse a ProDOS volume
pub fn parse(name: &str, disk: Buffer, params: DiskParameters) -> Result<AppleFileSystem> {
    let reader = BlockReader::new(name, disk, params)?;
    let header = read_volume_header(&reader)?;
    debug!("{}: ProDOS volume /{}", name, header.name);

    let mut fs = AppleFileSystem::new(name, FileSystemType::Prodos, reader);
    fs.set_volume_name(header.name.clone());
    for block_no in 0..2 {
        fs.mark_fs_block(block_no, "BOOT");
    }

    let free = read_bitmap(&mut fs, &header);
    fs.set_free_blocks(free);

    let mut parser = DirectoryParser {
        visited: HashSet::new(),
        catalog_blocks: 0,
    };
    let files = parser.read_directory(&mut fs, VOLUME_DIR_BLOCK, 0)?;
    fs.set_catalog_blocks(parser.catalog_blocks);
    for file in files {
        fs.claim_blocks(&file);
        fs.add_file(file);
    }
    Ok(fs)
}

/// Count free blocks in the volume bitmap and label them
fn read_bitmap(fs: &mut AppleFileSystem, header: &VolumeHeader) -> usize {
    let total = (header.total_blocks as usize).min(fs.reader().total_blocks());
    let bitmap_blocks = total.div_ceil(BLOCK_SIZE * 8);
    let start = header.bitmap_pointer as usize;
    let mut free = 0;

    for i in 0..bitmap_blocks {
        let block_no = start + i;
        if !fs.reader().is_valid_block(block_no) {
            fs.anomaly(format!("bitmap block {} is off the disk", block_no));
            break;
        }
        fs.mark_fs_block(block_no, "BITMAP");
        let bitmap = fs.reader().read(block_no);
        for (byte_index, byte) in bitmap.iter().enumerate() {
            for bit in 0..8 {
                let n = (i * BLOCK_SIZE + byte_index) * 8 + bit;
                if n < total && byte & (0x80 >> bit) != 0 {
                    fs.reader_mut().set_block_type(n, BlockType::Empty, None);
                    free += 1;
                }
            }
        }
    }
    free
}

struct DirectoryParser {
    visited: HashSet<usize>,
    catalog_blocks: usize,
}

impl DirectoryParser {
    /// Read every entry of the directory whose key block is `key_block`
    fn read_directory(
        &mut self,
        fs: &mut AppleFileSystem,
        key_block: usize,
        depth: usize,
    ) -> Result<Vec<AppleFile>> {
        let is_volume = depth == 0;
        let fail = |reason: String| {
            if is_volume {
                FsError::mismatch(FileSystemType::Prodos, reason)
            } else {
                FsError::corrupt(FileSystemType::Prodos, reason)
            }
        };
        if depth > MAX_DIRECTORY_DEPTH {
            return Err(fail("directories nested too deeply".to_string()));
        }

        let mut files = Vec::new();
        let mut block_no = key_block;
        let mut first = true;

        loop {
            if !fs.reader().is_valid_block(block_no) {
                return Err(fail(format!("directory block {} out of range", block_no)));
            }
            if !self.visited.insert(block_no) {
                return Err(fail(format!("directory chain loops at block {}", block_no)));
            }
            self.catalog_blocks += 1;
            fs.mark_fs_block(block_no, if is_volume { "VOLUME DIR" } else { "SUBDIR" });

            let block = fs.reader().read(block_no);
            for index in 0..ENTRIES_PER_BLOCK {
                if first && index == 0 {
                    let storage = block[FIRST_ENTRY] >> 4;
                    let expected = if is_volume { VOLUME_HEADER } else { SUBDIR_HEADER };
                    if storage != expected {
                        return Err(fail(format!("block {} has no directory header", block_no)));
                    }
                    continue;
                }
                let offset = FIRST_ENTRY + index * ENTRY_LENGTH;
                let entry = &block[offset..offset + ENTRY_LENGTH];
                if entry[0] >> 4 == DELETED {
                    if entry[0] & 0x0F != 0 {
                        fs.add_deleted(entry_name(entry));
                    }
                    continue;
                }
                let name = entry_name(entry);
                match self.read_entry(fs, entry, block_no, offset, key_block, depth) {
                    Ok(file) => files.push(file),
                    Err(err) => fs.failed(name, &err),
                }
            }
            first = false;

            let next = u16_at(&block, 2) as usize;
            if next == 0 {
                break;
            }
            trace!("directory continues at block {}", next);
            block_no = next;
        }
        Ok(files)
    }

    fn read_entry(
        &mut self,
        fs: &mut AppleFileSystem,
        entry: &[u8],
        dir_block: usize,
        entry_offset: usize,
        key_block: usize,
        depth: usize,
    ) -> Result<AppleFile> {
        let detail = ProdosEntry {
            storage_type: entry[0] >> 4,
            file_type: entry[0x10],
            key_pointer: u16_at(entry, 0x11),
            blocks_used: u16_at(entry, 0x13),
            eof: u32::from_le_bytes([entry[0x15], entry[0x16], entry[0x17], 0]),
            access: entry[0x1E],
            header_pointer: u16_at(entry, 0x25),
            dir_block,
            entry_offset,
        };
        let name = apply_case(&entry_name(entry), u16_at(entry, 0x1C));
        let key = detail.key_pointer as usize;
        let eof = detail.eof as usize;

        if detail.header_pointer as usize != key_block {
            fs.anomaly(format!(
                "{}: header pointer {} should be {}",
                name, detail.header_pointer, key_block
            ));
        }

        let mut file = match detail.storage_type {
            SEEDLING | SAPLING | TREE => {
                let fork = read_fork(fs, detail.storage_type, key, eof)?;
                fork.into_file(fs.next_file_id(), &name, FileKind::File)
            }
            EXTENDED => read_extended(fs, &name, key)?,
            SUBDIRECTORY => {
                let mut folder = AppleFile::new(fs.next_file_id(), name.as_str(), FileKind::Folder);
                folder.children = self.read_directory(fs, key, depth + 1)?;
                folder
            }
            PASCAL_AREA => read_pascal_area(fs, &name, key, detail.blocks_used as usize)?,
            other => {
                return Err(FsError::corrupt(
                    FileSystemType::Prodos,
                    format!("{}: unknown storage type {}", name, other),
                ))
            }
        };

        if detail.storage_type != SUBDIRECTORY && detail.storage_type != EXTENDED {
            file.eof = eof;
        }
        file.aux_type = u16_at(entry, 0x1F);
        file.locked = detail.access & 0x02 == 0;
        file.created = prodos_date(u16_at(entry, 0x18), u16_at(entry, 0x1A));
        file.modified = prodos_date(u16_at(entry, 0x21), u16_at(entry, 0x23));

        let data_bytes = (file.data_blocks().len() + file.trailing_gaps) * BLOCK_SIZE;
        if matches!(detail.storage_type, SEEDLING | SAPLING | TREE) && eof > data_bytes {
            file.anomaly(format!(
                "EOF {} extends past the {} bytes of its blocks",
                eof, data_bytes
            ));
        }
        if detail.storage_type != SUBDIRECTORY
            && detail.storage_type != PASCAL_AREA
            && detail.blocks_used as usize != file.total_blocks() + fork_blocks(&file)
        {
            file.anomaly(format!(
                "blocks used {} but found {}",
                detail.blocks_used,
                file.total_blocks() + fork_blocks(&file)
            ));
        }

        if detail.file_type == 0x04 && file.aux_type > 0 && file.kind == FileKind::File {
            let raw = file.raw_file_buffer(fs.reader()).clone();
            let record_length = file.aux_type as usize;
            file.text = Some(TextLayout {
                random_access: true,
                record_length: Some(record_length),
                eof,
                text_blocks: text::text_blocks(
                    raw.as_slice(),
                    file.data_blocks(),
                    BLOCK_SIZE,
                    Some(record_length),
                ),
            });
        }

        file.detail = FileDetail::Prodos(detail);
        Ok(file)
    }
}

/// Blocks held by the forks of a forked file
fn fork_blocks(file: &AppleFile) -> usize {
    file.children.iter().map(|c| c.total_blocks()).sum()
}

fn check_block(reader: &BlockReader, block_no: usize, what: &str) -> Result<()> {
    if block_no == 0 || !reader.is_valid_block(block_no) {
        return Err(FsError::corrupt(
            FileSystemType::Prodos,
            format!("{} block {} out of range", what, block_no),
        ));
    }
    Ok(())
}

/// Pointers of an index block: low bytes then high bytes
fn index_pointers(index: &[u8], count: usize) -> Vec<usize> {
    (0..count)
        .map(|i| index[i] as usize | (index[256 + i] as usize) << 8)
        .collect()
}

/// Block lists of a seedling, sapling or tree fork
struct Fork {
    data: Vec<Option<usize>>,
    index: Vec<usize>,
    trailing_gaps: usize,
}

impl Fork {
    fn into_file(self, id: FileId, name: &str, kind: FileKind) -> AppleFile {
        let mut file = AppleFile::new(id, name, kind).with_blocks(self.data, BLOCK_SIZE);
        file.index_blocks = self.index;
        file.trailing_gaps = self.trailing_gaps;
        file
    }
}

/// Data blocks and index blocks of a seedling, sapling or tree fork
fn read_fork(fs: &AppleFileSystem, storage_type: u8, key: usize, eof: usize) -> Result<Fork> {
    let reader = fs.reader();
    check_block(reader, key, "key")?;
    let mut data = Vec::new();
    let mut index_blocks = Vec::new();

    match storage_type {
        SEEDLING => data.push(Some(key)),
        SAPLING => {
            index_blocks.push(key);
            read_index(reader, key, &mut data)?;
        }
        TREE => {
            index_blocks.push(key);
            let master = reader.read(key);
            let last = eof.div_ceil(BLOCK_SIZE * 256).clamp(1, 128);
            for pointer in index_pointers(&master, 128).into_iter().take(last) {
                if pointer == 0 {
                    data.extend(std::iter::repeat(None).take(256));
                    continue;
                }
                check_block(reader, pointer, "index")?;
                index_blocks.push(pointer);
                read_index(reader, pointer, &mut data)?;
            }
        }
        other => {
            return Err(FsError::corrupt(
                FileSystemType::Prodos,
                format!("fork storage type {} unsupported", other),
            ))
        }
    }

    let mut dropped = 0;
    while matches!(data.last(), Some(None)) {
        data.pop();
        dropped += 1;
    }
    // Only the holes that still fall inside the EOF count as gaps
    let trailing_gaps = eof
        .div_ceil(BLOCK_SIZE)
        .saturating_sub(data.len())
        .min(dropped);
    Ok(Fork {
        data,
        index: index_blocks,
        trailing_gaps,
    })
}

fn read_index(
    reader: &BlockReader,
    index_block: usize,
    data: &mut Vec<Option<usize>>,
) -> Result<()> {
    let index = reader.read(index_block);
    for pointer in index_pointers(&index, 256) {
        if pointer == 0 {
            data.push(None);
        } else {
            check_block(reader, pointer, "data")?;
            data.push(Some(pointer));
        }
    }
    Ok(())
}

/// GS/OS extended file: the key block describes both forks
fn read_extended(fs: &mut AppleFileSystem, name: &str, key: usize) -> Result<AppleFile> {
    check_block(fs.reader(), key, "extended key")?;
    let key_block = fs.reader().read(key);

    let mut forked = AppleFile::new(fs.next_file_id(), name, FileKind::Forked);
    forked.index_blocks.push(key);

    for (fork, base) in [(ForkType::Data, 0), (ForkType::Resource, 256)] {
        let mini = &key_block[base..base + 8];
        let storage_type = mini[0] & 0x0F;
        let fork_key = u16_at(mini, 1) as usize;
        let eof = u32::from_le_bytes([mini[5], mini[6], mini[7], 0]) as usize;
        if storage_type == DELETED || fork_key == 0 {
            continue;
        }
        let mut child = read_fork(fs, storage_type, fork_key, eof)?.into_file(
            fs.next_file_id(),
            name,
            FileKind::Fork(fork),
        );
        child.eof = eof;
        forked.children.push(child);
    }
    forked.eof = forked
        .fork(ForkType::Data)
        .map_or(0, |data| data.eof);
    Ok(forked)
}

/// Pascal area: a Pascal volume stored in contiguous ProDOS blocks
fn read_pascal_area(
    fs: &mut AppleFileSystem,
    name: &str,
    key: usize,
    blocks: usize,
) -> Result<AppleFile> {
    check_block(fs.reader(), key, "Pascal area")?;
    let list: Vec<usize> = (key..key + blocks)
        .filter(|&b| fs.reader().is_valid_block(b))
        .collect();
    let data = Buffer::new(fs.reader().read_many(&list));

    let mut file = AppleFile::new(fs.next_file_id(), name, FileKind::File)
        .with_blocks(list.into_iter().map(Some).collect(), BLOCK_SIZE);
    match pascal::parse(name, data, DiskParameters::prodos(0)) {
        Ok(area) => file.file_systems.push(area),
        Err(err) => file.anomaly(format!("Pascal area not readable: {}", err)),
    }
    Ok(file)
}

/// Remove an entry: clear its storage type, decrement the directory file count
/// and release its blocks in the volume bitmap
pub(crate) fn delete(fs: &mut AppleFileSystem, file: &AppleFile) -> Result<()> {
    let entry = match &file.detail {
        FileDetail::Prodos(entry) => entry.clone(),
        _ => return Err(FsError::unsupported(format!("{} is not a ProDOS file", file.name))),
    };
    if file.locked {
        return Err(FsError::unsupported(format!("{} is locked", file.name)));
    }
    if file.is_folder() && !file.children.is_empty() {
        return Err(FsError::unsupported(format!("{} is not empty", file.name)));
    }

    let gone = || FsError::corrupt(FileSystemType::Prodos, "directory block vanished");
    let block = fs.reader_mut().buffer_mut(entry.dir_block).ok_or_else(gone)?;
    block[entry.entry_offset] &= 0x0F;
    fs.reader_mut().mark_dirty(entry.dir_block);

    let header_block = entry.header_pointer as usize;
    let header = fs.reader_mut().buffer_mut(header_block).ok_or_else(gone)?;
    let count_at = FIRST_ENTRY + 0x21;
    let count = u16_at(header, count_at).saturating_sub(1);
    header[count_at..count_at + 2].copy_from_slice(&count.to_le_bytes());
    fs.reader_mut().mark_dirty(header_block);

    let mut released = Vec::new();
    collect_blocks(file, &mut released);
    if file.is_folder() {
        released.extend(folder_blocks(fs.reader(), entry.key_pointer as usize));
    }
    let header = read_volume_header(fs.reader())?;
    let bitmap = header.bitmap_pointer as usize;
    let free = fs.free_blocks() + released.len();
    for block_no in released {
        let bitmap_block = bitmap + block_no / (BLOCK_SIZE * 8);
        let bit = block_no % (BLOCK_SIZE * 8);
        if let Some(data) = fs.reader_mut().buffer_mut(bitmap_block) {
            data[bit / 8] |= 0x80 >> (bit % 8);
            fs.reader_mut().mark_dirty(bitmap_block);
        }
        fs.reader_mut().set_block_type(block_no, BlockType::Empty, None);
    }
    fs.set_free_blocks(free);
    fs.add_deleted(file.name.clone());
    Ok(())
}

fn collect_blocks(file: &AppleFile, out: &mut Vec<usize>) {
    out.extend(file.data_blocks().iter().flatten());
    out.extend(&file.index_blocks);
    for child in &file.children {
        collect_blocks(child, out);
    }
}

fn folder_blocks(reader: &BlockReader, key: usize) -> Vec<usize> {
    let mut blocks = Vec::new();
    let mut block_no = key;
    while reader.is_valid_block(block_no) && block_no != 0 && !blocks.contains(&block_no) {
        blocks.push(block_no);
        block_no = u16_at(&reader.read(block_no), 2) as usize;
    }
    blocks
}

/// Three-letter name of a ProDOS file type
pub fn type_name(file_type: u8) -> String {
    let name = match file_type {
        0x00 => "NON",
        0x01 => "BAD",
        0x04 => "TXT",
        0x06 => "BIN",
        0x08 => "FOT",
        0x0F => "DIR",
        0x19 => "ADB",
        0x1A => "AWP",
        0x1B => "ASP",
        0xB0 => "SRC",
        0xB1 => "OBJ",
        0xB2 => "LIB",
        0xB3 => "S16",
        0xB5 => "EXE",
        0xB6 => "PIF",
        0xB8 => "NDA",
        0xB9 => "CDA",
        0xBA => "TOL",
        0xC0 => "PNT",
        0xC1 => "PIC",
        0xC8 => "FNT",
        0xC9 => "FND",
        0xCA => "ICN",
        0xD5 => "MUS",
        0xD8 => "SND",
        0xE0 => "LBR",
        0xE2 => "ATK",
        0xEF => "PAS",
        0xF0 => "CMD",
        0xFA => "INT",
        0xFB => "IVR",
        0xFC => "BAS",
        0xFD => "VAR",
        0xFE => "REL",
        0xFF => "SYS",
        other => return format!("${:02X}", other),
    };
    name.to_string()
}

fn date_text(date: Option<NaiveDateTime>) -> String {
    match date {
        Some(date) => date.format("%d-%b-%y %H:%M").to_string().to_uppercase(),
        None => "<NO DATE>".to_string(),
    }
}

/// One catalog line in the style of the ProDOS CATALOG command
pub fn catalog_line(file: &AppleFile) -> String {
    let file_type = match (&file.detail, file.kind) {
        (_, FileKind::Folder) => "DIR".to_string(),
        (FileDetail::Prodos(entry), _) => type_name(entry.file_type),
        _ => String::new(),
    };
    let blocks = match &file.detail {
        FileDetail::Prodos(entry) => entry.blocks_used as usize,
        _ => file.total_blocks(),
    };
    format!(
        "{}{:<15} {:<3} {:>6} {:<15} {:<15} {:>8} ${:04X}",
        if file.locked { '*' } else { ' ' },
        file.name,
        file_type,
        blocks,
        date_text(file.modified),
        date_text(file.created),
        file.eof,
        file.aux_type
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Blank 280-block volume "TEST" with a one-block volume directory
    pub(crate) fn blank_volume() -> Vec<u8> {
        let mut disk = vec![0u8; 280 * BLOCK_SIZE];
        let dir = VOLUME_DIR_BLOCK * BLOCK_SIZE + FIRST_ENTRY;
        disk[dir] = (VOLUME_HEADER << 4) | 4;
        disk[dir + 1..dir + 5].copy_from_slice(b"TEST");
        disk[dir + 0x1F] = ENTRY_LENGTH as u8;
        disk[dir + 0x20] = ENTRIES_PER_BLOCK as u8;
        disk[dir + 0x23] = 6;
        disk[dir + 0x25..dir + 0x27].copy_from_slice(&280u16.to_le_bytes());
        // Blocks 7..279 free
        let bitmap = 6 * BLOCK_SIZE;
        for block in 7..280 {
            disk[bitmap + block / 8] |= 0x80 >> (block % 8);
        }
        disk
    }

    /// Write a file entry into slot `index` of directory block `dir_block`
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn add_entry(
        disk: &mut [u8],
        dir_block: usize,
        index: usize,
        storage: u8,
        name: &str,
        file_type: u8,
        key: u16,
        blocks: u16,
        eof: u32,
    ) {
        let at = dir_block * BLOCK_SIZE + FIRST_ENTRY + index * ENTRY_LENGTH;
        disk[at] = (storage << 4) | name.len() as u8;
        disk[at + 1..at + 1 + name.len()].copy_from_slice(name.as_bytes());
        disk[at + 0x10] = file_type;
        disk[at + 0x11..at + 0x13].copy_from_slice(&key.to_le_bytes());
        disk[at + 0x13..at + 0x15].copy_from_slice(&blocks.to_le_bytes());
        disk[at + 0x15..at + 0x18].copy_from_slice(&eof.to_le_bytes()[..3]);
        disk[at + 0x1E] = 0xE3;
        disk[at + 0x25..at + 0x27].copy_from_slice(&(dir_block as u16).to_le_bytes());
        let header = dir_block * BLOCK_SIZE + FIRST_ENTRY + 0x21;
        let count = u16::from_le_bytes([disk[header], disk[header + 1]]) + 1;
        disk[header..header + 2].copy_from_slice(&count.to_le_bytes());
    }

    fn parse_volume(disk: Vec<u8>) -> AppleFileSystem {
        parse("test.po", Buffer::new(disk), DiskParameters::prodos(0)).unwrap()
    }

    #[test]
    fn test_blank_volume() {
        let fs = parse_volume(blank_volume());
        assert_eq!(fs.volume_name(), Some("TEST"));
        assert_eq!(fs.total_catalog_blocks(), 1);
        assert_eq!(fs.free_blocks(), 273);
        assert_eq!(fs.reader().block_type(6), BlockType::FsData);
    }

    #[test]
    fn test_seedling() {
        let mut disk = blank_volume();
        add_entry(&mut disk, 2, 1, SEEDLING, "README", 0x04, 50, 1, 100);
        let fs = parse_volume(disk);

        let file = fs.find_file("README").unwrap();
        assert_eq!(file.data_blocks(), &[Some(50)]);
        assert_eq!(file.file_length(), 100);
        assert_eq!(file.type_text(), "TXT");
        assert!(file.anomalies.is_empty());
    }

    #[test]
    fn test_sapling_drops_trailing_zero_pointers() {
        let mut disk = blank_volume();
        add_entry(&mut disk, 2, 1, SAPLING, "BIG", 0x06, 60, 4, 1200);
        let index = 60 * BLOCK_SIZE;
        disk[index] = 61;
        disk[index + 1] = 0;
        disk[index + 2] = 63;
        let fs = parse_volume(disk);

        let file = fs.find_file("BIG").unwrap();
        assert_eq!(file.data_blocks(), &[Some(61), None, Some(63)]);
        assert_eq!(file.index_blocks, vec![60]);
        assert_eq!(file.file_gaps(), 1);
        assert_eq!(file.total_blocks(), 3);
        assert!(file.data_blocks().len() <= 256);
    }

    #[test]
    fn test_sparse_tail_counts_as_gaps() {
        let mut disk = blank_volume();
        add_entry(&mut disk, 2, 1, SAPLING, "SPARSE", 0x06, 60, 2, 1536);
        let index = 60 * BLOCK_SIZE;
        disk[index] = 8;
        disk[8 * BLOCK_SIZE] = 0x42;
        let fs = parse_volume(disk);

        let file = fs.find_file("SPARSE").unwrap();
        assert_eq!(file.data_blocks(), &[Some(8)]);
        assert_eq!(file.trailing_gaps, 2);
        assert_eq!(file.file_gaps(), 2);
        assert_eq!(file.total_blocks(), 2);
        assert!(file.anomalies.is_empty(), "{:?}", file.anomalies);

        let data = fs.read_file("SPARSE").unwrap();
        assert_eq!(data.len(), 1536);
        assert_eq!(data[0], 0x42);
        assert!(data[BLOCK_SIZE..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_subdirectory() {
        let mut disk = blank_volume();
        add_entry(&mut disk, 2, 1, SUBDIRECTORY, "DOCS", 0x0F, 70, 1, 512);
        let sub = 70 * BLOCK_SIZE + FIRST_ENTRY;
        disk[sub] = (SUBDIR_HEADER << 4) | 4;
        disk[sub + 1..sub + 5].copy_from_slice(b"DOCS");
        add_entry(&mut disk, 70, 1, SEEDLING, "NOTE", 0x04, 71, 1, 10);

        let fs = parse_volume(disk);
        assert_eq!(fs.total_catalog_blocks(), 2);
        let folder = fs.find_file("DOCS").unwrap();
        assert!(folder.is_folder());
        assert_eq!(fs.find_file("DOCS/NOTE").unwrap().file_length(), 10);
    }

    #[test]
    fn test_subdirectory_cycle_is_contained() {
        let mut disk = blank_volume();
        add_entry(&mut disk, 2, 1, SUBDIRECTORY, "LOOP", 0x0F, 2, 1, 512);
        add_entry(&mut disk, 2, 2, SEEDLING, "OK", 0x04, 50, 1, 5);

        let fs = parse_volume(disk);
        assert!(fs.find_file("OK").is_some());
        assert_eq!(fs.failures().len(), 1);
    }

    #[test]
    fn test_extended_forks() {
        let mut disk = blank_volume();
        add_entry(&mut disk, 2, 1, EXTENDED, "ICONS", 0xCA, 80, 3, 0);
        let key = 80 * BLOCK_SIZE;
        disk[key] = SEEDLING;
        disk[key + 1] = 81;
        disk[key + 5] = 200;
        disk[key + 256] = SEEDLING;
        disk[key + 257] = 82;
        disk[key + 261] = 40;

        let fs = parse_volume(disk);
        let file = fs.find_file("ICONS").unwrap();
        assert_eq!(file.kind, FileKind::Forked);
        assert!(file.is_container());
        let resource = file.fork(ForkType::Resource).unwrap();
        assert_eq!(resource.fork_type().unwrap(), ForkType::Resource);
        assert_eq!(resource.file_length(), 40);
        assert_eq!(fs.read_file("ICONS").unwrap().len(), 200);
        assert!(file.anomalies.is_empty());
    }

    #[test]
    fn test_rejects_non_prodos() {
        let err = parse("x", Buffer::new(vec![0u8; 280 * 512]), DiskParameters::prodos(0))
            .unwrap_err();
        assert!(err.is_format_mismatch());
    }

    #[test]
    fn test_lowercase_flags() {
        assert_eq!(apply_case("HELLO.TXT", 0x8000 | 0x4000 | 0x0800), "hELlO.TXT");
        assert_eq!(apply_case("HELLO", 0x4000), "HELLO");
    }

    #[test]
    fn test_date() {
        let date = prodos_date((86 << 9) | (5 << 5) | 17, (13 << 8) | 45).unwrap();
        assert_eq!(date_text(Some(date)), "17-MAY-86 13:45");
        assert!(prodos_date(0, 0).is_none());
    }

    #[test]
    fn test_delete_and_flush() {
        let mut disk = blank_volume();
        add_entry(&mut disk, 2, 1, SEEDLING, "TEMP", 0x04, 50, 1, 10);
        // Mark block 50 used
        disk[6 * BLOCK_SIZE + 50 / 8] &= !(0x80 >> (50 % 8));
        let mut fs = parse_volume(disk);
        let free = fs.free_blocks();

        fs.delete_file("TEMP").unwrap();
        fs.flush();
        let reparsed = parse("t", fs.reader().disk().clone(), DiskParameters::prodos(0)).unwrap();
        assert!(reparsed.files().is_empty());
        assert_eq!(reparsed.free_blocks(), free + 1);
        let header = VOLUME_DIR_BLOCK * BLOCK_SIZE + FIRST_ENTRY + 0x21;
        assert_eq!(reparsed.reader().read(2)[header - VOLUME_DIR_BLOCK * BLOCK_SIZE], 0);
    }
}
