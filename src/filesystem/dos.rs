/// DOS 3.1, 3.2, 3.3 and 4.x file systems
///
/// The VTOC at track 17 sector 0 heads a linked list of catalog sectors,
/// each holding seven 35-byte entries. Every entry points to a chain of
/// track/sector lists naming the file's data sectors.

use crate::buffer::Buffer;
use crate::error::{FsError, Result};
use crate::file::{text, AppleFile, FileDetail, FileKind};
use crate::filesystem::{apple_name, AppleFileSystem, FileSystemType};
use crate::image::{BlockReader, BlockType, DiskParameters};
use chrono::NaiveDateTime;
use log::{debug, trace};
use std::collections::HashSet;

/// Track holding the VTOC
pub const VTOC_TRACK: usize = 17;
/// Offset of the first catalog entry in a catalog sector
pub const ENTRY_OFFSET: usize = 0x0B;
/// Size of a catalog entry
pub const ENTRY_SIZE: usize = 35;
/// Entries per catalog sector
pub const ENTRIES_PER_SECTOR: usize = 7;
/// Offset of the first pair in a track/sector list
pub const TS_PAIR_OFFSET: usize = 0x0C;
/// Track/sector pairs per list sector
pub const TS_PAIRS: usize = 122;
/// Offset of the free-sector bitmaps in the VTOC
pub const BITMAP_OFFSET: usize = 0x38;
/// Track byte of a deleted entry
pub const DELETED_MARKER: u8 = 0xFF;

/// DOS file type byte (without the lock bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DosFileType {
    /// T
    Text,
    /// I
    Integer,
    /// A
    Applesoft,
    /// B
    Binary,
    /// S
    S,
    /// R (relocatable)
    Relocatable,
    /// "new A"
    NewA,
    /// "new B"
    NewB,
}

impl DosFileType {
    /// Decode the type byte
    pub fn from_byte(byte: u8) -> Self {
        match byte & 0x7F {
            0x00 => DosFileType::Text,
            0x01 => DosFileType::Integer,
            0x02 => DosFileType::Applesoft,
            0x04 => DosFileType::Binary,
            0x08 => DosFileType::S,
            0x10 => DosFileType::Relocatable,
            0x20 => DosFileType::NewA,
            _ => DosFileType::NewB,
        }
    }

    /// Catalog letter
    pub fn letter(&self) -> char {
        match self {
            DosFileType::Text => 'T',
            DosFileType::Integer => 'I',
            DosFileType::Applesoft => 'A',
            DosFileType::Binary => 'B',
            DosFileType::S => 'S',
            DosFileType::Relocatable => 'R',
            DosFileType::NewA => 'A',
            DosFileType::NewB => 'B',
        }
    }

    /// Programs that start with a 2-byte length word
    pub fn has_length_word(&self) -> bool {
        matches!(
            self,
            DosFileType::Applesoft | DosFileType::Integer | DosFileType::NewA
        )
    }

    /// Files that start with a load address and a length
    pub fn has_load_address(&self) -> bool {
        matches!(
            self,
            DosFileType::Binary | DosFileType::Relocatable | DosFileType::NewB
        )
    }
}

/// A DOS catalog entry
#[derive(Debug, Clone, PartialEq)]
pub struct DosEntry {
    /// File type
    pub file_type: DosFileType,
    /// Sector count as stored in the catalog
    pub sector_count: u16,
    /// First track/sector list
    pub ts_track: u8,
    /// First track/sector list sector
    pub ts_sector: u8,
    /// Catalog sector holding the entry
    pub catalog_block: usize,
    /// Slot within the catalog sector
    pub slot: usize,
}

/// Layout differences between DOS releases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    name_length: usize,
    dos4: bool,
}

impl Layout {
    fn for_release(release: u8) -> Self {
        if release & 0xF0 == 0x40 {
            Layout {
                name_length: 24,
                dos4: true,
            }
        } else {
            Layout {
                name_length: 30,
                dos4: false,
            }
        }
    }
}

/// Parse a DOS catalog with the given geometry
pub fn parse(name: &str, disk: Buffer, params: DiskParameters) -> Result<AppleFileSystem> {
    let reader = BlockReader::new(name, disk, params)?;
    let fs_type = if params.blocks_per_track == 13 {
        FileSystemType::Dos31
    } else {
        FileSystemType::Dos
    };

    let vtoc_block = reader
        .block_no(VTOC_TRACK, 0)
        .ok_or_else(|| FsError::mismatch(fs_type, "image too small for a VTOC"))?;
    let vtoc = reader.read(vtoc_block);

    let release = vtoc[0x03];
    let layout = Layout::for_release(release);
    let fs_type = if layout.dos4 && fs_type == FileSystemType::Dos {
        FileSystemType::Dos4
    } else {
        fs_type
    };

    let sectors = vtoc[0x35] as usize;
    if sectors != params.blocks_per_track {
        return Err(FsError::mismatch(
            fs_type,
            format!("VTOC claims {} sectors per track", sectors),
        ));
    }
    let (cat_track, cat_sector) = (vtoc[0x01] as usize, vtoc[0x02] as usize);
    if cat_track == 0 || !reader.is_valid_sector(cat_track, cat_sector) {
        return Err(FsError::mismatch(
            fs_type,
            format!("bad catalog pointer T{}/S{}", cat_track, cat_sector),
        ));
    }

    let mut fs = AppleFileSystem::new(name, fs_type, reader);
    fs.set_volume_name(format!("DISK VOLUME {:03}", vtoc[0x06]));
    fs.mark_fs_block(vtoc_block, "VTOC");

    let free = mark_free_sectors(&mut fs, &vtoc);
    fs.set_free_blocks(free);

    let catalog = read_catalog_chain(&fs, fs_type, cat_track, cat_sector)?;
    fs.set_catalog_blocks(catalog.len());
    debug!("{}: {} catalog sectors", name, catalog.len());

    for &block_no in &catalog {
        fs.mark_fs_block(block_no, "CATALOG");
        let sector = fs.reader().read(block_no);
        for slot in 0..ENTRIES_PER_SECTOR {
            let start = ENTRY_OFFSET + slot * ENTRY_SIZE;
            let entry = &sector[start..start + ENTRY_SIZE];
            read_entry(&mut fs, layout, block_no, slot, entry);
        }
    }

    Ok(fs)
}

/// Walk the catalog chain, returning catalog block numbers in order
fn read_catalog_chain(
    fs: &AppleFileSystem,
    fs_type: FileSystemType,
    track: usize,
    sector: usize,
) -> Result<Vec<usize>> {
    let reader = fs.reader();
    let mut visited = HashSet::new();
    let mut chain = Vec::new();
    let (mut track, mut sector) = (track, sector);

    loop {
        let block_no = match reader.block_no(track, sector) {
            Some(block_no) => block_no,
            None if chain.is_empty() => {
                return Err(FsError::mismatch(fs_type, "catalog sector out of range"))
            }
            None => {
                trace!("catalog chain leaves the disk at T{}/S{}", track, sector);
                break;
            }
        };
        if !visited.insert(block_no) {
            return Err(FsError::mismatch(fs_type, "catalog chain loops"));
        }
        chain.push(block_no);

        let data = reader.read(block_no);
        track = data[0x01] as usize;
        sector = data[0x02] as usize;
        if track == 0 {
            break;
        }
    }
    Ok(chain)
}

fn read_entry(
    fs: &mut AppleFileSystem,
    layout: Layout,
    catalog_block: usize,
    slot: usize,
    entry: &[u8],
) {
    let ts_track = entry[0x00];
    if ts_track == 0 {
        return;
    }
    let deleted = if layout.dos4 {
        ts_track & 0x80 != 0
    } else {
        ts_track == DELETED_MARKER
    };
    if deleted {
        // DOS 3.x keeps the original TS track in the last name byte
        let length = if layout.dos4 { layout.name_length } else { layout.name_length - 1 };
        fs.add_deleted(apple_name(&entry[0x03..0x03 + length]));
        return;
    }
    let name = apple_name(&entry[0x03..0x03 + layout.name_length]);

    let dos_entry = DosEntry {
        file_type: DosFileType::from_byte(entry[0x02]),
        sector_count: u16::from_le_bytes([entry[0x21], entry[0x22]]),
        ts_track,
        ts_sector: entry[0x01],
        catalog_block,
        slot,
    };
    let locked = entry[0x02] & 0x80 != 0;
    let modified = if layout.dos4 {
        dos4_timestamp(u32::from_le_bytes([entry[0x1B], entry[0x1C], entry[0x1D], entry[0x1E]]))
    } else {
        None
    };

    match build_file(fs, &name, dos_entry) {
        Ok(mut file) => {
            file.locked = locked;
            file.modified = modified;
            fs.claim_blocks(&file);
            for &block_no in &file.index_blocks {
                fs.reader_mut()
                    .set_block_type(block_no, BlockType::FsData, Some("TSLIST"));
            }
            fs.add_file(file);
        }
        Err(err) => fs.failed(name, &err),
    }
}

/// Follow the track/sector lists of one entry
fn build_file(fs: &mut AppleFileSystem, name: &str, entry: DosEntry) -> Result<AppleFile> {
    let fs_type = fs.fs_type();
    let reader = fs.reader();
    let is_text = entry.file_type == DosFileType::Text;

    let mut index_blocks = Vec::new();
    let mut data_blocks: Vec<Option<usize>> = Vec::new();
    let mut visited = HashSet::new();
    let (mut track, mut sector) = (entry.ts_track as usize, entry.ts_sector as usize);

    'lists: loop {
        let block_no = reader.block_no(track, sector).ok_or_else(|| {
            FsError::corrupt(fs_type, format!("{}: bad TS list T{}/S{}", name, track, sector))
        })?;
        if !visited.insert(block_no) {
            return Err(FsError::corrupt(fs_type, format!("{}: TS list chain loops", name)));
        }
        index_blocks.push(block_no);

        let list = reader.read(block_no);
        for pair in list[TS_PAIR_OFFSET..TS_PAIR_OFFSET + TS_PAIRS * 2].chunks_exact(2) {
            let (t, s) = (pair[0] as usize, pair[1] as usize);
            if t == 0 && s == 0 {
                if is_text {
                    data_blocks.push(None);
                    continue;
                }
                break 'lists;
            }
            let data_block = reader.block_no(t, s).ok_or_else(|| {
                FsError::corrupt(fs_type, format!("{}: bad data sector T{}/S{}", name, t, s))
            })?;
            data_blocks.push(Some(data_block));
        }

        track = list[0x01] as usize;
        sector = list[0x02] as usize;
        if track == 0 {
            break;
        }
    }

    // Unused pairs at the end of the last list are not gaps
    while matches!(data_blocks.last(), Some(None)) {
        data_blocks.pop();
    }

    let file_type = entry.file_type;
    let sector_count = entry.sector_count as usize;
    let mut file = AppleFile::new(fs.next_file_id(), name, FileKind::File)
        .with_blocks(data_blocks, fs.reader().block_size());
    file.index_blocks = index_blocks;
    file.detail = FileDetail::Dos(entry);

    let raw = file.raw_file_buffer(fs.reader()).clone();
    let bytes = raw.as_slice();

    if file_type.has_length_word() {
        file.data_offset = 2;
        file.eof = u16::from_le_bytes([byte(bytes, 0), byte(bytes, 1)]) as usize;
        if file_type == DosFileType::Applesoft {
            file.aux_type = 0x0801;
        }
    } else if file_type.has_load_address() {
        file.data_offset = 4;
        file.aux_type = u16::from_le_bytes([byte(bytes, 0), byte(bytes, 1)]);
        file.eof = u16::from_le_bytes([byte(bytes, 2), byte(bytes, 3)]) as usize;
    } else if file_type == DosFileType::Text {
        let layout = text::analyze(bytes, file.data_blocks(), file.block_size);
        file.eof = layout.eof;
        if let Some(length) = layout.record_length {
            file.aux_type = length as u16;
        }
        if layout.random_access {
            file.text = Some(layout);
        }
    }

    if file.data_offset + file.eof > raw.len() {
        file.anomaly(format!(
            "EOF {} exceeds the {} bytes in its sectors",
            file.eof,
            raw.len().saturating_sub(file.data_offset)
        ));
    }
    if sector_count != file.total_blocks() {
        file.anomaly(format!(
            "catalog says {} sectors, found {}",
            sector_count,
            file.total_blocks()
        ));
    }
    file.prime_raw(raw);
    Ok(file)
}

fn byte(data: &[u8], pos: usize) -> u8 {
    data.get(pos).copied().unwrap_or(0)
}

/// Bitmap word for one track: sector `s` is bit `s + (32 - 8 * bytes)` of a big-endian u32
fn bitmap_shift(sectors_per_track: usize) -> usize {
    32 - 8 * sectors_per_track.div_ceil(8)
}

fn is_free(vtoc: &[u8], track: usize, sector: usize, sectors_per_track: usize) -> bool {
    let base = BITMAP_OFFSET + track * 4;
    if base + 4 > vtoc.len() {
        return false;
    }
    let word = u32::from_be_bytes([vtoc[base], vtoc[base + 1], vtoc[base + 2], vtoc[base + 3]]);
    word & (1 << (sector + bitmap_shift(sectors_per_track))) != 0
}

/// Count free sectors and label them empty
fn mark_free_sectors(fs: &mut AppleFileSystem, vtoc: &[u8]) -> usize {
    let spt = fs.reader().params().blocks_per_track;
    let tracks = (vtoc[0x34] as usize).min(fs.reader().total_tracks());
    let mut free = 0;
    for track in 0..tracks {
        for sector in 0..spt {
            if is_free(vtoc, track, sector, spt) {
                if let Some(block_no) = fs.reader().block_no(track, sector) {
                    fs.reader_mut().set_block_type(block_no, BlockType::Empty, None);
                    free += 1;
                }
            }
        }
    }
    free
}

/// DOS 4 packed timestamp (FAT-style fields, years from 1900)
fn dos4_timestamp(value: u32) -> Option<NaiveDateTime> {
    if value == 0 {
        return None;
    }
    let date = chrono::NaiveDate::from_ymd_opt(
        1900 + ((value >> 25) & 0x7F) as i32,
        (value >> 21) & 0x0F,
        (value >> 16) & 0x1F,
    )?;
    date.and_hms_opt((value >> 11) & 0x1F, (value >> 5) & 0x3F, (value & 0x1F) * 2)
}

/// Tombstone a catalog entry and release its sectors in the VTOC
pub(crate) fn delete(fs: &mut AppleFileSystem, file: &AppleFile) -> Result<()> {
    let entry = match &file.detail {
        FileDetail::Dos(entry) => entry.clone(),
        _ => return Err(FsError::unsupported(format!("{} is not a DOS file", file.name))),
    };
    if file.locked {
        return Err(FsError::unsupported(format!("{} is locked", file.name)));
    }

    let offset = ENTRY_OFFSET + entry.slot * ENTRY_SIZE;
    let catalog = fs
        .reader_mut()
        .buffer_mut(entry.catalog_block)
        .ok_or_else(|| FsError::corrupt(FileSystemType::Dos, "catalog sector vanished"))?;
    catalog[offset + 0x20] = catalog[offset];
    catalog[offset] = DELETED_MARKER;
    fs.reader_mut().mark_dirty(entry.catalog_block);

    let spt = fs.reader().params().blocks_per_track;
    let shift = bitmap_shift(spt);
    let sectors: Vec<usize> = file
        .data_blocks()
        .iter()
        .flatten()
        .chain(file.index_blocks.iter())
        .copied()
        .collect();
    let vtoc_block = fs
        .reader()
        .block_no(VTOC_TRACK, 0)
        .ok_or_else(|| FsError::corrupt(FileSystemType::Dos, "VTOC vanished"))?;
    if let Some(vtoc) = fs.reader_mut().buffer_mut(vtoc_block) {
        for block_no in &sectors {
            let (track, sector) = (block_no / spt, block_no % spt);
            let base = BITMAP_OFFSET + track * 4;
            if base + 4 > vtoc.len() {
                continue;
            }
            let bit = sector + shift;
            vtoc[base + 3 - bit / 8] |= 1 << (bit % 8);
        }
    }
    fs.reader_mut().mark_dirty(vtoc_block);

    for block_no in sectors {
        fs.reader_mut().set_block_type(block_no, BlockType::Empty, None);
    }
    fs.add_deleted(file.name.clone());
    Ok(())
}

/// One catalog line: lock flag, type, sector count, name
pub fn catalog_line(file: &AppleFile) -> String {
    match &file.detail {
        FileDetail::Dos(entry) => format!(
            "{}{} {:03} {}",
            if file.locked { '*' } else { ' ' },
            entry.file_type.letter(),
            entry.sector_count % 1000,
            file.name
        ),
        _ => file.name.clone(),
    }
}
