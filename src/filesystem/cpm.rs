/// CP/M filesystem implementation

use crate::buffer::Buffer;
use crate::error::{FsError, Result};
use crate::file::{AppleFile, FileDetail, FileKind};
use crate::filesystem::{AppleFileSystem, FileSystemType};
use crate::image::{BlockReader, BlockType, DiskParameters};
use log::debug;
use std::collections::HashMap;

/// Size of a directory entry
pub const ENTRY_SIZE: usize = 32;
/// Size of a CP/M record
pub const RECORD_SIZE: usize = 128;
/// Marker for an unused directory entry
pub const DELETED: u8 = 0xE5;
/// Highest valid user number
pub const MAX_USER: u8 = 31;

/// Where the directory lives and how allocation bytes are read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    first_catalog: usize,
    catalog_blocks: usize,
    wide_pointers: bool,
}

impl Layout {
    fn for_params(params: &DiskParameters) -> Self {
        if *params == DiskParameters::cpm() {
            // 5.25" disks: three boot tracks, directory on track 3
            Layout {
                first_catalog: 12,
                catalog_blocks: 2,
                wide_pointers: false,
            }
        } else {
            Layout {
                first_catalog: 0,
                catalog_blocks: 8,
                wide_pointers: true,
            }
        }
    }

    fn catalog(&self) -> std::ops::Range<usize> {
        self.first_catalog..self.first_catalog + self.catalog_blocks
    }

    /// Allocation bytes to block numbers; zero entries are unused
    fn pointers(&self, allocation: &[u8]) -> Vec<usize> {
        if self.wide_pointers {
            allocation
                .chunks(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]) as usize)
                .filter(|&b| b != 0)
                .collect()
        } else {
            allocation
                .iter()
                .filter(|&&b| b != 0)
                .map(|&b| {
                    if b & 0x80 == 0 {
                        b as usize + 12
                    } else {
                        (b & 0x7F) as usize
                    }
                })
                .collect()
        }
    }
}

/// CP/M directory entry (32 bytes)
#[derive(Debug, Clone)]
struct CpmDirEntry {
    user: u8,
    filename: [u8; 8],
    extension: [u8; 3],
    extent_low: u8,
    extent_high: u8,
    record_count: u8,
    allocation: [u8; 16],
}

impl CpmDirEntry {
    /// Parse a directory entry from 32 bytes, `None` for deleted entries
    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < ENTRY_SIZE || data[0] == DELETED {
            return None;
        }
        let mut filename = [0u8; 8];
        let mut extension = [0u8; 3];
        let mut allocation = [0u8; 16];
        filename.copy_from_slice(&data[1..9]);
        extension.copy_from_slice(&data[9..12]);
        allocation.copy_from_slice(&data[16..32]);

        Some(Self {
            user: data[0],
            filename,
            extension,
            extent_low: data[12],
            extent_high: data[14],
            record_count: data[15],
            allocation,
        })
    }

    fn name_part(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|&b| (b & 0x7F) as char)
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    fn name(&self) -> String {
        Self::name_part(&self.filename)
    }

    fn ext(&self) -> String {
        Self::name_part(&self.extension)
    }

    /// Full filename as NAME.EXT
    fn filename_str(&self) -> String {
        let ext = self.ext();
        if ext.is_empty() {
            self.name()
        } else {
            format!("{}.{}", self.name(), ext)
        }
    }

    fn is_read_only(&self) -> bool {
        (self.extension[0] & 0x80) != 0
    }

    fn is_system(&self) -> bool {
        (self.extension[1] & 0x80) != 0
    }

    fn is_archive(&self) -> bool {
        (self.extension[2] & 0x80) != 0
    }

    /// Extent number: S2 supplies the high bits above EX's five
    fn extent_number(&self) -> u16 {
        ((self.extent_high as u16) << 5) | (self.extent_low as u16 & 0x1F)
    }

    /// Structural checks that separate a directory from arbitrary data
    fn check(&self) -> std::result::Result<(), String> {
        if self.user > MAX_USER {
            return Err(format!("user number {}", self.user));
        }
        let printable = |b: &u8| (0x20..0x7F).contains(&(b & 0x7F));
        if !self.filename.iter().chain(self.extension.iter()).all(printable) {
            return Err("unprintable name".to_string());
        }
        if self.filename[0] & 0x7F == b' ' {
            return Err("blank name".to_string());
        }
        if self
            .filename
            .iter()
            .chain(self.extension.iter())
            .any(|b| matches!(b & 0x7F, b'.' | b'*' | b'?' | b':' | b'<' | b'>' | b','))
        {
            return Err("reserved character in name".to_string());
        }
        if self.extent_low > 0x1F || self.record_count > 0x80 {
            return Err("extent fields out of range".to_string());
        }
        Ok(())
    }
}

/// A file assembled from one or more extents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpmEntry {
    /// User number
    pub user: u8,
    /// Name without extension
    pub name: String,
    /// Extension, used as the file type
    pub extension: String,
    /// Read-only attribute
    pub read_only: bool,
    /// System attribute
    pub system: bool,
    /// Archive attribute
    pub archive: bool,
    /// Extent numbers in file order
    pub extents: Vec<u16>,
    /// 128-byte records in the file
    pub records: usize,
}

impl CpmEntry {
    /// File type text: the extension
    pub fn type_text(&self) -> String {
        self.extension.clone()
    }

    /// Attribute flags as R/S/A letters
    pub fn attribute_text(&self) -> String {
        [
            (self.read_only, 'R'),
            (self.system, 'S'),
            (self.archive, 'A'),
        ]
        .iter()
        .map(|&(set, c)| if set { c } else { '-' })
        .collect()
    }
}

/// Parse a CP/M volume
pub fn parse(name: &str, disk: Buffer, params: DiskParameters) -> Result<AppleFileSystem> {
    let reader = BlockReader::new(name, disk, params)?;
    let layout = Layout::for_params(&params);
    if reader.total_blocks() < layout.first_catalog + layout.catalog_blocks {
        return Err(FsError::mismatch(FileSystemType::Cpm, "image too small"));
    }

    let catalog: Vec<usize> = layout.catalog().collect();
    let data = reader.read_many(&catalog);
    let mut directory = Vec::new();
    for chunk in data.chunks(ENTRY_SIZE) {
        let Some(entry) = CpmDirEntry::parse(chunk) else {
            continue;
        };
        entry
            .check()
            .map_err(|reason| FsError::mismatch(FileSystemType::Cpm, reason))?;
        directory.push(entry);
    }
    debug!("{}: CP/M directory with {} extents", name, directory.len());

    let mut fs = AppleFileSystem::new(name, FileSystemType::Cpm, reader);
    fs.set_catalog_blocks(layout.catalog_blocks);
    for block_no in 0..layout.first_catalog {
        fs.mark_fs_block(block_no, "BOOT");
    }
    for &block_no in &catalog {
        fs.mark_fs_block(block_no, "CATALOG");
    }

    for extents in merge_extents(&directory) {
        let file = build_file(&mut fs, &layout, &extents);
        fs.claim_blocks(&file);
        fs.add_file(file);
    }

    let used: usize = fs.files().iter().map(|f| f.total_blocks()).sum();
    let first_data = layout.first_catalog + layout.catalog_blocks;
    let total = fs.reader().total_blocks();
    for block_no in first_data..total {
        if fs.reader().file_owner(block_no).is_none() {
            fs.reader_mut().set_block_type(block_no, BlockType::Empty, None);
        }
    }
    fs.set_free_blocks((total - first_data).saturating_sub(used));
    Ok(fs)
}

/// Group extents by user and name, each group sorted by extent number,
/// groups in directory order
fn merge_extents(directory: &[CpmDirEntry]) -> Vec<Vec<&CpmDirEntry>> {
    let mut files: HashMap<(u8, String), Vec<&CpmDirEntry>> = HashMap::new();
    let mut order = Vec::new();

    for entry in directory {
        let key = (entry.user, entry.filename_str());
        files
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(entry);
    }

    order
        .into_iter()
        .filter_map(|key| files.remove(&key))
        .map(|mut extents| {
            extents.sort_by_key(|e| e.extent_number());
            extents
        })
        .collect()
}

fn build_file(fs: &mut AppleFileSystem, layout: &Layout, extents: &[&CpmDirEntry]) -> AppleFile {
    let first = extents[0];
    let mut blocks = Vec::new();
    let mut bad_pointers = Vec::new();
    let mut records = 0;
    for extent in extents {
        for block_no in layout.pointers(&extent.allocation) {
            if fs.reader().is_valid_block(block_no) && !layout.catalog().contains(&block_no) {
                blocks.push(Some(block_no));
            } else {
                bad_pointers.push(block_no);
            }
        }
        records += extent.record_count as usize;
    }
    let block_size = fs.reader().block_size();

    let detail = CpmEntry {
        user: first.user,
        name: first.name(),
        extension: first.ext(),
        read_only: first.is_read_only(),
        system: first.is_system(),
        archive: first.is_archive(),
        extents: extents.iter().map(|e| e.extent_number()).collect(),
        records,
    };

    let mut file = AppleFile::new(fs.next_file_id(), first.filename_str(), FileKind::File)
        .with_blocks(blocks, block_size);
    file.eof = records * RECORD_SIZE;
    file.locked = detail.read_only;

    for block_no in bad_pointers {
        file.anomaly(format!("points at reserved or missing block {}", block_no));
    }
    if detail.extents.first() != Some(&0) {
        file.anomaly("orphaned extents: no extent 0");
    }
    if detail
        .extents
        .windows(2)
        .any(|pair| pair[1] != pair[0] + 1)
    {
        file.anomaly(format!("extent numbers not consecutive: {:?}", detail.extents));
    }
    if file.eof > file.data_blocks().len() * block_size {
        file.anomaly(format!(
            "{} records do not fit in {} blocks",
            records,
            file.data_blocks().len()
        ));
    }

    file.detail = FileDetail::Cpm(detail);
    file
}

/// One line of a directory listing: user, name, size and attributes
pub fn catalog_line(file: &AppleFile) -> String {
    match &file.detail {
        FileDetail::Cpm(entry) => format!(
            "{:>2}: {:<8}.{:<3} {:>5} {:>4}K {}",
            entry.user,
            entry.name,
            entry.extension,
            entry.records,
            file.total_blocks() * file.block_size / 1024,
            entry.attribute_text()
        ),
        _ => file.name.clone(),
    }
}
