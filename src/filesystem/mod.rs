/// Filesystem implementations
///
/// Every parser produces an [`AppleFileSystem`]: a reader over the image plus
/// the tree of files its catalog describes.

/// Binary II archives
pub mod binary2;
/// CP/M 2.2 disks
pub mod cpm;
/// DOS 3.x and 4.x disks
pub mod dos;
/// GZIP streams
pub mod gzip;
/// CP/M LBR libraries
pub mod lbr;
/// NuFX (ShrinkIt) archives
pub mod nufx;
/// Apple Pascal volumes
pub mod pascal;
/// ProDOS volumes
pub mod prodos;
/// ZIP archives
pub mod zip;

use crate::error::{FsError, Result};
use crate::file::{AppleFile, FileKind, ForkType};
use crate::format::WrapperFormat;
use crate::image::{BlockReader, BlockType, FileId};
use log::warn;
use std::collections::HashSet;

/// Filesystem type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileSystemType {
    /// DOS 3.1/3.2 (13 sectors)
    Dos31,
    /// DOS 3.3 (16 or 32 sectors)
    Dos,
    /// DOS 4.x
    Dos4,
    /// ProDOS
    Prodos,
    /// Apple Pascal
    Pascal,
    /// CP/M
    Cpm,
    /// NuFX (ShrinkIt) archive
    Nufx,
    /// Binary II archive
    Binary2,
    /// LBR library
    Lbr,
    /// ZIP archive
    Zip,
    /// GZIP stream
    Gzip,
    /// Two file systems sharing one image
    Hybrid,
}

impl FileSystemType {
    /// Every concrete format the detector can try
    pub const ALL: [FileSystemType; 11] = [
        FileSystemType::Prodos,
        FileSystemType::Pascal,
        FileSystemType::Dos31,
        FileSystemType::Dos,
        FileSystemType::Dos4,
        FileSystemType::Cpm,
        FileSystemType::Lbr,
        FileSystemType::Nufx,
        FileSystemType::Binary2,
        FileSystemType::Zip,
        FileSystemType::Gzip,
    ];

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            FileSystemType::Dos31 => "DOS 3.1",
            FileSystemType::Dos => "DOS 3.3",
            FileSystemType::Dos4 => "DOS 4",
            FileSystemType::Prodos => "ProDOS",
            FileSystemType::Pascal => "Pascal",
            FileSystemType::Cpm => "CP/M",
            FileSystemType::Nufx => "NuFX",
            FileSystemType::Binary2 => "Binary II",
            FileSystemType::Lbr => "LBR",
            FileSystemType::Zip => "ZIP",
            FileSystemType::Gzip => "GZIP",
            FileSystemType::Hybrid => "Hybrid",
        }
    }

    /// Disk formats (as opposed to archives)
    pub fn is_disk(&self) -> bool {
        matches!(
            self,
            FileSystemType::Dos31
                | FileSystemType::Dos
                | FileSystemType::Dos4
                | FileSystemType::Prodos
                | FileSystemType::Pascal
                | FileSystemType::Cpm
        )
    }

    /// Formats that support `delete_file`
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            FileSystemType::Dos31
                | FileSystemType::Dos
                | FileSystemType::Prodos
                | FileSystemType::Pascal
        )
    }
}

impl std::fmt::Display for FileSystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Filesystem information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemInfo {
    /// Filesystem type
    pub fs_type: FileSystemType,
    /// Volume name or number
    pub volume_name: Option<String>,
    /// Total blocks on disk
    pub total_blocks: usize,
    /// Free blocks
    pub free_blocks: usize,
    /// Block size in bytes
    pub block_size: usize,
    /// Blocks holding the catalog
    pub catalog_blocks: usize,
    /// Number of top-level entries
    pub files: usize,
}

/// A catalog entry that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    /// Entry name, as far as it could be read
    pub name: String,
    /// What went wrong
    pub reason: String,
}

/// A parsed catalog over one block reader
#[derive(Debug, Clone)]
pub struct AppleFileSystem {
    name: String,
    fs_type: FileSystemType,
    reader: BlockReader,
    files: Vec<AppleFile>,
    file_systems: Vec<AppleFileSystem>,
    volume_name: Option<String>,
    free_blocks: usize,
    total_catalog_blocks: usize,
    part_of_hybrid: bool,
    wrapper: Option<WrapperFormat>,
    anomalies: Vec<String>,
    failures: Vec<FailedEntry>,
    deleted: Vec<String>,
    next_id: usize,
}

impl AppleFileSystem {
    /// Start an empty file system over a reader
    pub fn new(name: impl Into<String>, fs_type: FileSystemType, reader: BlockReader) -> Self {
        Self {
            name: name.into(),
            fs_type,
            reader,
            files: Vec::new(),
            file_systems: Vec::new(),
            volume_name: None,
            free_blocks: 0,
            total_catalog_blocks: 0,
            part_of_hybrid: false,
            wrapper: None,
            anomalies: Vec::new(),
            failures: Vec::new(),
            deleted: Vec::new(),
            next_id: 0,
        }
    }

    /// Wrap two file systems that share one image
    pub fn hybrid(
        name: impl Into<String>,
        reader: BlockReader,
        parts: Vec<AppleFileSystem>,
    ) -> Self {
        let mut fs = Self::new(name, FileSystemType::Hybrid, reader);
        fs.total_catalog_blocks = parts.iter().map(|p| p.total_catalog_blocks).sum();
        fs.free_blocks = parts.iter().map(|p| p.free_blocks).sum();
        fs.file_systems = parts
            .into_iter()
            .map(|mut part| {
                part.part_of_hybrid = true;
                part
            })
            .collect();
        fs
    }

    /// Allocate the next file identity
    pub fn next_file_id(&mut self) -> FileId {
        let id = FileId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Name of the image or archive
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filesystem type
    pub fn fs_type(&self) -> FileSystemType {
        self.fs_type
    }

    /// The block reader behind the catalog
    pub fn reader(&self) -> &BlockReader {
        &self.reader
    }

    /// Mutable access to the block reader
    pub fn reader_mut(&mut self) -> &mut BlockReader {
        &mut self.reader
    }

    /// Top-level entries
    pub fn files(&self) -> &[AppleFile] {
        &self.files
    }

    /// Nested file systems (hybrid halves)
    pub fn file_systems(&self) -> &[AppleFileSystem] {
        &self.file_systems
    }

    /// Volume name, if the format has one
    pub fn volume_name(&self) -> Option<&str> {
        self.volume_name.as_deref()
    }

    /// Free blocks according to the allocation map
    pub fn free_blocks(&self) -> usize {
        self.free_blocks
    }

    /// Blocks the catalog occupies
    pub fn total_catalog_blocks(&self) -> usize {
        self.total_catalog_blocks
    }

    /// Is this one half of a hybrid disk?
    pub fn is_part_of_hybrid(&self) -> bool {
        self.part_of_hybrid
    }

    /// Header that wrapped the image, if any
    pub fn wrapper(&self) -> Option<WrapperFormat> {
        self.wrapper
    }

    /// Recoverable problems found while parsing
    pub fn anomalies(&self) -> &[String] {
        &self.anomalies
    }

    /// Catalog entries that failed to parse
    pub fn failures(&self) -> &[FailedEntry] {
        &self.failures
    }

    /// Names of deleted entries still visible in the catalog
    pub fn deleted(&self) -> &[String] {
        &self.deleted
    }

    pub(crate) fn add_deleted(&mut self, name: impl Into<String>) {
        self.deleted.push(name.into());
    }

    pub(crate) fn add_file(&mut self, file: AppleFile) {
        self.files.push(file);
    }

    pub(crate) fn files_mut(&mut self) -> &mut Vec<AppleFile> {
        &mut self.files
    }

    pub(crate) fn file_systems_mut(&mut self) -> &mut Vec<AppleFileSystem> {
        &mut self.file_systems
    }

    pub(crate) fn set_volume_name(&mut self, name: impl Into<String>) {
        self.volume_name = Some(name.into());
    }

    pub(crate) fn set_free_blocks(&mut self, free: usize) {
        self.free_blocks = free;
    }

    pub(crate) fn set_catalog_blocks(&mut self, blocks: usize) {
        self.total_catalog_blocks = blocks;
    }

    pub(crate) fn set_wrapper(&mut self, wrapper: WrapperFormat) {
        self.wrapper = Some(wrapper);
    }

    pub(crate) fn anomaly(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}: {}", self.name, message);
        self.anomalies.push(message);
    }

    pub(crate) fn failed(&mut self, name: impl Into<String>, err: &FsError) {
        let name = name.into();
        warn!("{}: entry {} skipped: {}", self.name, name, err);
        self.failures.push(FailedEntry {
            name,
            reason: err.to_string(),
        });
    }

    /// Label a block as file system structure
    pub(crate) fn mark_fs_block(&mut self, block_no: usize, sub_type: &'static str) {
        self.reader
            .set_block_type(block_no, BlockType::FsData, Some(sub_type));
    }

    /// Record every block a file claims in the owner table
    pub(crate) fn claim_blocks(&mut self, file: &AppleFile) {
        for block_no in file.data_blocks().iter().flatten() {
            self.reader.set_file_owner(*block_no, file.id);
        }
        for &block_no in &file.index_blocks {
            self.reader.set_file_owner(block_no, file.id);
            self.reader
                .set_block_type(block_no, BlockType::FsData, Some("INDEX"));
        }
        for child in &file.children {
            self.claim_blocks(child);
        }
    }

    /// Filesystem information
    pub fn info(&self) -> FileSystemInfo {
        FileSystemInfo {
            fs_type: self.fs_type,
            volume_name: self.volume_name.clone(),
            total_blocks: self.reader.total_blocks(),
            free_blocks: self.free_blocks,
            block_size: self.reader.block_size(),
            catalog_blocks: self.total_catalog_blocks,
            files: self.files.len(),
        }
    }

    /// Depth-first walk over every entry
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a AppleFile, usize)) {
        for file in &self.files {
            file.walk(visit, 0);
        }
    }

    /// Find a file by path ("DIR/SUB/NAME"), ignoring case
    pub fn find_file(&self, path: &str) -> Option<&AppleFile> {
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        let first = parts.next()?;
        let mut current = self
            .files
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(first))?;
        for part in parts {
            current = current
                .children
                .iter()
                .find(|f| f.name.eq_ignore_ascii_case(part))?;
        }
        Some(current)
    }

    /// Read a file's exact contents (the data fork of a forked file)
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let file = self
            .find_file(path)
            .ok_or_else(|| FsError::FileNotFound(path.to_string()))?;
        self.read_entry(file)
    }

    /// Read the exact contents of a file from this file system
    pub fn read_entry(&self, file: &AppleFile) -> Result<Vec<u8>> {
        match file.kind {
            FileKind::Folder => Err(FsError::unsupported(format!(
                "{} is a folder",
                file.name
            ))),
            FileKind::Forked => {
                let data = file.fork(ForkType::Data).ok_or_else(|| {
                    FsError::unsupported(format!("{} has no data fork", file.name))
                })?;
                Ok(data.file_buffer(&self.reader).to_vec())
            }
            _ => Ok(file.file_buffer(&self.reader).to_vec()),
        }
    }

    /// Delete a file and mark the changed catalog blocks dirty
    pub fn delete_file(&mut self, path: &str) -> Result<()> {
        let file = self
            .find_file(path)
            .ok_or_else(|| FsError::FileNotFound(path.to_string()))?
            .clone();
        match self.fs_type {
            FileSystemType::Dos31 | FileSystemType::Dos => dos::delete(self, &file)?,
            FileSystemType::Prodos => prodos::delete(self, &file)?,
            FileSystemType::Pascal => pascal::delete(self, &file)?,
            other => {
                return Err(FsError::unsupported(format!(
                    "{} is read-only",
                    other
                )))
            }
        }
        remove_entry(&mut self.files, file.id);
        Ok(())
    }

    /// Write dirty blocks back to the image, returning how many were written.
    /// Files holding a rewritten block drop their cached buffers.
    pub fn flush(&mut self) -> usize {
        let dirty: HashSet<usize> = self.reader.dirty_blocks().collect();
        if !dirty.is_empty() {
            for file in &mut self.files {
                invalidate_touched(file, &dirty);
            }
        }
        self.reader.flush()
    }

    /// Flush and return the image bytes
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.flush();
        self.reader.into_disk().to_vec()
    }
}

fn invalidate_touched(file: &mut AppleFile, dirty: &HashSet<usize>) {
    if file.data_blocks().iter().flatten().any(|b| dirty.contains(b)) {
        file.invalidate();
    }
    for child in &mut file.children {
        invalidate_touched(child, dirty);
    }
}

fn remove_entry(files: &mut Vec<AppleFile>, id: FileId) -> bool {
    if let Some(pos) = files.iter().position(|f| f.id == id) {
        files.remove(pos);
        return true;
    }
    files
        .iter_mut()
        .any(|f| remove_entry(&mut f.children, id))
}

/// Place a file under its folder path, creating folders as needed
pub(crate) fn insert_path(
    fs: &mut AppleFileSystem,
    files: &mut Vec<AppleFile>,
    folders: &[&str],
    file: AppleFile,
) {
    let Some((first, rest)) = folders.split_first() else {
        match files
            .iter_mut()
            .find(|f| f.is_folder() && file.is_folder() && f.name == file.name)
        {
            // A folder created implicitly earlier picks up the record's details
            Some(existing) => {
                existing.detail = file.detail;
                existing.created = file.created;
                existing.modified = file.modified;
            }
            None => files.push(file),
        }
        return;
    };
    let index = match files.iter().position(|f| f.is_folder() && f.name == *first) {
        Some(index) => index,
        None => {
            files.push(AppleFile::new(fs.next_file_id(), *first, FileKind::Folder));
            files.len() - 1
        }
    };
    insert_path(fs, &mut files[index].children, rest, file);
}

/// Trim trailing spaces and clear high bits from an Apple name
pub(crate) fn apple_name(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b & 0x7F {
            c @ 0x20..=0x7E => c as char,
            _ => '.',
        })
        .collect::<String>()
        .trim_end()
        .to_string()
}
