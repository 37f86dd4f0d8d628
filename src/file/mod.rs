/// Uniform file model over every supported format
///
/// A file is a tagged [`FileKind`] with format-specific payload held in
/// [`FileDetail`]. Block lists refer to blocks of the owning file system's
/// reader; `None` entries are sparse gaps that read as zeros.

/// Random-access text detection
pub mod text;

pub use text::{TextBlock, TextLayout, TextRecord};

use crate::buffer::Buffer;
use crate::error::{FsError, Result};
use crate::filesystem::binary2::Binary2Entry;
use crate::filesystem::cpm::CpmEntry;
use crate::filesystem::dos::DosEntry;
use crate::filesystem::lbr::LbrEntry;
use crate::filesystem::nufx::NufxEntry;
use crate::filesystem::pascal::PascalEntry;
use crate::filesystem::prodos::ProdosEntry;
use crate::filesystem::AppleFileSystem;
use crate::image::{BlockReader, FileId};
use chrono::NaiveDateTime;
use std::cell::OnceCell;

/// Which stream of a forked file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkType {
    /// Data fork
    Data,
    /// Resource fork
    Resource,
}

impl std::fmt::Display for ForkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForkType::Data => write!(f, "DATA"),
            ForkType::Resource => write!(f, "RESOURCE"),
        }
    }
}

/// Shape of a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Ordinary file
    File,
    /// One fork of a forked file
    Fork(ForkType),
    /// Directory
    Folder,
    /// Container of a data fork and a resource fork
    Forked,
    /// Wrapper around a whole disk image (NuFX disk thread)
    Embedded,
}

/// Where a file's bytes come from
#[derive(Debug, Clone, PartialEq)]
pub enum FileContent {
    /// Blocks of the owning reader, in file order
    Blocks(Vec<Option<usize>>),
    /// Bytes already extracted (archives, decompressed threads)
    Bytes(Buffer),
    /// Nothing readable (folders, threads without a codec)
    None,
}

/// Format-specific catalog entry behind a file
#[derive(Debug, Clone, PartialEq)]
pub enum FileDetail {
    /// DOS 3.x catalog entry
    Dos(DosEntry),
    /// ProDOS directory entry
    Prodos(ProdosEntry),
    /// Pascal directory entry
    Pascal(PascalEntry),
    /// Merged CP/M extents
    Cpm(CpmEntry),
    /// NuFX record
    Nufx(NufxEntry),
    /// Binary II header
    Binary2(Binary2Entry),
    /// LBR directory entry
    Lbr(LbrEntry),
    /// ZIP or GZIP member
    Archive {
        /// Stored (compressed) size
        compressed_size: u64,
        /// Compression method name
        method: String,
    },
    /// Synthetic entry with nothing behind it
    None,
}

/// A file, fork, folder or embedded image inside a file system
#[derive(Debug, Clone)]
pub struct AppleFile {
    /// Identity within the owning file system
    pub id: FileId,
    /// Name as shown in the catalog
    pub name: String,
    /// Entry shape
    pub kind: FileKind,
    /// Format-specific entry
    pub detail: FileDetail,
    /// Data source
    pub content: FileContent,
    /// Size of the blocks in `content`
    pub block_size: usize,
    /// Index, track/sector-list or extent blocks
    pub index_blocks: Vec<usize>,
    /// Sparse blocks dropped from the end of the block list but still inside the EOF
    pub trailing_gaps: usize,
    /// Declared or inferred length in bytes
    pub eof: usize,
    /// Bytes to skip at the start of the raw buffer (length words, load addresses)
    pub data_offset: usize,
    /// Auxiliary type (load address, record length)
    pub aux_type: u16,
    /// Locked / read-only flag
    pub locked: bool,
    /// Creation time
    pub created: Option<NaiveDateTime>,
    /// Modification time
    pub modified: Option<NaiveDateTime>,
    /// Folder entries or forks
    pub children: Vec<AppleFile>,
    /// File systems found inside this file
    pub file_systems: Vec<AppleFileSystem>,
    /// Random-access layout, set for fixed-record text files
    pub text: Option<TextLayout>,
    /// Recoverable problems noticed while parsing
    pub anomalies: Vec<String>,
    raw: OnceCell<Buffer>,
    exact: OnceCell<Buffer>,
}

impl PartialEq for AppleFile {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.detail == other.detail
            && self.content == other.content
            && self.index_blocks == other.index_blocks
            && self.trailing_gaps == other.trailing_gaps
            && self.eof == other.eof
            && self.data_offset == other.data_offset
            && self.aux_type == other.aux_type
            && self.children == other.children
            && self.file_systems.len() == other.file_systems.len()
    }
}

impl AppleFile {
    /// Create an empty entry
    pub fn new(id: FileId, name: impl Into<String>, kind: FileKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            detail: FileDetail::None,
            content: FileContent::None,
            block_size: 0,
            index_blocks: Vec::new(),
            trailing_gaps: 0,
            eof: 0,
            data_offset: 0,
            aux_type: 0,
            locked: false,
            created: None,
            modified: None,
            children: Vec::new(),
            file_systems: Vec::new(),
            text: None,
            anomalies: Vec::new(),
            raw: OnceCell::new(),
            exact: OnceCell::new(),
        }
    }

    /// Set a block list as the content
    pub fn with_blocks(mut self, blocks: Vec<Option<usize>>, block_size: usize) -> Self {
        self.eof = blocks.len() * block_size;
        self.content = FileContent::Blocks(blocks);
        self.block_size = block_size;
        self
    }

    /// Set extracted bytes as the content
    pub fn with_bytes(mut self, bytes: Buffer) -> Self {
        self.eof = bytes.len();
        self.content = FileContent::Bytes(bytes);
        self
    }

    /// Data blocks in file order (empty for byte content)
    pub fn data_blocks(&self) -> &[Option<usize>] {
        match &self.content {
            FileContent::Blocks(blocks) => blocks,
            _ => &[],
        }
    }

    /// Number of sparse holes, including those past the last allocated block
    pub fn file_gaps(&self) -> usize {
        self.interior_gaps() + self.trailing_gaps
    }

    fn interior_gaps(&self) -> usize {
        self.data_blocks().iter().filter(|b| b.is_none()).count()
    }

    /// Blocks actually allocated: data blocks less gaps, plus index blocks
    pub fn total_blocks(&self) -> usize {
        self.data_blocks().len() - self.interior_gaps() + self.index_blocks.len()
    }

    /// Declared length in bytes
    pub fn file_length(&self) -> usize {
        self.eof
    }

    /// Concatenation of every data block, gaps (trailing ones too) zero-filled
    pub fn raw_file_buffer(&self, reader: &BlockReader) -> &Buffer {
        self.raw.get_or_init(|| match &self.content {
            FileContent::Blocks(blocks) => {
                let length = (blocks.len() + self.trailing_gaps) * self.block_size;
                let mut data = Vec::with_capacity(length);
                for block in blocks {
                    match block {
                        Some(block_no) => data.extend_from_slice(&reader.read(*block_no)),
                        None => data.resize(data.len() + self.block_size, 0),
                    }
                }
                data.resize(length, 0);
                Buffer::new(data)
            }
            FileContent::Bytes(bytes) => bytes.clone(),
            FileContent::None => Buffer::empty(),
        })
    }

    /// Raw buffer trimmed to the file's data offset and EOF
    pub fn file_buffer(&self, reader: &BlockReader) -> &Buffer {
        self.exact.get_or_init(|| {
            self.raw_file_buffer(reader)
                .slice_clamped(self.data_offset, self.eof)
        })
    }

    /// Seed the raw buffer cache with bytes already read during parsing
    pub(crate) fn prime_raw(&self, raw: Buffer) {
        let _ = self.raw.set(raw);
    }

    /// Drop both cached buffers
    pub(crate) fn invalidate(&mut self) {
        self.raw = OnceCell::new();
        self.exact = OnceCell::new();
    }

    /// Which fork this is
    pub fn fork_type(&self) -> Result<ForkType> {
        match self.kind {
            FileKind::Fork(fork) => Ok(fork),
            _ => Err(FsError::unsupported(format!(
                "{} is not a fork",
                self.name
            ))),
        }
    }

    /// A specific fork of a forked file
    pub fn fork(&self, fork: ForkType) -> Option<&AppleFile> {
        self.children
            .iter()
            .find(|child| child.kind == FileKind::Fork(fork))
    }

    /// Folder, forked file or holder of embedded file systems
    pub fn is_container(&self) -> bool {
        matches!(self.kind, FileKind::Folder | FileKind::Forked) || !self.file_systems.is_empty()
    }

    /// Is this a folder?
    pub fn is_folder(&self) -> bool {
        self.kind == FileKind::Folder
    }

    /// Is this a fixed-record text file?
    pub fn is_random_access(&self) -> bool {
        self.text.as_ref().is_some_and(|t| t.random_access)
    }

    /// Record an anomaly
    pub fn anomaly(&mut self, message: impl Into<String>) {
        self.anomalies.push(message.into());
    }

    /// Short file type text for listings
    pub fn type_text(&self) -> String {
        match &self.detail {
            FileDetail::Dos(entry) => entry.file_type.letter().to_string(),
            FileDetail::Prodos(entry) => crate::filesystem::prodos::type_name(entry.file_type),
            FileDetail::Pascal(entry) => entry.kind.to_string(),
            FileDetail::Cpm(entry) => entry.type_text(),
            FileDetail::Nufx(entry) => crate::filesystem::prodos::type_name(entry.file_type as u8),
            FileDetail::Binary2(entry) => crate::filesystem::prodos::type_name(entry.file_type),
            FileDetail::Lbr(_) | FileDetail::Archive { .. } | FileDetail::None => {
                match self.kind {
                    FileKind::Folder => "DIR".to_string(),
                    FileKind::Forked => "FRK".to_string(),
                    _ => String::new(),
                }
            }
        }
    }

    /// Depth-first walk over this file and its children
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a AppleFile, usize), depth: usize) {
        visit(self, depth);
        for child in &self.children {
            child.walk(visit, depth + 1);
        }
    }
}
