/// Block records held by a block reader

/// Classification of a block for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// Free according to the file system's allocation map
    Empty,
    /// Neither free nor claimed by anything the catalog describes
    Orphan,
    /// File system structure (VTOC, catalog, bitmap, index blocks)
    FsData,
    /// File contents
    FileData,
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockType::Empty => write!(f, "Empty"),
            BlockType::Orphan => write!(f, "Orphan"),
            BlockType::FsData => write!(f, "FS Data"),
            BlockType::FileData => write!(f, "File Data"),
        }
    }
}

/// Identity of a file inside one file system, used as a block owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub usize);

/// One fixed-size unit of storage
#[derive(Debug, Clone)]
pub struct AppleBlock {
    /// Absolute block number
    pub block_no: usize,
    /// Track number (0 for formats without tracks)
    pub track_no: usize,
    /// Sector within the track
    pub sector_no: usize,
    /// Classification
    pub block_type: BlockType,
    /// Optional label such as "VTOC" or "INDEX"
    pub sub_type: Option<&'static str>,
    /// Local copy of the block contents, read on first access
    pub(crate) buffer: Option<Vec<u8>>,
    /// Has the local copy been modified?
    pub(crate) dirty: bool,
}

impl AppleBlock {
    /// Create a new block record
    pub fn new(block_no: usize, blocks_per_track: usize) -> Self {
        let (track_no, sector_no) = if blocks_per_track > 0 {
            (block_no / blocks_per_track, block_no % blocks_per_track)
        } else {
            (0, block_no)
        };
        Self {
            block_no,
            track_no,
            sector_no,
            block_type: BlockType::Orphan,
            sub_type: None,
            buffer: None,
            dirty: false,
        }
    }

    /// Is the local copy modified?
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Has the local copy been materialized?
    pub fn is_loaded(&self) -> bool {
        self.buffer.is_some()
    }

    /// Local copy of the block contents, if loaded
    pub fn data(&self) -> Option<&[u8]> {
        self.buffer.as_deref()
    }
}

impl std::fmt::Display for AppleBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Block {:>5} (T{:02}/S{:02}) {}",
            self.block_no, self.track_no, self.sector_no, self.block_type
        )?;
        if let Some(sub_type) = self.sub_type {
            write!(f, " [{}]", sub_type)?;
        }
        Ok(())
    }
}
