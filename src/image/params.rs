/// Disk geometry descriptors and presets

use crate::error::{FsError, Result};
use crate::image::copier::INTERLEAVE;

/// Size of one physical Apple II sector
pub const SECTOR_SIZE: usize = 256;

/// How blocks on a reader are addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    /// Blocks are addressed by block number only
    Block,
    /// Blocks are 256-byte sectors addressed by track and sector
    Sector,
}

/// Geometry used to cut a flat buffer into blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskParameters {
    /// Bytes in one logical block
    pub bytes_per_block: usize,
    /// Interleave scheme index (0 = none)
    pub interleave: usize,
    /// Logical blocks in one track (0 for formats without tracks)
    pub blocks_per_track: usize,
}

impl DiskParameters {
    /// Create and validate disk parameters
    pub fn new(bytes_per_block: usize, interleave: usize, blocks_per_track: usize) -> Result<Self> {
        let params = Self {
            bytes_per_block,
            interleave,
            blocks_per_track,
        };
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<()> {
        if self.bytes_per_block == 0 {
            return Err(FsError::InvalidParameters("block size of zero".into()));
        }
        if self.interleave >= INTERLEAVE.len() {
            return Err(FsError::InvalidParameters(format!(
                "unknown interleave {}",
                self.interleave
            )));
        }
        if self.interleave > 0 {
            if self.bytes_per_block % SECTOR_SIZE != 0 {
                return Err(FsError::InvalidParameters(format!(
                    "interleaved block size {} is not a whole number of sectors",
                    self.bytes_per_block
                )));
            }
            if self.sectors_per_track() != INTERLEAVE[0].len() {
                return Err(FsError::InvalidParameters(format!(
                    "interleave {} needs 16 sectors per track, geometry gives {}",
                    self.interleave,
                    self.sectors_per_track()
                )));
            }
        }
        Ok(())
    }

    /// DOS 3.3 on a 16-sector disk
    pub fn dos33(interleave: usize) -> Self {
        Self {
            bytes_per_block: SECTOR_SIZE,
            interleave,
            blocks_per_track: 16,
        }
    }

    /// DOS 3.1/3.2 on a 13-sector disk
    pub fn dos31() -> Self {
        Self {
            bytes_per_block: SECTOR_SIZE,
            interleave: 0,
            blocks_per_track: 13,
        }
    }

    /// One half of a UniDOS 800K disk (50 tracks of 32 sectors)
    pub fn unidos() -> Self {
        Self {
            bytes_per_block: SECTOR_SIZE,
            interleave: 0,
            blocks_per_track: 32,
        }
    }

    /// ProDOS or Pascal 512-byte blocks
    pub fn prodos(interleave: usize) -> Self {
        Self {
            bytes_per_block: 512,
            interleave,
            blocks_per_track: 8,
        }
    }

    /// CP/M on a 140K disk (1K blocks, CP/M sector skew)
    pub fn cpm() -> Self {
        Self {
            bytes_per_block: 1024,
            interleave: 2,
            blocks_per_track: 4,
        }
    }

    /// CP/M on an 800K disk
    pub fn cpm_800() -> Self {
        Self {
            bytes_per_block: 1024,
            interleave: 0,
            blocks_per_track: 8,
        }
    }

    /// 128-byte records used by Binary II and LBR
    pub fn records() -> Self {
        Self {
            bytes_per_block: 128,
            interleave: 0,
            blocks_per_track: 0,
        }
    }

    /// A whole stream treated as a single block
    pub fn stream(length: usize) -> Self {
        Self {
            bytes_per_block: length.max(1),
            interleave: 0,
            blocks_per_track: 0,
        }
    }

    /// Sectors in one block
    pub fn sectors_per_block(&self) -> usize {
        (self.bytes_per_block / SECTOR_SIZE).max(1)
    }

    /// Physical sectors in one track
    pub fn sectors_per_track(&self) -> usize {
        self.blocks_per_track * self.sectors_per_block()
    }

    /// Bytes in one track
    pub fn bytes_per_track(&self) -> usize {
        self.blocks_per_track * self.bytes_per_block
    }

    /// Addressing mode implied by the block size
    pub fn address_type(&self) -> AddressType {
        if self.bytes_per_block == SECTOR_SIZE && self.blocks_per_track > 0 {
            AddressType::Sector
        } else {
            AddressType::Block
        }
    }

    /// Number of blocks needed to cover `length` bytes
    pub fn total_blocks(&self, length: usize) -> usize {
        length.div_ceil(self.bytes_per_block)
    }
}

impl std::fmt::Display for DiskParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} bytes/block, interleave {}, {} blocks/track",
            self.bytes_per_block, self.interleave, self.blocks_per_track
        )
    }
}
