/// Block addressing layer

/// Block records and classifications
pub mod block;
/// Interleave tables and copy strategies
pub mod copier;
/// Disk geometry descriptors
pub mod params;
/// Block reader with cache and dirty tracking
pub mod reader;

pub use block::{AppleBlock, BlockType, FileId};
pub use copier::{BlockCopier, INTERLEAVE};
pub use params::{AddressType, DiskParameters, SECTOR_SIZE};
pub use reader::BlockReader;
