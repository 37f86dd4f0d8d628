/*!
# applefs

A Rust library for reading Apple II disk images and archives.

## Features

- DOS 3.1/3.2/3.3/4.x, ProDOS, Apple Pascal and CP/M disk catalogs
- NuFX (ShrinkIt), Binary II, LBR, ZIP and GZIP archives
- 2IMG and DiskCopy 4.2 wrappers, WOZ images through a pluggable nibble decoder
- Interleaved block addressing with lazy block caching and dirty tracking
- Forked files, sparse and random-access text files, embedded file systems
- Deleting files on DOS, ProDOS and Pascal disks with write-back

## Quick Start

```rust,no_run
use applefs::{FormatDetector, catalog};

let detector = FormatDetector::new();
let found = detector.open("disk.po")?;

if let Some(fs) = applefs::detect::resolve(found) {
    println!("{}", catalog::catalog(&fs));

    // Read a file
    let contents = fs.read_file("STARTUP")?;
    println!("{} bytes", contents.len());
}
# Ok::<(), applefs::FsError>(())
```

## Modules

- `buffer`: shared immutable byte views
- `image`: block addressing, interleave and the block cache
- `format`: disk image wrappers (2IMG, DiskCopy, WOZ)
- `codec`: NuFX and LBR decompression
- `filesystem`: per-format catalog parsers
- `file`: the uniform file model
- `detect`: format detection
- `catalog`: listings, trees and block maps
- `applesoft`: Applesoft BASIC lister
- `error`: Error types and Result alias
*/

#![warn(missing_docs)]

/// Applesoft BASIC program lister
pub mod applesoft;
/// Shared immutable byte views
pub mod buffer;
/// Catalog listings, file trees and block maps
pub mod catalog;
/// Decompression codecs and CRC
pub mod codec;
/// Format detection
pub mod detect;
/// Error types and Result alias
pub mod error;
/// Uniform file model
pub mod file;
/// Filesystem implementations
pub mod filesystem;
/// Disk image wrapper formats
pub mod format;
/// Block addressing and caching
pub mod image;

// Re-export common types
pub use buffer::Buffer;
pub use codec::{CodecRegistry, Decompressor, ThreadFormat};
pub use detect::{FormatDetector, FormatDetectorBuilder};
pub use error::{FsError, Result};
pub use file::{AppleFile, FileContent, FileDetail, FileKind, ForkType, TextBlock, TextLayout};
pub use filesystem::{AppleFileSystem, FailedEntry, FileSystemInfo, FileSystemType};
pub use format::{NibbleDecoder, WrapperFormat};
pub use image::{
    AddressType, AppleBlock, BlockCopier, BlockReader, BlockType, DiskParameters, FileId,
};
