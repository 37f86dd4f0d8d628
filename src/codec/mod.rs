/// Decompression transforms used by archive formats
///
/// Each NuFX thread names its compression format. Formats map to a
/// [`Decompressor`] through a [`CodecRegistry`]; formats without a registered
/// codec yield no data rather than an error.

/// ShrinkIt LZW/1 and LZW/2
pub mod lzw;
/// Huffman "squeeze" (SQ) with run-length encoding
pub mod squeeze;

use crate::error::Result;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

/// Compression format code carried by a NuFX thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadFormat {
    /// Stored
    Uncompressed,
    /// Huffman squeeze
    Squeeze,
    /// Dynamic LZW/1 (ShrinkIt)
    Lzw1,
    /// Dynamic LZW/2 (ShrinkIt GS)
    Lzw2,
    /// Unix 12-bit compress
    Unix12,
    /// Unix 16-bit compress
    Unix16,
    /// Anything else
    Unknown(u16),
}

impl From<u16> for ThreadFormat {
    fn from(value: u16) -> Self {
        match value {
            0 => ThreadFormat::Uncompressed,
            1 => ThreadFormat::Squeeze,
            2 => ThreadFormat::Lzw1,
            3 => ThreadFormat::Lzw2,
            4 => ThreadFormat::Unix12,
            5 => ThreadFormat::Unix16,
            other => ThreadFormat::Unknown(other),
        }
    }
}

impl std::fmt::Display for ThreadFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreadFormat::Uncompressed => write!(f, "Uncompr"),
            ThreadFormat::Squeeze => write!(f, "Squeeze"),
            ThreadFormat::Lzw1 => write!(f, "LZW/1"),
            ThreadFormat::Lzw2 => write!(f, "LZW/2"),
            ThreadFormat::Unix12 => write!(f, "Unix/12"),
            ThreadFormat::Unix16 => write!(f, "Unix/16"),
            ThreadFormat::Unknown(code) => write!(f, "Fmt ${:04X}", code),
        }
    }
}

/// A byte-in/byte-out expansion
pub trait Decompressor: Send + Sync {
    /// Expand `input` into at most `length` bytes
    fn decompress(&self, input: &[u8], length: usize) -> Result<Vec<u8>>;
}

/// Stored data, truncated to the declared length
#[derive(Debug, Clone, Copy, Default)]
pub struct Stored;

impl Decompressor for Stored {
    fn decompress(&self, input: &[u8], length: usize) -> Result<Vec<u8>> {
        Ok(input[..length.min(input.len())].to_vec())
    }
}

/// Maps thread formats to decompressors
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<ThreadFormat, Arc<dyn Decompressor>>,
}

impl CodecRegistry {
    /// A registry with no codecs at all
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// A registry with the codecs ShrinkIt archives use
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(ThreadFormat::Uncompressed, Stored);
        registry.register(ThreadFormat::Squeeze, squeeze::Squeeze);
        registry.register(ThreadFormat::Lzw1, lzw::Lzw1);
        registry.register(ThreadFormat::Lzw2, lzw::Lzw2);
        registry
    }

    /// Register (or replace) the codec for a format
    pub fn register<D: Decompressor + 'static>(&mut self, format: ThreadFormat, codec: D) {
        self.codecs.insert(format, Arc::new(codec));
    }

    /// Is there a codec for this format?
    pub fn supports(&self, format: ThreadFormat) -> bool {
        self.codecs.contains_key(&format)
    }

    /// Expand a thread. `Ok(None)` means no codec is registered for the format.
    pub fn decompress(
        &self,
        format: ThreadFormat,
        input: &[u8],
        length: usize,
    ) -> Result<Option<Vec<u8>>> {
        match self.codecs.get(&format) {
            Some(codec) => codec.decompress(input, length).map(Some),
            None => {
                debug!("no codec for thread format {}", format);
                Ok(None)
            }
        }
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut formats: Vec<String> = self.codecs.keys().map(|k| k.to_string()).collect();
        formats.sort();
        f.debug_struct("CodecRegistry")
            .field("formats", &formats)
            .finish()
    }
}

/// CRC-16/XMODEM (polynomial 0x1021, seed supplied by the caller)
pub fn crc16(seed: u16, data: &[u8]) -> u16 {
    let mut crc = seed;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
