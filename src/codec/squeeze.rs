/// Huffman squeeze decoder
///
/// Stream layout: optional SQ header (magic 0xFF76, checksum, NUL-terminated
/// name), node count, node table of signed child pairs, then an LSB-first
/// bit stream. Decoded bytes are run-length expanded with DLE 0x90.

use crate::codec::Decompressor;
use crate::error::{FsError, Result};

/// Magic number at the start of a standalone .?Q? file
pub const SQ_MAGIC: u16 = 0xFF76;

const SPEOF: usize = 256;
const DLE: u8 = 0x90;
const MAX_NODES: usize = 257;

/// Header of a standalone squeezed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqueezeHeader {
    /// Sum of the unsqueezed bytes
    pub checksum: u16,
    /// Original file name
    pub file_name: String,
}

/// Squeeze codec registered for NuFX threads
#[derive(Debug, Clone, Copy, Default)]
pub struct Squeeze;

impl Decompressor for Squeeze {
    fn decompress(&self, input: &[u8], length: usize) -> Result<Vec<u8>> {
        let start = match parse_header(input) {
            Some((_, size)) => size,
            None => 0,
        };
        unsqueeze(&input[start..], Some(length))
    }
}

/// Does the data start with a standalone SQ header?
pub fn has_header(data: &[u8]) -> bool {
    data.len() >= 4 && u16::from_le_bytes([data[0], data[1]]) == SQ_MAGIC
}

/// Parse a standalone SQ header, returning it with its size in bytes
pub fn parse_header(data: &[u8]) -> Option<(SqueezeHeader, usize)> {
    if !has_header(data) {
        return None;
    }
    let checksum = u16::from_le_bytes([data[2], data[3]]);
    let name_end = data[4..].iter().position(|&b| b == 0)? + 4;
    let file_name = String::from_utf8_lossy(&data[4..name_end]).to_string();
    Some((
        SqueezeHeader {
            checksum,
            file_name,
        },
        name_end + 1,
    ))
}

/// Expand a squeezed stream (without header), stopping at `limit` bytes if given
pub fn unsqueeze(data: &[u8], limit: Option<usize>) -> Result<Vec<u8>> {
    if data.len() < 2 {
        return Err(FsError::decompression("squeeze stream too short"));
    }
    let node_count = u16::from_le_bytes([data[0], data[1]]) as usize;
    if node_count > MAX_NODES {
        return Err(FsError::decompression(format!(
            "squeeze tree has {} nodes",
            node_count
        )));
    }
    let table_end = 2 + node_count * 4;
    if data.len() < table_end {
        return Err(FsError::decompression("squeeze tree truncated"));
    }

    let nodes: Vec<[i16; 2]> = data[2..table_end]
        .chunks_exact(4)
        .map(|c| {
            [
                i16::from_le_bytes([c[0], c[1]]),
                i16::from_le_bytes([c[2], c[3]]),
            ]
        })
        .collect();

    let mut rle = RunLength::default();
    let mut out = Vec::new();
    let limit = limit.unwrap_or(usize::MAX);

    if nodes.is_empty() {
        return Ok(out);
    }

    let mut node = 0usize;
    'bits: for &byte in &data[table_end..] {
        for bit in 0..8 {
            let child = nodes[node][((byte >> bit) & 1) as usize];
            if child >= 0 {
                node = child as usize;
                if node >= nodes.len() {
                    return Err(FsError::decompression("squeeze node out of range"));
                }
                continue;
            }
            let value = (-(child as i32 + 1)) as usize;
            if value == SPEOF {
                break 'bits;
            }
            rle.push(value as u8, &mut out);
            if out.len() >= limit {
                break 'bits;
            }
            node = 0;
        }
    }

    out.truncate(limit);
    Ok(out)
}

/// DLE 0x90 run-length expansion state
#[derive(Debug, Default)]
struct RunLength {
    last: u8,
    escaped: bool,
}

impl RunLength {
    fn push(&mut self, byte: u8, out: &mut Vec<u8>) {
        if self.escaped {
            self.escaped = false;
            if byte == 0 {
                out.push(DLE);
                self.last = DLE;
            } else {
                for _ in 1..byte {
                    out.push(self.last);
                }
            }
        } else if byte == DLE {
            self.escaped = true;
        } else {
            out.push(byte);
            self.last = byte;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tree with two leaves: bit 0 -> 'A', bit 1 -> node 1; node 1: 0 -> 'B', 1 -> EOF
    fn small_tree() -> Vec<u8> {
        let leaf = |v: i16| (-(v + 1)).to_le_bytes();
        let mut data = vec![2, 0];
        data.extend_from_slice(&leaf(b'A' as i16));
        data.extend_from_slice(&1i16.to_le_bytes());
        data.extend_from_slice(&leaf(b'B' as i16));
        data.extend_from_slice(&leaf(SPEOF as i16));
        data
    }

    #[test]
    fn test_unsqueeze_simple() {
        // A(0) B(10) A(0) EOF(11), LSB first: bits 0,1,0,0,1,1 -> 0b110010
        let mut data = small_tree();
        data.push(0b0011_0010);
        assert_eq!(unsqueeze(&data, None).unwrap(), b"ABA");
    }

    #[test]
    fn test_unsqueeze_limit() {
        let mut data = small_tree();
        data.push(0b0011_0010);
        assert_eq!(unsqueeze(&data, Some(2)).unwrap(), b"AB");
    }

    #[test]
    fn test_run_length_expansion() {
        let mut rle = RunLength::default();
        let mut out = Vec::new();
        for byte in [b'X', DLE, 4, DLE, 0, b'Y'] {
            rle.push(byte, &mut out);
        }
        assert_eq!(out, vec![b'X', b'X', b'X', b'X', DLE, b'Y']);
    }

    #[test]
    fn test_header() {
        let mut data = vec![0x76, 0xFF, 0x34, 0x12];
        data.extend_from_slice(b"README.TXT\0");
        data.extend_from_slice(&small_tree());
        data.push(0b0011_0010);

        let (header, size) = parse_header(&data).unwrap();
        assert_eq!(header.file_name, "README.TXT");
        assert_eq!(header.checksum, 0x1234);
        assert_eq!(size, 15);
        assert_eq!(Squeeze.decompress(&data, 100).unwrap(), b"ABA");
    }

    #[test]
    fn test_rejects_truncated_tree() {
        assert!(unsqueeze(&[5, 0, 1, 2], None).is_err());
        assert!(unsqueeze(&[0xFF, 0xFF], None).is_err());
    }
}
