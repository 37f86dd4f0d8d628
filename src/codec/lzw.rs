/// ShrinkIt dynamic LZW decoders
///
/// Both variants split the uncompressed stream into 4096-byte chunks. Each
/// chunk is optionally run-length encoded and then optionally LZW compressed.
/// LZW/1 starts every chunk with a fresh table; LZW/2 keeps the table across
/// chunks and only clears it on a clear code or a stored chunk.

use crate::codec::{crc16, Decompressor};
use crate::error::{FsError, Result};
use log::debug;

/// Uncompressed size of one chunk
pub const CHUNK_SIZE: usize = 4096;

const CLEAR_CODE: u16 = 0x100;
const FIRST_CODE: u16 = 0x101;
const MAX_CODES: usize = 4096;

/// LZW/1 (ShrinkIt 8-bit)
#[derive(Debug, Clone, Copy, Default)]
pub struct Lzw1;

/// LZW/2 (ShrinkIt GS)
#[derive(Debug, Clone, Copy, Default)]
pub struct Lzw2;

impl Decompressor for Lzw1 {
    fn decompress(&self, input: &[u8], length: usize) -> Result<Vec<u8>> {
        if input.len() < 4 {
            return Err(FsError::decompression("LZW/1 header truncated"));
        }
        let expected_crc = u16::from_le_bytes([input[0], input[1]]);
        let escape = input[3];
        let mut pos = 4;
        let mut out = Vec::with_capacity(length + CHUNK_SIZE);
        let mut table = LzwTable::new();

        while out.len() < length && pos + 3 <= input.len() {
            let rle_len = u16::from_le_bytes([input[pos], input[pos + 1]]) as usize;
            let lzw = input[pos + 2] != 0;
            pos += 3;

            let chunk = if lzw {
                table.reset();
                let mut bits = BitReader::new(&input[pos..]);
                let chunk = table.expand(&mut bits, rle_len)?;
                pos += bits.bytes_consumed();
                chunk
            } else {
                let chunk = take(input, pos, rle_len)?;
                pos += rle_len;
                chunk
            };
            out.extend_from_slice(&expand_chunk(&chunk, rle_len, escape));
        }

        let actual_crc = crc16(0, &out);
        if actual_crc != expected_crc {
            return Err(FsError::decompression(format!(
                "LZW/1 CRC mismatch: stored ${:04X}, computed ${:04X}",
                expected_crc, actual_crc
            )));
        }
        out.truncate(length);
        Ok(out)
    }
}

impl Decompressor for Lzw2 {
    fn decompress(&self, input: &[u8], length: usize) -> Result<Vec<u8>> {
        if input.len() < 2 {
            return Err(FsError::decompression("LZW/2 header truncated"));
        }
        let escape = input[1];
        let mut pos = 2;
        let mut out = Vec::with_capacity(length + CHUNK_SIZE);
        let mut table = LzwTable::new();

        while out.len() < length && pos + 2 <= input.len() {
            let header = u16::from_le_bytes([input[pos], input[pos + 1]]);
            let rle_len = (header & 0x1FFF) as usize;
            let lzw = header & 0x8000 != 0;
            pos += 2;

            let chunk = if lzw {
                let total = match input.get(pos..pos + 2) {
                    Some(b) => u16::from_le_bytes([b[0], b[1]]) as usize,
                    None => return Err(FsError::decompression("LZW/2 chunk length truncated")),
                };
                pos += 2;
                if total < 4 {
                    return Err(FsError::decompression(format!(
                        "LZW/2 chunk length {} too small",
                        total
                    )));
                }
                let end = (pos + total - 4).min(input.len());
                let mut bits = BitReader::new(&input[pos..end]);
                let chunk = table.expand(&mut bits, rle_len)?;
                pos = end;
                chunk
            } else {
                table.reset();
                let chunk = take(input, pos, rle_len)?;
                pos += rle_len;
                chunk
            };
            out.extend_from_slice(&expand_chunk(&chunk, rle_len, escape));
        }

        if out.len() < length {
            debug!("LZW/2 stream ended after {} of {} bytes", out.len(), length);
        }
        out.truncate(length);
        Ok(out)
    }
}

fn take(input: &[u8], pos: usize, len: usize) -> Result<Vec<u8>> {
    input
        .get(pos..pos + len)
        .map(|s| s.to_vec())
        .ok_or_else(|| FsError::decompression("stored chunk truncated"))
}

/// Undo the per-chunk RLE pass. A chunk whose RLE length is a full chunk was stored without RLE.
fn expand_chunk(chunk: &[u8], rle_len: usize, escape: u8) -> Vec<u8> {
    if rle_len == CHUNK_SIZE {
        return chunk.to_vec();
    }
    let mut out = Vec::with_capacity(CHUNK_SIZE);
    let mut i = 0;
    while i < chunk.len() {
        if chunk[i] == escape && i + 2 < chunk.len() {
            let ch = chunk[i + 1];
            let count = chunk[i + 2] as usize + 1;
            out.extend(std::iter::repeat(ch).take(count));
            i += 3;
        } else {
            out.push(chunk[i]);
            i += 1;
        }
    }
    out
}

/// LSB-first variable width code reader
struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    fn read(&mut self, width: u32) -> Option<u16> {
        let mut value = 0u32;
        for i in 0..width {
            let byte = *self.data.get(self.bit_pos / 8)?;
            let bit = (byte >> (self.bit_pos % 8)) & 1;
            value |= (bit as u32) << i;
            self.bit_pos += 1;
        }
        Some(value as u16)
    }

    /// Bytes touched so far, rounding a partial byte up
    fn bytes_consumed(&self) -> usize {
        self.bit_pos.div_ceil(8)
    }
}

/// Code width for the next code given the next free table entry
fn code_width(entry: u16) -> u32 {
    let bits = u16::BITS - (entry + 1).leading_zeros();
    bits.clamp(9, 12)
}

/// Dictionary of (prefix code, suffix byte) pairs
struct LzwTable {
    prefix: Vec<u16>,
    suffix: Vec<u8>,
    entry: u16,
    prev: Option<u16>,
}

impl LzwTable {
    fn new() -> Self {
        let mut table = Self {
            prefix: vec![0; MAX_CODES],
            suffix: vec![0; MAX_CODES],
            entry: FIRST_CODE,
            prev: None,
        };
        for code in 0..256 {
            table.suffix[code] = code as u8;
        }
        table
    }

    fn reset(&mut self) {
        self.entry = FIRST_CODE;
        self.prev = None;
    }

    /// The string a code stands for
    fn string(&self, mut code: u16, out: &mut Vec<u8>) -> Result<()> {
        let start = out.len();
        while code > 0xFF {
            if code >= self.entry {
                return Err(FsError::decompression(format!("LZW code ${:03X} undefined", code)));
            }
            out.push(self.suffix[code as usize]);
            code = self.prefix[code as usize];
        }
        out.push(code as u8);
        out[start..].reverse();
        Ok(())
    }

    fn add(&mut self, prefix: u16, suffix: u8) {
        if (self.entry as usize) < MAX_CODES {
            self.prefix[self.entry as usize] = prefix;
            self.suffix[self.entry as usize] = suffix;
            self.entry += 1;
        }
    }

    /// Decode codes until `count` bytes have been produced
    fn expand(&mut self, bits: &mut BitReader<'_>, count: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(count);
        let mut scratch = Vec::new();

        while out.len() < count {
            let code = bits
                .read(code_width(self.entry))
                .ok_or_else(|| FsError::decompression("LZW stream truncated"))?;

            if code == CLEAR_CODE {
                self.reset();
                continue;
            }

            scratch.clear();
            match self.prev {
                None => {
                    if code > 0xFF {
                        return Err(FsError::decompression(format!(
                            "LZW stream starts with code ${:03X}",
                            code
                        )));
                    }
                    scratch.push(code as u8);
                }
                Some(prev) if code < self.entry => {
                    self.string(code, &mut scratch)?;
                    self.add(prev, scratch[0]);
                }
                Some(prev) if code == self.entry => {
                    self.string(prev, &mut scratch)?;
                    let first = scratch[0];
                    scratch.push(first);
                    self.add(prev, first);
                }
                Some(_) => {
                    return Err(FsError::decompression(format!(
                        "LZW code ${:03X} beyond next entry ${:03X}",
                        code, self.entry
                    )));
                }
            }
            out.extend_from_slice(&scratch);
            self.prev = Some(code);
        }

        out.truncate(count);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pack 9-bit codes LSB-first
    fn pack_codes(codes: &[u16]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut acc = 0u32;
        let mut nbits = 0;
        for &code in codes {
            acc |= (code as u32) << nbits;
            nbits += 9;
            while nbits >= 8 {
                out.push(acc as u8);
                acc >>= 8;
                nbits -= 8;
            }
        }
        if nbits > 0 {
            out.push(acc as u8);
        }
        out
    }

    #[test]
    fn test_code_width() {
        assert_eq!(code_width(0x101), 9);
        assert_eq!(code_width(0x1FE), 9);
        assert_eq!(code_width(0x1FF), 10);
        assert_eq!(code_width(0x7FF), 12);
        assert_eq!(code_width(0xFFF), 12);
    }

    #[test]
    fn test_expand_kwkwk() {
        // A, B, AB (0x101), ABA (0x103, the entry being defined)
        let data = pack_codes(&[0x41, 0x42, 0x101, 0x103]);
        let mut table = LzwTable::new();
        let out = table.expand(&mut BitReader::new(&data), 7).unwrap();
        assert_eq!(out, b"ABABABA");
    }

    #[test]
    fn test_undefined_code() {
        let data = pack_codes(&[0x41, 0x150]);
        let mut table = LzwTable::new();
        assert!(table.expand(&mut BitReader::new(&data), 10).is_err());
    }

    #[test]
    fn test_rle_expansion() {
        let chunk = [b'X', 0xDB, b'-', 4, b'Y'];
        assert_eq!(expand_chunk(&chunk, 5, 0xDB), b"X-----Y");
        assert_eq!(expand_chunk(&chunk, CHUNK_SIZE, 0xDB), chunk.to_vec());
    }

    #[test]
    fn test_lzw1_stored_chunk() {
        let payload = b"HELLO";
        let mut chunk = vec![0xDB, b'!', 2];
        chunk.extend_from_slice(payload);
        let expected: Vec<u8> = b"!!!HELLO".to_vec();

        let mut input = crc16(0, &expected).to_le_bytes().to_vec();
        input.extend_from_slice(&[0, 0xDB]);
        input.extend_from_slice(&(chunk.len() as u16).to_le_bytes());
        input.push(0);
        input.extend_from_slice(&chunk);

        assert_eq!(Lzw1.decompress(&input, 8).unwrap(), expected);
        assert_eq!(Lzw1.decompress(&input, 3).unwrap(), b"!!!");
    }

    #[test]
    fn test_lzw1_compressed_chunk() {
        let codes = pack_codes(&[0x41, 0x42, 0x101, 0x103]);
        let expected = b"ABABABA".to_vec();

        let mut input = crc16(0, &expected).to_le_bytes().to_vec();
        input.extend_from_slice(&[0, 0xDB]);
        input.extend_from_slice(&7u16.to_le_bytes());
        input.push(1);
        input.extend_from_slice(&codes);

        assert_eq!(Lzw1.decompress(&input, 7).unwrap(), expected);
    }

    #[test]
    fn test_lzw1_bad_crc() {
        let mut input = vec![0x12, 0x34, 0, 0xDB];
        input.extend_from_slice(&3u16.to_le_bytes());
        input.push(0);
        input.extend_from_slice(b"abc");
        assert!(Lzw1.decompress(&input, 3).is_err());
    }

    #[test]
    fn test_lzw2_table_persists() {
        // Second chunk refers to 0x101 (AB) defined in the first chunk
        let first = pack_codes(&[0x41, 0x42]);
        let second = pack_codes(&[0x101]);

        let mut input = vec![0, 0xDB];
        input.extend_from_slice(&(0x8000u16 | 2).to_le_bytes());
        input.extend_from_slice(&((first.len() + 4) as u16).to_le_bytes());
        input.extend_from_slice(&first);
        input.extend_from_slice(&(0x8000u16 | 2).to_le_bytes());
        input.extend_from_slice(&((second.len() + 4) as u16).to_le_bytes());
        input.extend_from_slice(&second);

        assert_eq!(Lzw2.decompress(&input, 4).unwrap(), b"ABAB");
    }

    #[test]
    fn test_lzw2_stored_chunk() {
        let mut input = vec![0, 0xDB];
        input.extend_from_slice(&4u16.to_le_bytes());
        input.extend_from_slice(b"DATA");
        assert_eq!(Lzw2.decompress(&input, 4).unwrap(), b"DATA");
    }
}
