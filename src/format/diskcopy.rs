/// Apple DiskCopy 4.2 wrapper header

use crate::format::constants::*;

/// Parsed DiskCopy 4.2 header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskCopyHeader {
    /// Disk name (Pascal string)
    pub name: String,
    /// Size of the block data
    pub data_size: usize,
    /// Size of the tag data that follows the block data
    pub tag_size: usize,
    /// Stored checksum of the block data
    pub data_checksum: u32,
    /// Stored checksum of the tag data
    pub tag_checksum: u32,
    /// Disk encoding byte
    pub disk_format: u8,
    /// Format byte
    pub format_byte: u8,
}

fn u32_be(data: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

impl DiskCopyHeader {
    /// Parse a DiskCopy 4.2 header, `None` if the buffer does not carry one
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < DISKCOPY_HEADER_SIZE {
            return None;
        }
        let private = u16::from_be_bytes([
            data[DISKCOPY_PRIVATE_OFFSET],
            data[DISKCOPY_PRIVATE_OFFSET + 1],
        ]);
        if private != DISKCOPY_PRIVATE_ID {
            return None;
        }
        let name_len = data[0] as usize;
        if name_len > 63 {
            return None;
        }
        let data_size = u32_be(data, 0x40) as usize;
        if data_size == 0 || data_size % 512 != 0 || DISKCOPY_HEADER_SIZE + data_size > data.len() {
            return None;
        }

        Some(Self {
            name: String::from_utf8_lossy(&data[1..1 + name_len]).to_string(),
            data_size,
            tag_size: u32_be(data, 0x44) as usize,
            data_checksum: u32_be(data, 0x48),
            tag_checksum: u32_be(data, 0x4C),
            disk_format: data[0x50],
            format_byte: data[0x51],
        })
    }

    /// Offset of the block data
    pub fn data_offset(&self) -> usize {
        DISKCOPY_HEADER_SIZE
    }
}

/// DiskCopy checksum: add each big-endian word, then rotate right one bit
pub fn checksum(data: &[u8]) -> u32 {
    data.chunks(2).fold(0u32, |sum, word| {
        let value = u16::from_be_bytes([word[0], *word.get(1).unwrap_or(&0)]) as u32;
        sum.wrapping_add(value).rotate_right(1)
    })
}

#[cfg(test)]
pub(crate) fn build_header(name: &str, payload: &[u8]) -> Vec<u8> {
    let mut header = vec![0u8; DISKCOPY_HEADER_SIZE];
    header[0] = name.len() as u8;
    header[1..1 + name.len()].copy_from_slice(name.as_bytes());
    header[0x40..0x44].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    header[0x48..0x4C].copy_from_slice(&checksum(payload).to_be_bytes());
    header[0x50] = 1;
    header[0x51] = 0x24;
    header[DISKCOPY_PRIVATE_OFFSET..DISKCOPY_PRIVATE_OFFSET + 2]
        .copy_from_slice(&DISKCOPY_PRIVATE_ID.to_be_bytes());
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let payload = vec![0x11u8; 1024];
        let mut data = build_header("Work Disk", &payload);
        data.extend_from_slice(&payload);

        let header = DiskCopyHeader::parse(&data).unwrap();
        assert_eq!(header.name, "Work Disk");
        assert_eq!(header.data_size, 1024);
        assert_eq!(header.data_offset(), 84);
        assert_eq!(header.data_checksum, checksum(&payload));
    }

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[0x00, 0x02]), 1);
        assert_eq!(checksum(&[0x00, 0x01]), 0x8000_0000);
    }

    #[test]
    fn test_rejects_bad_private_word() {
        let payload = vec![0u8; 512];
        let mut data = build_header("X", &payload);
        data.extend_from_slice(&payload);
        data[DISKCOPY_PRIVATE_OFFSET] = 0;
        assert!(DiskCopyHeader::parse(&data).is_none());
    }
}
