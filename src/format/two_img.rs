/// 2IMG ("Universal Disk Image") wrapper header

use crate::format::constants::*;

/// Sector order of the data inside a 2IMG file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoImgOrder {
    /// DOS 3.3 sector order
    Dos,
    /// ProDOS block order
    Prodos,
    /// Nibblized track data
    Nibble,
    /// Unknown order code
    Unknown(u32),
}

impl From<u32> for TwoImgOrder {
    fn from(value: u32) -> Self {
        match value {
            0 => TwoImgOrder::Dos,
            1 => TwoImgOrder::Prodos,
            2 => TwoImgOrder::Nibble,
            other => TwoImgOrder::Unknown(other),
        }
    }
}

/// Parsed 2IMG header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoImgHeader {
    /// Four-character creator code
    pub creator: String,
    /// Sector order of the payload
    pub order: TwoImgOrder,
    /// Raw flags word
    pub flags: u32,
    /// ProDOS block count (zero for DOS order)
    pub blocks: u32,
    /// Payload offset from the start of the file
    pub data_offset: usize,
    /// Payload length
    pub data_length: usize,
    /// Free-form comment
    pub comment: Option<String>,
}

fn u32_le(data: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

impl TwoImgHeader {
    /// Parse a 2IMG header, `None` if the buffer does not start with one
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < TWO_IMG_HEADER_SIZE || !data.starts_with(TWO_IMG_SIGNATURE) {
            return None;
        }

        let data_offset = u32_le(data, TWO_IMG_DATA_OFFSET) as usize;
        let mut data_length = u32_le(data, TWO_IMG_DATA_LENGTH) as usize;
        let order = TwoImgOrder::from(u32_le(data, TWO_IMG_FORMAT_OFFSET));
        let blocks = u32_le(data, TWO_IMG_BLOCKS_OFFSET);

        // Some creators leave the length zero for ProDOS order
        if data_length == 0 && order == TwoImgOrder::Prodos {
            data_length = blocks as usize * 512;
        }
        if data_offset > data.len() {
            return None;
        }
        data_length = data_length.min(data.len() - data_offset);

        let comment_offset = u32_le(data, TWO_IMG_COMMENT_OFFSET) as usize;
        let comment_length = u32_le(data, TWO_IMG_COMMENT_LENGTH) as usize;
        let comment = if comment_offset > 0 && comment_length > 0 {
            data.get(comment_offset..comment_offset + comment_length)
                .map(|c| String::from_utf8_lossy(c).to_string())
        } else {
            None
        };

        Some(Self {
            creator: String::from_utf8_lossy(&data[4..8]).to_string(),
            order,
            flags: u32_le(data, TWO_IMG_FLAGS_OFFSET),
            blocks,
            data_offset,
            data_length,
            comment,
        })
    }

    /// Is the image flagged write-protected?
    pub fn is_locked(&self) -> bool {
        self.flags & 0x8000_0000 != 0
    }

    /// DOS volume number when the flags carry one
    pub fn volume(&self) -> Option<u8> {
        (self.flags & 0x100 != 0).then_some((self.flags & 0xFF) as u8)
    }

    /// Interleave to use for the payload when read as ProDOS blocks
    pub fn prodos_interleave(&self) -> usize {
        match self.order {
            TwoImgOrder::Dos => 1,
            _ => 0,
        }
    }
}

#[cfg(test)]
pub(crate) fn build_header(order: u32, payload: usize) -> Vec<u8> {
    let mut header = vec![0u8; TWO_IMG_HEADER_SIZE];
    header[..4].copy_from_slice(TWO_IMG_SIGNATURE);
    header[4..8].copy_from_slice(b"TEST");
    header[8..10].copy_from_slice(&(TWO_IMG_HEADER_SIZE as u16).to_le_bytes());
    header[10..12].copy_from_slice(&1u16.to_le_bytes());
    header[TWO_IMG_FORMAT_OFFSET..TWO_IMG_FORMAT_OFFSET + 4].copy_from_slice(&order.to_le_bytes());
    header[TWO_IMG_BLOCKS_OFFSET..TWO_IMG_BLOCKS_OFFSET + 4]
        .copy_from_slice(&((payload / 512) as u32).to_le_bytes());
    header[TWO_IMG_DATA_OFFSET..TWO_IMG_DATA_OFFSET + 4]
        .copy_from_slice(&(TWO_IMG_HEADER_SIZE as u32).to_le_bytes());
    header[TWO_IMG_DATA_LENGTH..TWO_IMG_DATA_LENGTH + 4]
        .copy_from_slice(&(payload as u32).to_le_bytes());
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let mut data = build_header(1, 1024);
        data.resize(TWO_IMG_HEADER_SIZE + 1024, 0);
        let header = TwoImgHeader::parse(&data).unwrap();

        assert_eq!(header.creator, "TEST");
        assert_eq!(header.order, TwoImgOrder::Prodos);
        assert_eq!(header.blocks, 2);
        assert_eq!(header.data_offset, 64);
        assert_eq!(header.data_length, 1024);
        assert_eq!(header.prodos_interleave(), 0);
        assert!(!header.is_locked());
        assert_eq!(header.volume(), None);
    }

    #[test]
    fn test_length_clamped_to_buffer() {
        let mut data = build_header(0, 4096);
        data.resize(TWO_IMG_HEADER_SIZE + 100, 0);
        let header = TwoImgHeader::parse(&data).unwrap();
        assert_eq!(header.data_length, 100);
        assert_eq!(header.prodos_interleave(), 1);
    }

    #[test]
    fn test_rejects_other_data() {
        assert!(TwoImgHeader::parse(&[0u8; 100]).is_none());
        assert!(TwoImgHeader::parse(b"2IMG").is_none());
    }
}
