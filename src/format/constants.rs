/// Image magic bytes, header offsets and canonical sizes

/// 2IMG header signature
pub const TWO_IMG_SIGNATURE: &[u8] = b"2IMG";

/// Size of the 2IMG header
pub const TWO_IMG_HEADER_SIZE: usize = 64;

/// Offset of the 2IMG image format word
pub const TWO_IMG_FORMAT_OFFSET: usize = 0x0C;

/// Offset of the 2IMG flags word
pub const TWO_IMG_FLAGS_OFFSET: usize = 0x10;

/// Offset of the 2IMG ProDOS block count
pub const TWO_IMG_BLOCKS_OFFSET: usize = 0x14;

/// Offset of the 2IMG data offset
pub const TWO_IMG_DATA_OFFSET: usize = 0x18;

/// Offset of the 2IMG data length
pub const TWO_IMG_DATA_LENGTH: usize = 0x1C;

/// Offset of the 2IMG comment offset
pub const TWO_IMG_COMMENT_OFFSET: usize = 0x20;

/// Offset of the 2IMG comment length
pub const TWO_IMG_COMMENT_LENGTH: usize = 0x24;

/// Size of the DiskCopy 4.2 header
pub const DISKCOPY_HEADER_SIZE: usize = 0x54;

/// Offset of the DiskCopy private word
pub const DISKCOPY_PRIVATE_OFFSET: usize = 0x52;

/// Fixed value of the DiskCopy private word
pub const DISKCOPY_PRIVATE_ID: u16 = 0x0100;

/// WOZ version 1 signature
pub const WOZ1_SIGNATURE: &[u8] = b"WOZ1";

/// WOZ version 2 signature
pub const WOZ2_SIGNATURE: &[u8] = b"WOZ2";

/// Bytes following the WOZ signature
pub const WOZ_TRAILER: &[u8] = &[0xFF, 0x0A, 0x0D, 0x0A];

/// Size of the WOZ file header (signature, trailer, CRC32)
pub const WOZ_HEADER_SIZE: usize = 12;

/// 35 tracks of 16 sectors
pub const DISK_140K: usize = 143_360;

/// 35 tracks of 16 sectors plus 128 padding bytes some tools append
pub const DISK_140K_PADDED: usize = 143_488;

/// 35 tracks of 13 sectors
pub const DISK_113K: usize = 116_480;

/// 800K disk (also two UniDOS halves)
pub const DISK_800K: usize = 819_200;

/// Size of one UniDOS half
pub const UNIDOS_HALF: usize = DISK_800K / 2;

/// Coerce a buffer length to the canonical 140K size when it carries the 128-byte pad
#[inline]
pub fn canonical_length(length: usize) -> usize {
    if length == DISK_140K_PADDED {
        DISK_140K
    } else {
        length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_length() {
        assert_eq!(canonical_length(DISK_140K_PADDED), DISK_140K);
        assert_eq!(canonical_length(DISK_140K), DISK_140K);
        assert_eq!(canonical_length(DISK_800K), DISK_800K);
    }

    #[test]
    fn test_unidos_half() {
        assert_eq!(UNIDOS_HALF, 50 * 32 * 256);
    }
}
