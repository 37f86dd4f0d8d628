/// Shared, immutable byte views over a disk image

use crate::error::{FsError, Result};
use std::sync::Arc;

/// A `(data, offset, length)` view into a shared backing array.
///
/// Views are cheap to clone and derived views share the backing array.
/// The only mutation is [`Buffer::write_at`], which copies the backing array
/// first if any other view still shares it.
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Arc<Vec<u8>>,
    offset: usize,
    length: usize,
}

impl Buffer {
    /// Wrap a whole byte vector
    pub fn new(data: Vec<u8>) -> Self {
        let length = data.len();
        Self {
            data: Arc::new(data),
            offset: 0,
            length,
        }
    }

    /// Create a view over part of an existing backing array
    pub fn with_range(data: Arc<Vec<u8>>, offset: usize, length: usize) -> Result<Self> {
        let capacity = data.len();
        match offset.checked_add(length) {
            Some(end) if end <= capacity => Ok(Self {
                data,
                offset,
                length,
            }),
            _ => Err(FsError::InvalidBuffer {
                offset,
                length,
                capacity,
            }),
        }
    }

    /// An empty buffer
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Derive a view relative to this one
    pub fn slice(&self, offset: usize, length: usize) -> Result<Self> {
        match offset.checked_add(length) {
            Some(end) if end <= self.length => {
                Self::with_range(Arc::clone(&self.data), self.offset + offset, length)
            }
            _ => Err(FsError::InvalidBuffer {
                offset: self.offset + offset,
                length,
                capacity: self.offset + self.length,
            }),
        }
    }

    /// Derive a view of at most `length` bytes starting at `offset`, clamped to this view
    pub fn slice_clamped(&self, offset: usize, length: usize) -> Self {
        let start = offset.min(self.length);
        let length = length.min(self.length - start);
        Self {
            data: Arc::clone(&self.data),
            offset: self.offset + start,
            length,
        }
    }

    /// Offset of this view inside the backing array
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of this view
    pub fn len(&self) -> usize {
        self.length
    }

    /// Check if the view is empty
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The bytes covered by this view
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.length]
    }

    /// The shared backing array
    pub fn backing(&self) -> &Arc<Vec<u8>> {
        &self.data
    }

    /// Copy the view into a new vector
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// Copy `bytes` into the view at `pos`, clamped to the view's end.
    ///
    /// Returns the number of bytes written.
    pub fn write_at(&mut self, pos: usize, bytes: &[u8]) -> usize {
        if pos >= self.length {
            return 0;
        }
        let count = bytes.len().min(self.length - pos);
        let start = self.offset + pos;
        Arc::make_mut(&mut self.data)[start..start + count].copy_from_slice(&bytes[..count]);
        count
    }

    /// Little-endian u16 at `pos` (zero past the end)
    pub fn u16_le(&self, pos: usize) -> u16 {
        u16::from_le_bytes([self.byte(pos), self.byte(pos + 1)])
    }

    /// Byte at `pos` (zero past the end)
    pub fn byte(&self, pos: usize) -> u8 {
        self.as_slice().get(pos).copied().unwrap_or(0)
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Buffer::new(data)
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Buffer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_shares_backing() {
        let buffer = Buffer::new((0..=255).collect());
        let view = buffer.slice(16, 32).unwrap();

        assert_eq!(view.len(), 32);
        assert_eq!(view.offset(), 16);
        assert_eq!(view.as_slice()[0], 16);
        assert!(Arc::ptr_eq(buffer.backing(), view.backing()));
    }

    #[test]
    fn test_slice_out_of_range() {
        let buffer = Buffer::new(vec![0; 100]);
        assert!(buffer.slice(90, 20).is_err());
        assert!(buffer.slice(usize::MAX, 2).is_err());
        assert!(Buffer::with_range(Arc::new(vec![0; 10]), 5, 6).is_err());
    }

    #[test]
    fn test_slice_clamped() {
        let buffer = Buffer::new(vec![1; 100]);
        assert_eq!(buffer.slice_clamped(90, 20).len(), 10);
        assert_eq!(buffer.slice_clamped(200, 20).len(), 0);
    }

    #[test]
    fn test_write_copies_shared_backing() {
        let original = Buffer::new(vec![0; 16]);
        let mut copy = original.clone();

        assert_eq!(copy.write_at(4, &[9, 9]), 2);
        assert_eq!(copy.as_slice()[4], 9);
        assert_eq!(original.as_slice()[4], 0);
        assert_eq!(copy.write_at(15, &[1, 2, 3]), 1);
    }

    #[test]
    fn test_little_endian_reads() {
        let buffer = Buffer::new(vec![0x34, 0x12]);
        assert_eq!(buffer.u16_le(0), 0x1234);
        assert_eq!(buffer.u16_le(1), 0x0012);
    }
}
