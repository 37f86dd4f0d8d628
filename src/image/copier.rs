/// Copy strategies between a disk buffer and logical blocks

use crate::buffer::Buffer;
use crate::image::params::{DiskParameters, SECTOR_SIZE};
use log::debug;

/// Logical-to-physical sector tables, one row per interleave scheme
pub const INTERLEAVE: [[usize; 16]; 3] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15], // none
    [0, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 15], // ProDOS / Pascal
    [0, 6, 12, 3, 9, 15, 14, 5, 11, 2, 8, 7, 13, 4, 10, 1], // CP/M
];

/// Strategy used to locate a block's bytes inside the disk buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCopier {
    /// Block N lives at N * block size
    SingleBlock,
    /// One 256-byte sector per block, deinterleaved within its track
    SingleSector,
    /// Several 256-byte sectors per block, each deinterleaved
    MultipleSector,
}

impl BlockCopier {
    /// Pick the copier for a set of parameters
    pub fn select(params: &DiskParameters) -> Self {
        if params.interleave == 0 {
            BlockCopier::SingleBlock
        } else if params.bytes_per_block == SECTOR_SIZE {
            BlockCopier::SingleSector
        } else {
            BlockCopier::MultipleSector
        }
    }

    /// Byte ranges `(offset, length)` relative to the buffer that make up a block
    pub fn segments(&self, params: &DiskParameters, block_no: usize) -> Vec<(usize, usize)> {
        match self {
            BlockCopier::SingleBlock => {
                vec![(block_no * params.bytes_per_block, params.bytes_per_block)]
            }
            BlockCopier::SingleSector => {
                let track = block_no / params.blocks_per_track;
                let sector = block_no % params.blocks_per_track;
                let physical = INTERLEAVE[params.interleave][sector];
                vec![(
                    track * params.bytes_per_track() + physical * SECTOR_SIZE,
                    SECTOR_SIZE,
                )]
            }
            BlockCopier::MultipleSector => {
                let sectors_per_block = params.sectors_per_block();
                let track = block_no / params.blocks_per_track;
                let first = (block_no % params.blocks_per_track) * sectors_per_block;
                (first..first + sectors_per_block)
                    .map(|sector| {
                        let physical = INTERLEAVE[params.interleave][sector];
                        (
                            track * params.bytes_per_track() + physical * SECTOR_SIZE,
                            SECTOR_SIZE,
                        )
                    })
                    .collect()
            }
        }
    }

    /// Copy a block out of the disk buffer into `out`.
    ///
    /// Bytes beyond the end of the buffer read as zero. Returns false on a short read.
    pub fn read(
        &self,
        params: &DiskParameters,
        disk: &Buffer,
        block_no: usize,
        out: &mut [u8],
    ) -> bool {
        let data = disk.as_slice();
        let mut complete = true;
        let mut pos = 0;

        for (offset, length) in self.segments(params, block_no) {
            let target = &mut out[pos..pos + length];
            if offset + length <= data.len() {
                target.copy_from_slice(&data[offset..offset + length]);
            } else {
                complete = false;
                target.fill(0);
                if offset < data.len() {
                    let available = data.len() - offset;
                    target[..available].copy_from_slice(&data[offset..]);
                }
            }
            pos += length;
        }

        if !complete {
            debug!(
                "short read of block {} ({} byte buffer)",
                block_no,
                data.len()
            );
        }
        complete
    }

    /// Copy a block's bytes back into the disk buffer
    pub fn write(&self, params: &DiskParameters, disk: &mut Buffer, block_no: usize, data: &[u8]) {
        let mut pos = 0;
        for (offset, length) in self.segments(params, block_no) {
            let written = disk.write_at(offset, &data[pos..pos + length]);
            if written < length {
                debug!("short write of block {} at offset {}", block_no, offset);
            }
            pos += length;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_disk(sectors: usize) -> Buffer {
        // each sector is filled with its physical sector index (mod 256)
        let mut data = Vec::with_capacity(sectors * SECTOR_SIZE);
        for sector in 0..sectors {
            data.extend(std::iter::repeat(sector as u8).take(SECTOR_SIZE));
        }
        Buffer::new(data)
    }

    #[test]
    fn test_interleave_tables_are_permutations() {
        for table in INTERLEAVE.iter() {
            let mut seen = [false; 16];
            for &sector in table {
                assert!(!seen[sector]);
                seen[sector] = true;
            }
        }
    }

    #[test]
    fn test_select() {
        assert_eq!(
            BlockCopier::select(&DiskParameters::prodos(0)),
            BlockCopier::SingleBlock
        );
        assert_eq!(
            BlockCopier::select(&DiskParameters::dos33(1)),
            BlockCopier::SingleSector
        );
        assert_eq!(
            BlockCopier::select(&DiskParameters::cpm()),
            BlockCopier::MultipleSector
        );
    }

    #[test]
    fn test_single_sector_deinterleaves() {
        let params = DiskParameters::dos33(1);
        let disk = numbered_disk(32);
        let copier = BlockCopier::select(&params);
        let mut out = vec![0; SECTOR_SIZE];

        // logical sector 1 of track 1 is physical sector 14 of that track
        copier.read(&params, &disk, 17, &mut out);
        assert!(out.iter().all(|&b| b == 16 + 14));

        copier.read(&params, &disk, 2, &mut out);
        assert!(out.iter().all(|&b| b == 13));
    }

    #[test]
    fn test_multiple_sector_matches_prodos_block_order() {
        // ProDOS block 0 on a DOS-ordered image is DOS sectors 0 and 14
        let params = DiskParameters::prodos(1);
        let disk = numbered_disk(16);
        let copier = BlockCopier::select(&params);
        let mut out = vec![0; 512];

        copier.read(&params, &disk, 0, &mut out);
        assert!(out[..256].iter().all(|&b| b == 0));
        assert!(out[256..].iter().all(|&b| b == 14));

        copier.read(&params, &disk, 1, &mut out);
        assert!(out[..256].iter().all(|&b| b == 13));
        assert!(out[256..].iter().all(|&b| b == 12));
    }

    #[test]
    fn test_short_read_zero_fills() {
        let params = DiskParameters::prodos(0);
        let disk = Buffer::new(vec![0xAA; 700]);
        let copier = BlockCopier::select(&params);
        let mut out = vec![0xFF; 512];

        assert!(!copier.read(&params, &disk, 1, &mut out));
        assert!(out[..188].iter().all(|&b| b == 0xAA));
        assert!(out[188..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_round_trips_through_interleave() {
        let params = DiskParameters::cpm();
        let mut disk = Buffer::new(vec![0; 4096]);
        let copier = BlockCopier::select(&params);
        let block: Vec<u8> = (0..1024).map(|i| (i / 256) as u8 + 1).collect();

        copier.write(&params, &mut disk, 1, &block);

        let mut out = vec![0; 1024];
        copier.read(&params, &disk, 1, &mut out);
        assert_eq!(out, block);
        // logical sector 4 (first of block 1) lands on physical sector 9
        assert_eq!(disk.as_slice()[9 * 256], 1);
    }
}
