/// Block reader: random access to the blocks of a disk buffer

use crate::buffer::Buffer;
use crate::error::Result;
use crate::image::block::{AppleBlock, BlockType, FileId};
use crate::image::copier::BlockCopier;
use crate::image::params::{AddressType, DiskParameters};
use std::collections::{BTreeSet, HashMap};

/// Lazily materializes blocks over a buffer and tracks dirty blocks
#[derive(Debug, Clone)]
pub struct BlockReader {
    name: String,
    disk: Buffer,
    params: DiskParameters,
    copier: BlockCopier,
    total_blocks: usize,
    /// Block arena indexed by block number
    blocks: Vec<Option<AppleBlock>>,
    /// Owning file per block number
    owners: HashMap<usize, FileId>,
    /// Blocks waiting to be written back
    laundry: BTreeSet<usize>,
}

impl BlockReader {
    /// Create a reader over a buffer
    pub fn new(name: impl Into<String>, disk: Buffer, params: DiskParameters) -> Result<Self> {
        let params = DiskParameters::new(
            params.bytes_per_block,
            params.interleave,
            params.blocks_per_track,
        )?;
        let total_blocks = params.total_blocks(disk.len());
        Ok(Self {
            name: name.into(),
            copier: BlockCopier::select(&params),
            disk,
            params,
            total_blocks,
            blocks: vec![None; total_blocks],
            owners: HashMap::new(),
            laundry: BTreeSet::new(),
        })
    }

    /// Name of the image this reader was built for
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Geometry of this reader
    pub fn params(&self) -> &DiskParameters {
        &self.params
    }

    /// Bytes per block
    pub fn block_size(&self) -> usize {
        self.params.bytes_per_block
    }

    /// The backing disk buffer
    pub fn disk(&self) -> &Buffer {
        &self.disk
    }

    /// Copy strategy in use
    pub fn copier(&self) -> BlockCopier {
        self.copier
    }

    /// Number of addressable blocks
    pub fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    /// Addressing mode
    pub fn address_type(&self) -> AddressType {
        self.params.address_type()
    }

    /// Check a block number
    pub fn is_valid_block(&self, block_no: usize) -> bool {
        block_no < self.total_blocks
    }

    /// Block number for a track/sector pair, if it is on this disk
    pub fn block_no(&self, track: usize, sector: usize) -> Option<usize> {
        if self.address_type() != AddressType::Sector || sector >= self.params.blocks_per_track {
            return None;
        }
        let block_no = track * self.params.blocks_per_track + sector;
        self.is_valid_block(block_no).then_some(block_no)
    }

    /// Check a track/sector pair
    pub fn is_valid_sector(&self, track: usize, sector: usize) -> bool {
        self.block_no(track, sector).is_some()
    }

    /// Number of tracks covered by the buffer
    pub fn total_tracks(&self) -> usize {
        if self.params.blocks_per_track == 0 {
            0
        } else {
            self.total_blocks / self.params.blocks_per_track
        }
    }

    /// Get a block, materializing its record on first access
    pub fn block_at(&mut self, block_no: usize) -> Option<&AppleBlock> {
        self.block_entry(block_no).map(|block| &*block)
    }

    /// Get a sector by track and sector number
    pub fn sector_at(&mut self, track: usize, sector: usize) -> Option<&AppleBlock> {
        let block_no = self.block_no(track, sector)?;
        self.block_at(block_no)
    }

    fn block_entry(&mut self, block_no: usize) -> Option<&mut AppleBlock> {
        let blocks_per_track = self.params.blocks_per_track;
        self.blocks
            .get_mut(block_no)
            .map(|slot| slot.get_or_insert_with(|| AppleBlock::new(block_no, blocks_per_track)))
    }

    /// Read a block's contents; invalid blocks read as zeros
    pub fn read(&self, block_no: usize) -> Vec<u8> {
        if let Some(Some(AppleBlock {
            buffer: Some(local),
            ..
        })) = self.blocks.get(block_no)
        {
            return local.clone();
        }
        let mut out = vec![0; self.params.bytes_per_block];
        if self.is_valid_block(block_no) {
            self.copier
                .read(&self.params, &self.disk, block_no, &mut out);
        }
        out
    }

    /// Read several blocks and concatenate them in list order
    pub fn read_many(&self, blocks: &[usize]) -> Vec<u8> {
        let mut out = Vec::with_capacity(blocks.len() * self.params.bytes_per_block);
        for &block_no in blocks {
            out.extend_from_slice(&self.read(block_no));
        }
        out
    }

    /// Mutable access to a block's local buffer, reading it on first use
    pub fn buffer_mut(&mut self, block_no: usize) -> Option<&mut Vec<u8>> {
        if !self.is_valid_block(block_no) {
            return None;
        }
        let contents = self.read(block_no);
        let block = self.block_entry(block_no)?;
        Some(block.buffer.get_or_insert(contents))
    }

    /// Copy a block's local buffer back into the disk buffer
    pub fn write(&mut self, block_no: usize) {
        let data = match self.blocks.get(block_no) {
            Some(Some(AppleBlock {
                buffer: Some(local),
                ..
            })) => local.clone(),
            _ => return,
        };
        self.copier
            .write(&self.params, &mut self.disk, block_no, &data);
    }

    /// Add a block to the laundry list
    pub fn mark_dirty(&mut self, block_no: usize) {
        if let Some(block) = self.block_entry(block_no) {
            block.dirty = true;
            self.laundry.insert(block_no);
        }
    }

    /// Remove a block from the laundry list
    pub fn mark_clean(&mut self, block_no: usize) {
        if let Some(block) = self.block_entry(block_no) {
            block.dirty = false;
        }
        self.laundry.remove(&block_no);
    }

    /// Block numbers waiting to be written
    pub fn dirty_blocks(&self) -> impl Iterator<Item = usize> + '_ {
        self.laundry.iter().copied()
    }

    /// Write every dirty block back to the disk buffer, returning how many were written
    pub fn flush(&mut self) -> usize {
        let dirty: Vec<usize> = self.laundry.iter().copied().collect();
        for &block_no in &dirty {
            self.write(block_no);
            self.mark_clean(block_no);
        }
        dirty.len()
    }

    /// Classify a block
    pub fn set_block_type(
        &mut self,
        block_no: usize,
        block_type: BlockType,
        sub_type: Option<&'static str>,
    ) {
        if let Some(block) = self.block_entry(block_no) {
            block.block_type = block_type;
            if sub_type.is_some() {
                block.sub_type = sub_type;
            }
        }
    }

    /// Classification of a block (unvisited blocks are orphans)
    pub fn block_type(&self, block_no: usize) -> BlockType {
        match self.blocks.get(block_no) {
            Some(Some(block)) => block.block_type,
            _ => BlockType::Orphan,
        }
    }

    /// Label of a block ("VTOC", "INDEX", ...), if one was set
    pub fn block_sub_type(&self, block_no: usize) -> Option<&'static str> {
        match self.blocks.get(block_no) {
            Some(Some(block)) => block.sub_type,
            _ => None,
        }
    }

    /// Record which file claims a block
    pub fn set_file_owner(&mut self, block_no: usize, owner: FileId) {
        if self.is_valid_block(block_no) {
            self.set_block_type(block_no, BlockType::FileData, None);
            self.owners.insert(block_no, owner);
        }
    }

    /// File claiming a block, if any
    pub fn file_owner(&self, block_no: usize) -> Option<FileId> {
        self.owners.get(&block_no).copied()
    }

    /// Consume the reader, returning the (possibly written) disk buffer
    pub fn into_disk(self) -> Buffer {
        self.disk
    }
}
