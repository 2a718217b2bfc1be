mod scheduler;

pub use scheduler::{Request, Scheduler, SchedulerConfig, SchedulerEvent};

use crate::torrent::PieceHash;
use bytes::{Bytes, BytesMut};

/// Standard block size (16 KB)
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// State of a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceStatus {
    /// Not allocated, no blocks
    Empty,
    /// Blocks materialized and being fetched
    Downloading,
    /// Downloaded and verified
    Complete,
}

/// State of a block within a downloading piece
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Empty,
    Requested,
    Filled,
}

/// The unit actually requested over the wire
#[derive(Debug, Clone)]
pub struct Block {
    pub offset: u32,
    pub length: u32,
    pub status: BlockStatus,
    data: Option<Bytes>,
}

impl Block {
    fn new(offset: u32, length: u32) -> Self {
        Self {
            offset,
            length,
            status: BlockStatus::Empty,
            data: None,
        }
    }

    pub fn fill(&mut self, data: Bytes) {
        self.status = BlockStatus::Filled;
        self.data = Some(data);
    }

    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }
}

/// A hash-verifiable unit of the target data
#[derive(Debug, Clone)]
pub struct Piece {
    pub index: usize,
    pub hash: PieceHash,
    pub length: u32,
    status: PieceStatus,
    blocks: Vec<Block>,
}

impl Piece {
    pub fn new(index: usize, hash: PieceHash, length: u32) -> Self {
        Self {
            index,
            hash,
            length,
            status: PieceStatus::Empty,
            blocks: Vec::new(),
        }
    }

    pub fn status(&self) -> PieceStatus {
        self.status
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block_mut(&mut self, index: usize) -> Option<&mut Block> {
        self.blocks.get_mut(index)
    }

    /// Materialize empty blocks and start downloading
    pub fn prepare(&mut self, block_size: u32) {
        let count = self.length.div_ceil(block_size);
        self.blocks = (0..count)
            .map(|i| {
                let offset = i * block_size;
                Block::new(offset, block_size.min(self.length - offset))
            })
            .collect();
        self.status = PieceStatus::Downloading;
    }

    /// Index of the block starting at `offset`, if that is a block boundary
    pub fn block_at(&self, offset: u32, block_size: u32) -> Option<usize> {
        if offset % block_size != 0 {
            return None;
        }
        let index = (offset / block_size) as usize;
        (index < self.blocks.len()).then_some(index)
    }

    /// Every block has data
    pub fn is_filled(&self) -> bool {
        self.status == PieceStatus::Downloading
            && self.blocks.iter().all(|b| b.status == BlockStatus::Filled)
    }

    /// Concatenate block buffers in offset order
    pub fn assemble(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.length as usize);
        for data in self.blocks.iter().filter_map(Block::data) {
            buf.extend_from_slice(data);
        }
        buf.freeze()
    }

    pub fn verify(&self, data: &[u8]) -> bool {
        PieceHash::of(data) == self.hash
    }

    /// Drop the block buffers after successful verification
    pub fn complete(&mut self) {
        self.blocks.clear();
        self.status = PieceStatus::Complete;
    }

    /// Discard everything; the piece is downloaded again from scratch
    pub fn reset(&mut self) {
        self.blocks.clear();
        self.status = PieceStatus::Empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_short_last_block() {
        let mut piece = Piece::new(0, PieceHash::new([0; 20]), 40_000);
        piece.prepare(BLOCK_SIZE);

        assert_eq!(piece.status(), PieceStatus::Downloading);
        let lengths: Vec<u32> = piece.blocks().iter().map(|b| b.length).collect();
        assert_eq!(lengths, vec![16384, 16384, 7232]);
        assert_eq!(piece.block_at(32768, BLOCK_SIZE), Some(2));
        assert_eq!(piece.block_at(100, BLOCK_SIZE), None);
        assert_eq!(piece.block_at(49152, BLOCK_SIZE), None);
    }

    #[test]
    fn test_assemble_and_verify() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let mut piece = Piece::new(3, PieceHash::of(&data), data.len() as u32);
        piece.prepare(BLOCK_SIZE);

        for i in 0..piece.blocks().len() {
            let block = piece.block_mut(i).unwrap();
            let start = block.offset as usize;
            let end = start + block.length as usize;
            block.fill(Bytes::copy_from_slice(&data[start..end]));
        }

        assert!(piece.is_filled());
        let assembled = piece.assemble();
        assert_eq!(&assembled[..], &data[..]);
        assert!(piece.verify(&assembled));

        piece.complete();
        assert_eq!(piece.status(), PieceStatus::Complete);
        assert!(piece.blocks().is_empty());
    }

    #[test]
    fn test_reset_discards_blocks() {
        let mut piece = Piece::new(0, PieceHash::new([0; 20]), BLOCK_SIZE);
        piece.prepare(BLOCK_SIZE);
        piece.block_mut(0).unwrap().fill(Bytes::from_static(b"x"));

        piece.reset();
        assert_eq!(piece.status(), PieceStatus::Empty);
        assert!(piece.blocks().is_empty());
        assert!(!piece.is_filled());
    }
}
