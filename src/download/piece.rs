use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::{messages::RequestPiecePayload, BLOCK_MAX};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PieceError {
    #[error("Piece {index} does not match its hash from the torrent")]
    HashMismatch { index: u32 },
}

/// The blocks of one piece as they come in.
#[derive(Debug, Clone)]
pub struct PieceAssembly {
    index: u32,
    size: u32,
    expected_hash: [u8; 20],
    blocks: Vec<Option<Vec<u8>>>,
}

impl PieceAssembly {
    pub fn new(index: u32, size: u32, expected_hash: [u8; 20]) -> Self {
        let n_blocks = size.div_ceil(BLOCK_MAX);
        Self {
            index,
            size,
            expected_hash,
            blocks: vec![None; n_blocks as usize],
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Length of block `block_i`; only the last one may be short.
    fn block_len(&self, block_i: u32) -> u32 {
        let n_blocks = self.blocks.len() as u32;
        if block_i == n_blocks - 1 && self.size % BLOCK_MAX != 0 {
            self.size % BLOCK_MAX
        } else {
            BLOCK_MAX
        }
    }

    /// Requests for every block we don't have yet.
    pub fn missing_requests(&self) -> Vec<RequestPiecePayload> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| block.is_none())
            .map(|(block_i, _)| {
                let block_i = block_i as u32;
                RequestPiecePayload::new(self.index, block_i * BLOCK_MAX, self.block_len(block_i))
            })
            .collect()
    }

    /// Stores a block into slot `begin / BLOCK_MAX`. A block that doesn't fit
    /// a slot is dropped and `false` returned. A repeated block overwrites.
    pub fn insert(&mut self, begin: u32, block: Vec<u8>) -> bool {
        if begin % BLOCK_MAX != 0 {
            return false;
        }
        let block_i = begin / BLOCK_MAX;
        if block_i as usize >= self.blocks.len() || block.len() != self.block_len(block_i) as usize
        {
            return false;
        }
        self.blocks[block_i as usize] = Some(block);
        true
    }

    pub fn is_complete(&self) -> bool {
        self.blocks.iter().all(Option::is_some)
    }

    /// Joins the blocks and checks them against the expected hash.
    ///
    /// Only meaningful once [`is_complete`](Self::is_complete) holds.
    pub fn verify(&self) -> Result<Vec<u8>, PieceError> {
        let mut buf = Vec::with_capacity(self.size as usize);
        for block in self.blocks.iter().flatten() {
            buf.extend_from_slice(block);
        }
        let hash: [u8; 20] = Sha1::digest(&buf).into();
        if hash != self.expected_hash || buf.len() != self.size as usize {
            return Err(PieceError::HashMismatch { index: self.index });
        }
        Ok(buf)
    }
}
