use sha1::{Digest, Sha1};

use crate::blockinfo::{block_count, block_len, BlockInfo};
use crate::error::engine::EngineError;
use crate::{PieceIndex, Sha1Hash, BLOCK_LEN};

/// The download state of one block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockStatus {
    /// Not yet requested from any peer.
    Missing,
    /// A request for this block is in flight.
    Pending,
    /// The block's data has arrived.
    Retrieved,
}

/// One block of a piece and its download state.
///
/// Mutated only by the piece manager under its lock.
#[derive(Debug)]
pub struct Block {
    pub info: BlockInfo,
    pub status: BlockStatus,
    /// Present only once the block is `Retrieved`.
    pub data: Vec<u8>,
}

/// A content-addressed fragment of the target file.
///
/// Owns its blocks in increasing offset order; that order is also the order
/// in which data is concatenated for hashing, independent of network
/// arrival order.
#[derive(Debug)]
pub struct Piece {
    pub index: PieceIndex,
    expected_hash: Sha1Hash,
    blocks: Vec<Block>,
}

impl Piece {
    /// Builds the block list covering exactly `len` bytes of this piece.
    pub fn new(index: PieceIndex, len: u32, expected_hash: Sha1Hash) -> Self {
        let count = block_count(len);
        let blocks = (0..count)
            .map(|block_index| Block {
                info: BlockInfo {
                    piece_index: index,
                    offset: block_index as u32 * BLOCK_LEN,
                    len: block_len(len, block_index),
                },
                status: BlockStatus::Missing,
                data: Vec::new(),
            })
            .collect();
        Piece {
            index,
            expected_hash,
            blocks,
        }
    }

    /// Returns the first Missing block, flipping it to Pending, or `None`
    /// if every block is already requested or retrieved.
    pub fn next_request(&mut self) -> Option<BlockInfo> {
        let block = self
            .blocks
            .iter_mut()
            .find(|b| b.status == BlockStatus::Missing)?;
        block.status = BlockStatus::Pending;
        Some(block.info)
    }

    /// Stores the data of the block at `offset`.
    ///
    /// An offset matching none of the piece's blocks is a bookkeeping
    /// violation on the reporting session's side.
    pub fn block_received(&mut self, offset: u32, data: Vec<u8>) -> Result<(), EngineError> {
        let block = self
            .blocks
            .iter_mut()
            .find(|b| b.info.offset == offset)
            .ok_or(EngineError::UnknownBlock {
                piece_index: self.index,
                offset,
            })?;
        block.status = BlockStatus::Retrieved;
        block.data = data;
        Ok(())
    }

    /// True once every block is Retrieved.
    pub fn is_complete(&self) -> bool {
        self.blocks
            .iter()
            .all(|b| b.status == BlockStatus::Retrieved)
    }

    /// Hashes the concatenated block data and compares it against the
    /// expected digest. Only meaningful once the piece is complete.
    pub fn is_hash_matching(&self) -> bool {
        debug_assert!(self.is_complete());
        let mut hasher = Sha1::new();
        for block in &self.blocks {
            hasher.update(&block.data);
        }
        self.expected_hash[..] == hasher.finalize()[..]
    }

    /// Concatenates the block data in offset order.
    pub fn data(&self) -> Vec<u8> {
        debug_assert!(self.is_complete());
        let len = self.blocks.iter().map(|b| b.data.len()).sum();
        let mut data = Vec::with_capacity(len);
        for block in &self.blocks {
            data.extend_from_slice(&block.data);
        }
        data
    }

    /// Discards all block data and returns every block to Missing.
    ///
    /// Used when the piece failed hash verification: a mismatched piece is
    /// never partially trusted.
    pub fn reset(&mut self) {
        for block in &mut self.blocks {
            block.status = BlockStatus::Missing;
            block.data = Vec::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retrieve_all(piece: &mut Piece, data: &[u8]) {
        let infos: Vec<_> = std::iter::from_fn(|| piece.next_request()).collect();
        for info in infos {
            let start = info.offset as usize;
            let end = start + info.len as usize;
            piece.block_received(info.offset, data[start..end].to_vec()).unwrap();
        }
    }

    fn sha1_of(data: &[u8]) -> Sha1Hash {
        Sha1::digest(data).into()
    }

    #[test]
    fn next_request_walks_blocks_in_offset_order() {
        let mut piece = Piece::new(0, 2 * BLOCK_LEN + 100, [0; 20]);
        assert_eq!(piece.next_request().unwrap().offset, 0);
        assert_eq!(piece.next_request().unwrap().offset, BLOCK_LEN);
        let last = piece.next_request().unwrap();
        assert_eq!(last.offset, 2 * BLOCK_LEN);
        assert_eq!(last.len, 100);
        // all blocks pending now
        assert_eq!(piece.next_request(), None);
        assert!(!piece.is_complete());
    }

    #[test]
    fn complete_piece_with_matching_hash_verifies() {
        let data: Vec<u8> = (0..2 * BLOCK_LEN).map(|i| (i % 251) as u8).collect();
        let mut piece = Piece::new(3, data.len() as u32, sha1_of(&data));
        retrieve_all(&mut piece, &data);

        assert!(piece.is_complete());
        assert!(piece.is_hash_matching());
        assert_eq!(piece.data(), data);
    }

    #[test]
    fn corrupting_one_byte_flips_verification() {
        let data: Vec<u8> = (0..2 * BLOCK_LEN).map(|i| (i % 251) as u8).collect();
        let mut corrupted = data.clone();
        corrupted[BLOCK_LEN as usize + 17] ^= 1;

        let mut piece = Piece::new(0, data.len() as u32, sha1_of(&data));
        retrieve_all(&mut piece, &corrupted);

        assert!(piece.is_complete());
        assert!(!piece.is_hash_matching());
    }

    #[test]
    fn reset_discards_data_and_state() {
        let data = vec![0xaa; BLOCK_LEN as usize];
        let mut piece = Piece::new(0, BLOCK_LEN, sha1_of(&data));
        retrieve_all(&mut piece, &data);
        assert!(piece.is_complete());

        piece.reset();
        assert!(!piece.is_complete());
        // blocks are requestable again, starting from the front
        assert_eq!(piece.next_request().unwrap().offset, 0);
    }

    #[test]
    fn unknown_offset_is_a_bookkeeping_error() {
        let mut piece = Piece::new(7, BLOCK_LEN, [0; 20]);
        let err = piece.block_received(12345, vec![0]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnknownBlock {
                piece_index: 7,
                offset: 12345
            }
        ));
    }
}
