use std::fmt;

use crate::{PieceIndex, BLOCK_LEN};

/// The coordinates of one block: the unit of network request/response.
///
/// A block is a fixed size chunk of a piece, which in turn is a fixed size
/// chunk of the content. Downloading happens at this granularity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockInfo {
    /// The index of the piece of which this is a block.
    pub piece_index: PieceIndex,
    /// The zero-based byte offset into the piece.
    pub offset: u32,
    /// The block's length in bytes. Always 16 KiB or less.
    pub len: u32,
}

impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(piece: {} offset: {} len: {})",
            self.piece_index, self.offset, self.len
        )
    }
}

/// Returns the length in bytes of the piece at the given index.
///
/// All pieces but the last are exactly `piece_len`; the last piece covers
/// whatever remains of the file.
pub fn piece_len(total_len: u64, piece_len: u32, piece_index: PieceIndex) -> u32 {
    let piece_count = piece_count(total_len, piece_len);
    debug_assert!(piece_index < piece_count);
    if piece_index + 1 == piece_count {
        let remainder = total_len - piece_index as u64 * piece_len as u64;
        remainder as u32
    } else {
        piece_len
    }
}

/// Returns the number of pieces in a file of the given length.
pub fn piece_count(total_len: u64, piece_len: u32) -> usize {
    ((total_len + piece_len as u64 - 1) / piece_len as u64) as usize
}

/// Returns the number of blocks in a piece of the given length.
///
/// Every piece has at least one block, even when integer rounding of
/// a short last piece would suggest zero.
pub fn block_count(piece_len: u32) -> usize {
    ((piece_len as usize + (BLOCK_LEN as usize - 1)) / BLOCK_LEN as usize).max(1)
}

/// Returns the length of the block at the index within a piece of the given
/// length.
///
/// # Panics
///
/// Panics if the block offset would lie outside the piece.
pub fn block_len(piece_len: u32, block_index: usize) -> u32 {
    let block_offset = block_index as u32 * BLOCK_LEN;
    assert!(piece_len > block_offset);
    std::cmp::min(piece_len - block_offset, BLOCK_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    // An arbitrary piece length that is an exact multiple of the canonical
    // block length (16 KiB).
    const EVEN_PIECE_LEN: u32 = 2 * BLOCK_LEN;

    // A piece length that overlaps the nearest exact multiple by this much.
    const OVERLAP: u32 = 234;
    const UNEVEN_PIECE_LEN: u32 = 2 * BLOCK_LEN + OVERLAP;

    #[test]
    fn test_block_len() {
        assert_eq!(block_len(EVEN_PIECE_LEN, 0), BLOCK_LEN);
        assert_eq!(block_len(EVEN_PIECE_LEN, 1), BLOCK_LEN);

        assert_eq!(block_len(UNEVEN_PIECE_LEN, 0), BLOCK_LEN);
        assert_eq!(block_len(UNEVEN_PIECE_LEN, 1), BLOCK_LEN);
        assert_eq!(block_len(UNEVEN_PIECE_LEN, 2), OVERLAP);
    }

    #[test]
    #[should_panic]
    fn test_block_len_invalid_index_panic() {
        block_len(EVEN_PIECE_LEN, 2);
    }

    #[test]
    fn test_block_count() {
        assert_eq!(block_count(EVEN_PIECE_LEN), 2);
        assert_eq!(block_count(UNEVEN_PIECE_LEN), 3);
        // a last piece shorter than one block still has one block
        assert_eq!(block_count(OVERLAP), 1);
    }

    #[test]
    fn test_piece_geometry() {
        let total_len = 2 * EVEN_PIECE_LEN as u64 + 1000;
        assert_eq!(piece_count(total_len, EVEN_PIECE_LEN), 3);
        assert_eq!(piece_len(total_len, EVEN_PIECE_LEN, 0), EVEN_PIECE_LEN);
        assert_eq!(piece_len(total_len, EVEN_PIECE_LEN, 1), EVEN_PIECE_LEN);
        assert_eq!(piece_len(total_len, EVEN_PIECE_LEN, 2), 1000);

        // exact multiple: the last piece is full sized
        let total_len = 2 * EVEN_PIECE_LEN as u64;
        assert_eq!(piece_count(total_len, EVEN_PIECE_LEN), 2);
        assert_eq!(piece_len(total_len, EVEN_PIECE_LEN, 1), EVEN_PIECE_LEN);
    }
}
