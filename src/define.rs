use bitvec::prelude::{BitVec, Msb0};

/// A SHA-1 hash digest, 20 bytes long.
pub type Sha1Hash = [u8; 20];

/// The peer ID is an arbitrary 20 byte string.
///
/// [`Guidelines for choosing a peer ID`](http://bittorrent.org/beps/bep_0020.html).
pub type PeerId = [u8; 20];

/// The index of a piece within the torrent, in the range `[0, piece count)`.
pub type PieceIndex = usize;

/// A peer's piece availability, one bit per piece index.
///
/// The high bit of the first byte is piece 0, hence the most significant
/// bit ordering.
pub type Bitfield = BitVec<u8, Msb0>;

/// The unit of network transfer: pieces are requested in blocks of 16 KiB,
/// except possibly the trailing block of the last piece.
pub const BLOCK_LEN: u32 = 0x4000;
