use crate::PieceIndex;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Bookkeeping invariant violations reported by the piece manager.
///
/// These indicate a logic defect in the session that reported them and are
/// fatal to that session, never to the download as a whole.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("peer {} was never added", hex::encode(.0))]
    /// `update_peer` or `remove_peer` for a peer without a prior `add_peer`.
    UnknownPeer(crate::PeerId),

    #[error("piece {0} is not being downloaded")]
    /// A block arrived for a piece that is not in the ongoing set.
    UnknownPiece(PieceIndex),

    #[error("piece {piece_index} has no block at offset {offset}")]
    /// A block arrived with an offset that matches none of the piece's
    /// blocks.
    UnknownBlock { piece_index: PieceIndex, offset: u32 },

    #[error("{0}")]
    /// Failed to allocate or write the output file.
    Io(#[from] std::io::Error),
}
