use crate::error::engine::EngineError;

pub type Result<T, E = TorrentError> = std::result::Result<T, E>;

/// Errors that abort the download as a whole.
#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("{0}")]
    /// Could not set up the piece manager or its output file.
    Engine(#[from] EngineError),

    #[error("no tracker reachable and no peers left to try")]
    /// Every announce attempt failed while the peer queue stayed empty.
    NoPeers,

    #[error("download was stopped before completion")]
    /// An explicit stop request terminated the swarm.
    Stopped,
}
