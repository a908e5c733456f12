use crate::error::engine::EngineError;

pub type Result<T, E = PeerError> = std::result::Result<T, E>;

/// Errors that end a single peer session.
///
/// None of these are fatal to the overall download: the session closes, its
/// availability entry is released and the worker waits for its next peer.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("peer's info hash did not match ours")]
    /// The handshake reply carried a different info hash; we would be
    /// talking to the wrong swarm.
    InvalidInfoHash,

    #[error("expected a bitfield as the first message")]
    /// According to the protocol the bitfield is only accepted directly
    /// after the handshake; any other first message severs the connection.
    NoBitfield,

    #[error("received a bitfield outside of the handshake phase")]
    /// A repeated bitfield later in the stream is a protocol violation.
    BitfieldNotAfterHandshake,

    #[error("bitfield covers {got} pieces, torrent has {want}")]
    /// The advertised bitfield cannot describe this torrent.
    InvalidBitfield { got: usize, want: usize },

    #[error("peer closed the connection")]
    /// The framed stream ended mid-session.
    ConnectionClosed,

    #[error("timeout while {0}")]
    /// A connect or read deadline elapsed.
    Timeout(&'static str),

    #[error("{0}")]
    /// Engine bookkeeping rejected something this session reported.
    Engine(#[from] EngineError),

    #[error("{0}")]
    /// An IO error occurred. Unknown message ids surface here as
    /// `InvalidData` from the codec.
    Io(#[from] std::io::Error),
}
