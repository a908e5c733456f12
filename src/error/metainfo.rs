use crate::error::bencode::BencodeError;

pub type Result<T, E = MetainfoError> = std::result::Result<T, E>;

/// Errors raised while interpreting a decoded torrent descriptor.
///
/// Distinct from [`BencodeError`]: the bytes decoded fine, but the document
/// is not a valid torrent descriptor.
#[derive(Debug, thiserror::Error)]
pub enum MetainfoError {
    #[error("{0}")]
    /// The descriptor is not even well formed bencode.
    Bencode(#[from] BencodeError),

    #[error("required key `{0}` is missing")]
    /// A key the descriptor must carry is absent.
    MissingKey(&'static str),

    #[error("key `{0}` has the wrong type")]
    /// The key is present but its value is of another bencode type.
    WrongType(&'static str),

    #[error("`pieces` length {0} is not a multiple of 20")]
    /// The piece hash list must be a concatenation of 20 byte digests.
    InvalidPieces(usize),

    #[error("invalid `length` value")]
    /// Single file torrents must declare a positive file length.
    InvalidLength,

    #[error("`name` is not a plain file name")]
    /// The descriptor's name would escape the output directory.
    InvalidName,

    #[error("invalid tracker url")]
    /// The announce URL failed to parse.
    InvalidTrackerUrl,

    #[error("no usable HTTP tracker in the descriptor")]
    /// Neither `announce` nor `announce-list` produced an HTTP(S) URL.
    NoTrackers,
}

impl From<url::ParseError> for MetainfoError {
    fn from(_: url::ParseError) -> Self {
        Self::InvalidTrackerUrl
    }
}
