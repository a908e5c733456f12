use crate::error::bencode::BencodeError;
use reqwest::Error as HttpError;

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;

/// Errors that discard one tracker response.
///
/// Fatal only to this announce round; the next round starts from scratch.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("{0}")]
    Bencode(#[from] BencodeError),

    #[error("{0}")]
    Http(#[from] HttpError),

    #[error("tracker response is not a dictionary")]
    NotADictionary,

    #[error("tracker response is missing key `{0}`")]
    MissingKey(&'static str),

    #[error("tracker response key `{0}` has the wrong type")]
    WrongType(&'static str),

    #[error("compact `peers` length {0} is not a multiple of 6")]
    MalformedCompactPeers(usize),
}
