pub type Result<T, E = BencodeError> = std::result::Result<T, E>;

/// Errors raised while decoding a bencoded byte buffer.
///
/// These are format errors: fatal to the document being decoded, never to
/// the process.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum BencodeError {
    #[error("unexpected end of input at byte {0}")]
    /// The buffer ended in the middle of a value.
    UnexpectedEof(usize),

    #[error("unexpected byte {byte:#04x} at {pos}")]
    /// The lookahead byte does not start any bencode value.
    UnexpectedByte { byte: u8, pos: usize },

    #[error("malformed integer literal at byte {0}")]
    /// Empty integer, `-0`, or a leading zero on a non-zero value.
    InvalidInteger(usize),

    #[error("integer out of 64-bit signed range at byte {0}")]
    /// The literal does not fit an `i64`.
    IntegerOverflow(usize),

    #[error("malformed string length prefix at byte {0}")]
    /// A string length that is not a decimal number followed by `:`.
    InvalidLength(usize),

    #[error("string declares {declared} bytes but only {available} remain")]
    /// Fewer bytes available than the string prefix declares. This is a
    /// fatal error, not a short read.
    TruncatedString { declared: usize, available: usize },

    #[error("dictionary key at byte {0} is not a string")]
    /// Dictionary keys must decode to byte strings.
    NonStringKey(usize),

    #[error("{0} trailing bytes after the top-level value")]
    /// Garbage appended to an otherwise complete value is rejected rather
    /// than silently truncated.
    TrailingBytes(usize),
}
