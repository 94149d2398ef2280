use crate::reply::State;

/// Errors produced while framing a command.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// Keys must carry at least one byte.
    #[error("rate limit key is empty")]
    EmptyKey,

    /// The backend refuses keys longer than [`crate::MAX_KEY_LEN`] bytes.
    #[error("rate limit key is {len} bytes, more than 65535")]
    KeyTooLong { len: usize },

    /// The framed command differs from its precomputed size.
    ///
    /// This is always an arithmetic defect in the encoder, never bad input.
    #[error("command buffer error: wrote {written} bytes, expected {expected}")]
    LengthMismatch { expected: usize, written: usize },

    #[error("failed to write command: {0}")]
    Write(#[from] std::io::Error),
}

/// A reply byte that the decoder did not accept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid reply byte {byte:#04x} at offset {offset} while in state {state:?}")]
pub struct ProtocolError {
    /// Decoder state at the time of the failure.
    pub state: State,
    /// The offending byte.
    pub byte: u8,
    /// Offset of the byte within the chunk passed to `decode`.
    pub offset: usize,
}
