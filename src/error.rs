//! Error types for the LI log parser library.

/// Result type alias for LI log operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when decoding or converting LI log streams.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Arguments were inconsistent (e.g. an unknown channel index)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Not enough input data to fulfill the request. Provide more bytes
    /// with `put` and retry; never a terminal failure.
    #[error("need more source data")]
    NeedMoreData,

    /// The destination buffer is too small for the requested value
    #[error("destination buffer too small")]
    SmallDestination,

    /// The data is not a valid LI binary log stream (bad magic, framing
    /// violation, malformed header)
    #[error("bad format: {0}")]
    BadFormat(String),

    /// The stream is structurally valid but its contents violate a decode
    /// invariant (marker-field mismatch, undeclared channel, inconsistent
    /// descriptor strings)
    #[error("corrupt stream: {0}")]
    Corrupt(String),

    /// Defined but unsupported feature (e.g. multi-segment V2 messages)
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// I/O error while reading input or writing converted output
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A descriptor string in the stream was not valid UTF-8
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl Error {
    /// True for the retry signal emitted when the engine needs more input.
    pub fn is_need_more_data(&self) -> bool {
        matches!(self, Error::NeedMoreData)
    }
}
