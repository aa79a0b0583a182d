//! Error types for avflow.

use thiserror::Error;

/// Result type alias using avflow's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for avflow operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Buffer allocation failed (pool exhaustion or native allocator failure).
    ///
    /// Fatal to the current operation: the caller must not enqueue work for
    /// the buffer it failed to obtain.
    #[error("buffer allocation failed: {0}")]
    Allocation(String),

    /// A native media call returned an error code.
    #[error(transparent)]
    Native(#[from] NativeError),

    /// End of input reached.
    ///
    /// Not an error when looping is enabled; terminal otherwise.
    #[error("end of input")]
    EndOfInput,

    /// A workflow or handler is not registered under the given name.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation was cancelled through its context.
    ///
    /// Graceful termination; never surfaced as a node error event.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid options at construction time (bad URL, bad dict, unknown
    /// format). Fatal to node construction.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check whether this error is the graceful-cancellation marker.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Check whether this error is end-of-input.
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::EndOfInput)
    }
}

/// A wrapped native return code with its textual meaning.
///
/// Equality is defined by the integer code, so two errors produced at
/// different call sites compare equal when the underlying native code
/// matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeError {
    code: i32,
}

impl NativeError {
    /// Resource temporarily unavailable.
    pub const AGAIN: NativeError = NativeError::new(-11);
    /// Invalid argument.
    pub const INVALID: NativeError = NativeError::new(-22);
    /// I/O error.
    pub const IO: NativeError = NativeError::new(-5);
    /// Cannot allocate memory.
    pub const NO_MEMORY: NativeError = NativeError::new(-12);
    /// No such file or directory.
    pub const NOT_FOUND: NativeError = NativeError::new(-2);
    /// Broken pipe.
    pub const PIPE: NativeError = NativeError::new(-32);
    /// Immediate exit requested (interrupted blocking call).
    pub const EXIT: NativeError = NativeError::new(-1414092869);

    /// Create a native error from a raw return code.
    pub const fn new(code: i32) -> Self {
        Self { code }
    }

    /// The raw native return code.
    pub const fn code(&self) -> i32 {
        self.code
    }

    /// Check whether this error carries the same native code as `other`.
    pub fn is(&self, other: &NativeError) -> bool {
        self.code == other.code
    }
}

impl std::fmt::Display for NativeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match *self {
            NativeError::AGAIN => "Resource temporarily unavailable",
            NativeError::INVALID => "Invalid argument",
            NativeError::IO => "I/O error",
            NativeError::NO_MEMORY => "Cannot allocate memory",
            NativeError::NOT_FOUND => "No such file or directory",
            NativeError::PIPE => "Broken pipe",
            NativeError::EXIT => "Immediate exit requested",
            _ => return write!(f, "native error code {}", self.code),
        };
        f.write_str(msg)
    }
}

impl std::error::Error for NativeError {}
