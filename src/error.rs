//! Error types for chitra-scan

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Specific device fault reported through status bits
///
/// Lets the host distinguish "nothing in the feeder" from a genuine
/// hardware fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Paper jammed in the document feeder
    PaperJam,
    /// Document cover or feeder lid open
    CoverOpen,
    /// Feeder selected but no paper loaded
    NoPaper,
    /// Unspecified hardware fault (fatal-error status bit)
    Hardware,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FaultKind::PaperJam => "paper jam",
            FaultKind::CoverOpen => "cover open",
            FaultKind::NoPaper => "no paper in feeder",
            FaultKind::Hardware => "hardware fault",
        };
        f.write_str(s)
    }
}

/// chitra-scan error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error on the underlying channel
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel did not deliver data before the timeout
    #[error("Communication timeout")]
    Timeout,

    /// Channel delivered fewer bytes than requested
    #[error("Short transfer: wanted {wanted}, got {got}")]
    ShortTransfer {
        /// Bytes requested
        wanted: usize,
        /// Bytes actually transferred
        got: usize,
    },

    /// Response did not start with a recognized marker byte
    #[error("Unexpected response marker: {0:#04x}")]
    UnexpectedMarker(u8),

    /// Device answered with a negative acknowledgment (unsupported command)
    #[error("Command rejected by device")]
    CommandRejected,

    /// Declared response length does not match what the device delivered
    #[error("Length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch {
        /// Length declared in the response header
        declared: usize,
        /// Length actually received
        actual: usize,
    },

    /// Device still warming up after the bounded retry budget
    #[error("Device busy (still warming up after retries)")]
    Busy,

    /// Fatal device condition reported through status bits
    #[error("Device fault: {0}")]
    Fault(FaultKind),

    /// Requested scan rectangle reduces to zero area
    #[error("Requested scan area is empty")]
    EmptyArea,

    /// Invalid parameter in a scan request
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Requested feature not supported by this device
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Scan cancelled by the host; terminal session outcome, not a failure
    #[error("Scan cancelled")]
    Cancelled,

    /// Session operation called in the wrong state
    #[error("Invalid session state: {0}")]
    InvalidState(&'static str),

    /// Device name not present in the registry
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Identity response carried a command-level tag this engine does not know
    #[error("Unknown command level: {0}")]
    UnknownCommandLevel(String),

    /// Configuration file parse error
    #[error("Configuration error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration file serialization error
    #[error("Configuration error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

impl Error {
    /// True for conditions the engine may recover from with a bounded
    /// sleep-and-retry (device warming up / not ready yet).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Busy)
    }
}
