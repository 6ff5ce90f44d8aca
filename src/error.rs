/// Error types for the ip2cc library
use std::fmt;

/// Result type alias for ip2cc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ip2cc operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed CIDR text (bad address, missing slash, length out of range)
    InvalidCidr(String),

    /// Malformed IP address text
    InvalidAddress(String),

    /// Wrong address family for the target trie or index file
    FamilyMismatch,

    /// Index file does not start with the expected magic bytes
    BadMagic,

    /// Index file carries a format version this reader does not understand
    UnsupportedVersion(u32),

    /// Index file is truncated or structurally corrupt
    TruncatedIndex(String),

    /// No snapshot exists for the requested date
    SnapshotNotFound(String),

    /// The snapshot store holds no usable snapshots at all
    NoSnapshots,

    /// A per-country fetch from the prefix source failed
    SourceFailure {
        /// Lower-case country code the fetch was for
        country: String,
        /// Human-readable cause
        cause: String,
    },

    /// Build cancelled, or an unrecoverable write failure mid-build
    BuildAborted(String),

    /// I/O errors
    Io(String),

    /// HTTP transport or registry API errors
    Http(String),

    /// JSON encoding/decoding errors
    Json(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidCidr(msg) => write!(f, "invalid CIDR: {}", msg),
            Error::InvalidAddress(msg) => write!(f, "invalid IP address: {}", msg),
            Error::FamilyMismatch => write!(f, "IP version mismatch"),
            Error::BadMagic => write!(f, "invalid index magic"),
            Error::UnsupportedVersion(v) => write!(f, "unsupported index version {}", v),
            Error::TruncatedIndex(msg) => write!(f, "corrupt index: {}", msg),
            Error::SnapshotNotFound(date) => write!(f, "snapshot for {} not found", date),
            Error::NoSnapshots => write!(f, "no snapshots available"),
            Error::SourceFailure { country, cause } => {
                write!(f, "fetch failed for {}: {}", country, cause)
            }
            Error::BuildAborted(msg) => write!(f, "build aborted: {}", msg),
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
            Error::Http(msg) => write!(f, "HTTP error: {}", msg),
            Error::Json(msg) => write!(f, "JSON error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}
