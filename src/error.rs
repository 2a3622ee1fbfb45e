//! Error types for the snapshot and recovery layer.

use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum SafeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Quota exceeded writing {key}: need {needed} bytes, quota is {quota}")]
    QuotaExceeded { key: String, needed: u64, quota: u64 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Store format version {found} is newer than supported version {supported}")]
    VersionConflict { found: u8, supported: u8 },

    #[error("Store is locked by another process")]
    Locked,
}

/// Coarse failure classes callers choose their fallback by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The durable store could not be opened or a write/read on it failed.
    StoreUnavailable,
    /// The fast primary store refused a write for lack of space.
    QuotaExceeded,
    /// A snapshot was missing or unreadable.
    CorruptOrMissingSnapshot,
}

impl SafeError {
    /// Classify this error for fallback selection.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SafeError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            SafeError::Corruption(_)
            | SafeError::ChecksumMismatch { .. }
            | SafeError::Deserialization(_) => ErrorKind::CorruptOrMissingSnapshot,
            SafeError::Io(_)
            | SafeError::Unavailable(_)
            | SafeError::Serialization(_)
            | SafeError::InvalidFormat(_)
            | SafeError::VersionConflict { .. }
            | SafeError::Locked => ErrorKind::StoreUnavailable,
        }
    }
}

impl From<serde_json::Error> for SafeError {
    fn from(e: serde_json::Error) -> Self {
        SafeError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for SafeError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        SafeError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SafeError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        SafeError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, SafeError>;
