use thiserror::Error;

/// Errors returned by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The provider cannot be reached at all (not logged in, bridge down, network, timeout).
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// The provider answered but refused the request.
    #[error("Rejected by provider: {0}")]
    Rejected(String),
}

/// Errors returned by a [`Storage`](crate::storage::Storage) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File not found: {path}")]
    NotFound { path: String },

    /// Absolute paths and `..` components are refused.
    #[error("Path escapes storage root: {path}")]
    InvalidPath { path: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Whole-job failures: the send loop is never entered.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// No transport client is registered.
    #[error("transport client unavailable")]
    NoTransport,

    /// The provider went away while recipients were being checked.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("attachment unavailable: {path}")]
    AttachmentUnavailable { path: String },

    #[error("attachment unreadable: {0}")]
    AttachmentUnreadable(#[source] StorageError),
}
