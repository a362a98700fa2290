use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A JSON column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row holds a value the domain types cannot represent.
    #[error("Corrupt job row {id}: {reason}")]
    CorruptRow { id: String, reason: String },

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// The job left `scheduled` and can no longer be edited.
    #[error("Job {id} is {status} and can no longer be changed")]
    NotEditable { id: String, status: String },

    /// The job is being delivered right now.
    #[error("Job {id} is being delivered")]
    Running { id: String },

    /// Another thread panicked while holding the store connection.
    #[error("Job store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
