use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlasterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Invalid recipient {raw:?}: {reason}")]
    InvalidRecipient { raw: String, reason: String },

    #[error("Schedule rejected: {0}")]
    ScheduleRejected(String),
}

impl BlasterError {
    /// Short error code string returned in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            BlasterError::Config(_) => "CONFIG_ERROR",
            BlasterError::InvalidJob(_) => "INVALID_JOB",
            BlasterError::InvalidRecipient { .. } => "INVALID_RECIPIENT",
            BlasterError::ScheduleRejected(_) => "SCHEDULE_REJECTED",
        }
    }
}

pub type Result<T> = std::result::Result<T, BlasterError>;
