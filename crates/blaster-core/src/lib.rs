//! `blaster-core`: shared types for the scheduled WhatsApp broadcast engine.

pub mod config;
pub mod error;
pub mod event;
pub mod phone;
pub mod types;

pub use error::{BlasterError, Result};
pub use event::{EventSink, JobStatusEvent, NullSink, JOB_STATUS_EVENT};
pub use phone::{PhoneError, PhoneRules};
pub use types::{
    Attachment, BroadcastJob, DeliveryOutcome, DeliveryResult, FailedRecipient, FailureKind,
    JobId, JobStatus, JobType,
};
