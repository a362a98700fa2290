//! `blaster-scheduler`: durable broadcast jobs and their timers.
//!
//! # Overview
//!
//! Jobs live in a SQLite `broadcast_jobs` table behind the [`store::JobStore`]
//! trait. The [`engine::JobScheduler`] keeps one Tokio timer per scheduled
//! job; when a timer fires it pushes a [`engine::FiredJob`] onto the delivery
//! queue. There is no polling loop: on startup
//! [`engine::JobScheduler::recover_pending`] re-arms every persisted job that
//! is still `scheduled`, failing the ones whose window already passed.
//!
//! # Fire windows
//!
//! | `scheduled_at` vs now      | Behaviour                                |
//! |----------------------------|------------------------------------------|
//! | in the future              | timer sleeps until then                  |
//! | up to `grace` in the past  | fires immediately                        |
//! | beyond `grace`             | failed with "missed schedule window"     |
//!
//! Jobs that end without reaching the delivery worker (missed, cancelled)
//! and attachments dropped by an edit are handed to an
//! [`engine::AttachmentSweeper`] for file cleanup.

pub mod db;
pub mod draft;
pub mod engine;
pub mod error;
pub mod report;
pub mod schedule;
pub mod store;

pub use draft::{JobDraft, ValidDraft};
pub use engine::{ArmOutcome, AttachmentSweeper, FiredJob, JobScheduler, Recovery};
pub use error::{Result, SchedulerError};
pub use report::{ResultReporter, MISSED_WINDOW_REASON};
pub use store::{JobStore, SqliteJobStore};
