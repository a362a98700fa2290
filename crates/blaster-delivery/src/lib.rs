//! `blaster-delivery`: executes fired broadcast jobs.
//!
//! A job runs in three stages on the single [`worker::DeliveryWorker`]:
//!
//! 1. **Validating**: attachments are loaded, every recipient is format
//!    checked and, if well formed, looked up on the provider.
//! 2. **Sending**: each reachable recipient gets the text, then every
//!    attachment, paced by the [`throttle::Throttler`].
//! 3. **Finalizing**: the outcome goes to the result reporter, which writes
//!    the terminal status before the status event is emitted; attachment
//!    files are removed afterwards.
//!
//! A provider outage during validation only fails the recipients it hit;
//! the job aborts when no reachability check got an answer at all. On
//! shutdown the running job stops at its next pause and the partial result
//! is recorded.

pub mod attach;
pub mod error;
pub mod executor;
pub mod http;
pub mod storage;
pub mod throttle;
pub mod transport;
pub mod validate;
pub mod worker;

pub use attach::AttachmentResolver;
pub use error::{DeliveryError, StorageError, TransportError};
pub use executor::DeliveryExecutor;
pub use http::HttpTransport;
pub use storage::{FsStorage, Storage};
pub use throttle::Throttler;
pub use transport::{MediaPayload, Transport, TransportSlot};
pub use validate::{RecipientValidator, Verdict};
pub use worker::DeliveryWorker;
