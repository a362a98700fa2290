//! Attachment loading for the send loop.
//!
//! Files are read only when a job fires, never when it is scheduled, and are
//! deleted once the job reaches a terminal outcome: an upload belongs to a
//! single delivery attempt. The worker deletes them after reporting; jobs
//! that never reach the worker are swept through [`AttachmentSweeper`].

use std::sync::Arc;

use blaster_core::{Attachment, JobId};
use blaster_scheduler::AttachmentSweeper;
use tracing::{debug, warn};

use crate::{
    error::{DeliveryError, StorageError},
    storage::Storage,
    transport::MediaPayload,
};

#[derive(Clone)]
pub struct AttachmentResolver {
    storage: Arc<dyn Storage>,
}

impl AttachmentResolver {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Load every attachment, in list order.
    ///
    /// All or nothing: the first missing file fails the whole job.
    pub async fn resolve(
        &self,
        attachments: &[Attachment],
    ) -> Result<Vec<MediaPayload>, DeliveryError> {
        let mut payloads = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let bytes = match self.storage.read(&attachment.storage_path).await {
                Ok(bytes) => bytes,
                Err(StorageError::NotFound { path }) => {
                    return Err(DeliveryError::AttachmentUnavailable { path })
                }
                Err(e) => return Err(DeliveryError::AttachmentUnreadable(e)),
            };
            if bytes.len() as u64 != attachment.size_bytes {
                debug!(
                    path = %attachment.storage_path,
                    expected = attachment.size_bytes,
                    actual = bytes.len(),
                    "attachment size differs from upload metadata"
                );
            }
            payloads.push(MediaPayload {
                bytes,
                mime_type: attachment.mime_type.clone(),
                display_name: attachment.display_name.clone(),
            });
        }
        Ok(payloads)
    }

    /// Delete the stored files. Failures are logged and skipped.
    pub async fn cleanup(&self, attachments: &[Attachment]) {
        for attachment in attachments {
            if let Err(e) = self.storage.delete(&attachment.storage_path).await {
                warn!(path = %attachment.storage_path, error = %e, "attachment cleanup failed");
            }
        }
    }
}

impl AttachmentSweeper for AttachmentResolver {
    /// Deletes on a spawned task; outside a runtime the files are left in place.
    fn sweep(&self, job_id: &JobId, attachments: Vec<Attachment>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(job_id = %job_id, "no runtime to sweep attachments, files kept");
            return;
        };
        let resolver = self.clone();
        let job_id = job_id.clone();
        runtime.spawn(async move {
            resolver.cleanup(&attachments).await;
            debug!(job_id = %job_id, count = attachments.len(), "attachments swept");
        });
    }
}
