use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::TransportError;

/// A file loaded into memory, ready to be handed to the provider.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub display_name: String,
}

impl fmt::Debug for MediaPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaPayload")
            .field("bytes", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Messaging provider capable of checking and reaching a phone number.
///
/// Addresses are send-form numbers (country prefix + subscriber digits);
/// provider-specific suffixes are the implementation's business.
/// Implementations must be `Send + Sync` so they can live in a
/// [`TransportSlot`] shared between the gateway and the delivery worker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stable lowercase identifier used in logs (e.g. `"whatsapp-http"`).
    fn name(&self) -> &str;

    /// Whether `address` has an account on the provider.
    async fn is_reachable(&self, address: &str) -> Result<bool, TransportError>;

    async fn send_text(&self, address: &str, body: &str) -> Result<(), TransportError>;

    async fn send_media(&self, address: &str, media: &MediaPayload) -> Result<(), TransportError>;
}

/// Shared handle to the single transport client.
///
/// An empty slot means the client is missing (never configured, or logged
/// out); jobs that fire in that state fail without attempting any send.
#[derive(Clone, Default)]
pub struct TransportSlot {
    inner: Arc<RwLock<Option<Arc<dyn Transport>>>>,
}

impl TransportSlot {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let slot = Self::default();
        slot.set(transport);
        slot
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn set(&self, transport: Arc<dyn Transport>) {
        tracing::info!(transport = transport.name(), "transport client registered");
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(transport);
    }

    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::warn!("transport client removed");
    }

    pub fn current(&self) -> Option<Arc<dyn Transport>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        self.current().is_some()
    }
}
