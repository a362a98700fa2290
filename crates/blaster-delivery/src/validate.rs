use blaster_core::{FailureKind, PhoneRules};
use tracing::{debug, warn};

use crate::{
    error::{DeliveryError, TransportError},
    transport::Transport,
};

/// Verdict for one recipient after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Passed format and reachability; `address` is the send form.
    Sendable { address: String },
    Rejected {
        reason: FailureKind,
        detail: Option<String>,
    },
}

/// Format check plus one reachability round-trip per well-formed number.
pub struct RecipientValidator {
    rules: PhoneRules,
}

impl RecipientValidator {
    pub fn new(rules: PhoneRules) -> Self {
        Self { rules }
    }

    /// Send-form address, or the format rejection. Never touches the network.
    pub fn normalize(&self, raw: &str) -> Result<String, Verdict> {
        self.rules.to_send_form(raw).map_err(|e| Verdict::Rejected {
            reason: FailureKind::Format,
            detail: Some(e.to_string()),
        })
    }

    /// Ask the provider whether a normalized `address` has an account.
    ///
    /// An unavailable provider comes back as
    /// [`DeliveryError::TransportUnavailable`] so the caller can tell an
    /// outage from an answer; any other provider error only rejects this
    /// recipient.
    pub async fn check(
        &self,
        transport: &dyn Transport,
        address: &str,
    ) -> Result<Verdict, DeliveryError> {
        match transport.is_reachable(address).await {
            Ok(true) => {
                debug!(address, "recipient reachable");
                Ok(Verdict::Sendable {
                    address: address.to_string(),
                })
            }
            Ok(false) => {
                debug!(address, "recipient not on provider");
                Ok(Verdict::Rejected {
                    reason: FailureKind::NotReachable,
                    detail: None,
                })
            }
            Err(TransportError::Unavailable(msg)) => Err(DeliveryError::TransportUnavailable(msg)),
            Err(e) => {
                warn!(address, error = %e, "reachability check failed");
                Ok(Verdict::Rejected {
                    reason: FailureKind::Transport,
                    detail: Some(e.to_string()),
                })
            }
        }
    }
}
