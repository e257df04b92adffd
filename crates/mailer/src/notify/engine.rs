//! The delivery-tier state machine.
//!
//! Tiers are tried strictly in order: the pooled transport client, the raw
//! protocol client, and finally the audit-log sink. Only transient
//! connectivity failures move the machine to the next transport tier; an
//! authentication or recipient rejection fails the same way on every tier,
//! so the machine goes straight to the sink. Every path ends in a
//! [`DeliveryOutcome`]; nothing transport-related escapes as an error.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::NotifyError;
use crate::notify::{DeliveryOutcome, RenderedNotification};

/// One candidate delivery mechanism in the fallback chain.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short tier name used in logs and outcome details.
    fn tier(&self) -> &'static str;

    async fn send(&self, note: &RenderedNotification) -> Result<(), NotifyError>;
}

/// Terminal sink recording a notification that could not be transmitted.
pub trait AuditSink: Send + Sync {
    fn record(&self, note: &RenderedNotification, reason: &str);
}

/// Production sink: logs the fully rendered notification (token included,
/// since recovery must remain completable) at WARN on the `audit` target,
/// which survives the default `info` filter and is grepable by support
/// staff.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, note: &RenderedNotification, reason: &str) {
        tracing::warn!(
            target: "audit",
            kind = note.kind.as_str(),
            recipient = %note.recipient_address,
            subject = %note.subject,
            reason = reason,
            body = %note.text_body,
            "notification recorded to audit log instead of delivered"
        );
    }
}

struct Tiers {
    primary: Arc<dyn Transport>,
    fallback: Arc<dyn Transport>,
}

/// Stateless across calls; the only shared state is the read-only
/// configuration captured at construction, so concurrent dispatches need no
/// locking.
pub struct DeliveryEngine {
    tiers: Option<Tiers>,
    sink: Arc<dyn AuditSink>,
    attempt_timeout: Duration,
}

impl DeliveryEngine {
    pub fn new(
        primary: Arc<dyn Transport>,
        fallback: Arc<dyn Transport>,
        sink: Arc<dyn AuditSink>,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            tiers: Some(Tiers { primary, fallback }),
            sink,
            attempt_timeout,
        }
    }

    /// Engine for an unusable channel: every dispatch goes straight to the
    /// audit sink.
    pub fn disabled(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            tiers: None,
            sink,
            attempt_timeout: Duration::from_secs(1),
        }
    }

    /// Run the fallback chain for one rendered notification.
    pub async fn dispatch(&self, note: &RenderedNotification) -> DeliveryOutcome {
        let Some(tiers) = &self.tiers else {
            self.sink.record(note, "channel-unusable");
            return DeliveryOutcome::logged(
                "mail channel not configured; notification recorded to audit log",
            );
        };

        match self.attempt(tiers.primary.as_ref(), note).await {
            Ok(()) => {
                tracing::info!(
                    kind = note.kind.as_str(),
                    recipient = %note.recipient_address,
                    tier = tiers.primary.tier(),
                    "notification delivered"
                );
                DeliveryOutcome::sent(format!("delivered via {}", tiers.primary.tier()))
            }
            Err(primary_err) if primary_err.is_transient() => {
                tracing::warn!(
                    kind = note.kind.as_str(),
                    recipient = %note.recipient_address,
                    tier = tiers.primary.tier(),
                    error = %primary_err,
                    "primary delivery tier failed with transient error; invoking fallback"
                );
                match self.attempt(tiers.fallback.as_ref(), note).await {
                    Ok(()) => {
                        tracing::info!(
                            kind = note.kind.as_str(),
                            recipient = %note.recipient_address,
                            tier = tiers.fallback.tier(),
                            "notification delivered via fallback"
                        );
                        DeliveryOutcome::sent_via_fallback(format!(
                            "delivered via {} after {} failed",
                            tiers.fallback.tier(),
                            tiers.primary.tier()
                        ))
                    }
                    Err(fallback_err) => {
                        tracing::error!(
                            kind = note.kind.as_str(),
                            recipient = %note.recipient_address,
                            error = %fallback_err,
                            "all delivery tiers exhausted"
                        );
                        self.sink.record(note, "tiers-exhausted");
                        DeliveryOutcome::failed(
                            "all delivery tiers failed; notification recorded to audit log",
                            fallback_err,
                        )
                    }
                }
            }
            Err(primary_err) => {
                // Permanent failure: retrying on another tier cannot fix a
                // rejected credential or recipient.
                tracing::error!(
                    kind = note.kind.as_str(),
                    recipient = %note.recipient_address,
                    tier = tiers.primary.tier(),
                    error = %primary_err,
                    "permanent delivery failure; fallback not eligible"
                );
                self.sink.record(note, "permanent-failure");
                DeliveryOutcome::failed(
                    "permanent delivery failure; notification recorded to audit log",
                    primary_err,
                )
            }
        }
    }

    async fn attempt(
        &self,
        tier: &dyn Transport,
        note: &RenderedNotification,
    ) -> Result<(), NotifyError> {
        match timeout(self.attempt_timeout, tier.send(note)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::ConnectivityTransient(format!(
                "{} tier timed out after {:?}",
                tier.tier(),
                self.attempt_timeout
            ))),
        }
    }
}
