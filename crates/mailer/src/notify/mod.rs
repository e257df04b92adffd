//! Outbound notification delivery.
//!
//! This module is organized into submodules:
//! - `engine` - the delivery-tier state machine and audit sink
//! - `smtp` - tier 1, the pooled SMTP transport client
//! - `raw` - tier 2, the raw SMTP protocol client

pub mod engine;
pub mod raw;
pub mod smtp;

pub use engine::{AuditSink, DeliveryEngine, TracingAuditSink, Transport};
pub use raw::RawSmtp;
pub use smtp::PooledSmtp;

use serde::Serialize;
use std::collections::BTreeMap;

/// The three notification kinds the subsystem can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ResetRequest,
    ResetConfirmation,
    ConnectivityTest,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ResetRequest => "reset-request",
            NotificationKind::ResetConfirmation => "reset-confirmation",
            NotificationKind::ConnectivityTest => "connectivity-test",
        }
    }
}

/// A single notification to deliver, created and consumed within one
/// request's scope.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub kind: NotificationKind,
    pub recipient_address: String,
    pub recipient_display_name: String,
    /// Named placeholders consumed by the renderer for this kind.
    pub fields: BTreeMap<String, String>,
}

/// A rendered notification, ready for any transport tier.
#[derive(Clone)]
pub struct RenderedNotification {
    pub kind: NotificationKind,
    pub recipient_address: String,
    pub recipient_display_name: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

/// Terminal state of a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Delivered through the primary transport.
    Sent,
    /// Delivered through the raw-protocol fallback.
    SentViaFallback,
    /// Channel unusable; the notification was recorded to the audit log.
    Logged,
    /// All eligible tiers failed; the notification was recorded to the
    /// audit log.
    Failed,
}

/// What happened to a notification. Always returned, never thrown: the
/// credential-reset workflow that triggered the notification must not fail
/// because the channel is degraded.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    pub status: DeliveryStatus,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic_error: Option<String>,
}

impl DeliveryOutcome {
    pub fn sent(detail: impl Into<String>) -> Self {
        Self {
            status: DeliveryStatus::Sent,
            detail: detail.into(),
            diagnostic_error: None,
        }
    }

    pub fn sent_via_fallback(detail: impl Into<String>) -> Self {
        Self {
            status: DeliveryStatus::SentViaFallback,
            detail: detail.into(),
            diagnostic_error: None,
        }
    }

    pub fn logged(detail: impl Into<String>) -> Self {
        Self {
            status: DeliveryStatus::Logged,
            detail: detail.into(),
            diagnostic_error: None,
        }
    }

    pub fn failed(detail: impl Into<String>, error: impl ToString) -> Self {
        Self {
            status: DeliveryStatus::Failed,
            detail: detail.into(),
            diagnostic_error: Some(error.to_string()),
        }
    }
}
