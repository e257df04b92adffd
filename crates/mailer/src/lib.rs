//! Credential-recovery notification subsystem.
//!
//! Given a user identity and a one-time recovery token, this crate informs
//! the user by email and degrades gracefully when the outbound channel is
//! partially or fully unavailable: a pooled SMTP client is tried first, a
//! raw protocol client second, and an audit-log sink records the
//! notification when nothing could be transmitted. Every entry point
//! returns a [`DeliveryOutcome`]; the credential-reset workflow that
//! triggers a notification never fails because the channel is degraded.

use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod config;
pub mod error;
pub mod notify;
pub mod probe;
pub mod templates;
pub mod token;

pub use crate::config::{AppConfig, MailConfig, load_config, load_config_or_panic};
pub use crate::error::NotifyError;
pub use crate::notify::{
    AuditSink, DeliveryOutcome, DeliveryStatus, NotificationKind, NotificationRequest,
    RenderedNotification, TracingAuditSink, Transport,
};
pub use crate::token::{DEFAULT_TOKEN_LENGTH, generate_default_token, generate_reset_token};

use crate::notify::engine::DeliveryEngine;
use crate::notify::{PooledSmtp, RawSmtp};

static SHARED: OnceCell<Arc<Notifier>> = OnceCell::new();

/// The notification subsystem's shared resources: the validated
/// configuration and the delivery engine built from it.
///
/// Constructed once per process; the channel-usability fact is evaluated at
/// construction and never re-derived, so changing credentials requires a
/// restart.
pub struct Notifier {
    config: Arc<AppConfig>,
    engine: DeliveryEngine,
}

impl Notifier {
    /// Build a notifier from configuration.
    ///
    /// Never fails for channel reasons: an unusable or broken mail profile
    /// degrades to the audit-log sink.
    pub fn new(config: AppConfig) -> Self {
        let config = Arc::new(config);
        let sink: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);

        let engine = if config.mail.is_usable() {
            match PooledSmtp::from_config(&config.mail) {
                Ok(primary) => {
                    let mail = Arc::new(config.mail.clone());
                    DeliveryEngine::new(
                        Arc::new(primary),
                        Arc::new(RawSmtp::new(mail)),
                        sink,
                        config.mail.timeout(),
                    )
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "mail transport construction failed; notifications will be recorded to the audit log"
                    );
                    DeliveryEngine::disabled(sink)
                }
            }
        } else {
            tracing::info!(
                config = ?config.mail.redacted(),
                "mail channel not usable; notifications will be recorded to the audit log"
            );
            DeliveryEngine::disabled(sink)
        };

        Self { config, engine }
    }

    /// Build a notifier with injected transports and audit sink.
    ///
    /// Intended for embedding and tests. The usability rule still applies:
    /// an unusable profile routes everything to `sink` without touching the
    /// transports.
    pub fn with_transports(
        config: AppConfig,
        primary: Arc<dyn Transport>,
        fallback: Arc<dyn Transport>,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        let config = Arc::new(config);
        let engine = if config.mail.is_usable() {
            DeliveryEngine::new(primary, fallback, sink, config.mail.timeout())
        } else {
            DeliveryEngine::disabled(sink)
        };
        Self { config, engine }
    }

    /// Initialize the process-wide notifier, or return the existing one.
    ///
    /// The configuration passed to later calls is ignored; there is no
    /// runtime reconfiguration.
    pub fn init(config: AppConfig) -> Arc<Notifier> {
        SHARED
            .get_or_init(|| Arc::new(Notifier::new(config)))
            .clone()
    }

    /// The process-wide notifier, if [`Notifier::init`] has run.
    pub fn shared() -> Option<Arc<Notifier>> {
        SHARED.get().cloned()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Notify a user that a password reset was requested for their account.
    ///
    /// `reset_url` must carry the recovery token as a `token=` query
    /// parameter; the token is additionally displayed verbatim in the body
    /// so the user can complete the flow even if their mail client blocks
    /// link-clicking. When the channel is unusable the returned detail
    /// carries the reset URL so support staff can relay it manually.
    pub async fn request_password_reset_notification(
        &self,
        email: &str,
        username: &str,
        reset_url: &str,
    ) -> DeliveryOutcome {
        let mut fields = BTreeMap::new();
        fields.insert("recipient_name".to_string(), username.to_string());
        fields.insert("reset_url".to_string(), reset_url.to_string());
        if let Some(token) = extract_token_param(reset_url) {
            fields.insert("token".to_string(), token);
        }

        let request = NotificationRequest {
            kind: NotificationKind::ResetRequest,
            recipient_address: email.to_string(),
            recipient_display_name: username.to_string(),
            fields,
        };

        let mut outcome = self.notify(request).await;
        if outcome.status == DeliveryStatus::Logged {
            outcome.detail = format!(
                "mail channel not configured; reset link recorded to audit log: {reset_url}"
            );
        }
        outcome
    }

    /// Notify a user that their password reset completed.
    pub async fn confirm_password_reset_notification(
        &self,
        email: &str,
        username: &str,
    ) -> DeliveryOutcome {
        let fields = BTreeMap::from([
            ("recipient_name".to_string(), username.to_string()),
            ("login_url".to_string(), self.config.login_url()),
        ]);

        self.notify(NotificationRequest {
            kind: NotificationKind::ResetConfirmation,
            recipient_address: email.to_string(),
            recipient_display_name: username.to_string(),
            fields,
        })
        .await
    }

    /// Send a connectivity test message through the full delivery chain.
    pub async fn send_connectivity_test(&self, recipient: &str) -> DeliveryOutcome {
        self.notify(NotificationRequest {
            kind: NotificationKind::ConnectivityTest,
            recipient_address: recipient.to_string(),
            recipient_display_name: String::new(),
            fields: BTreeMap::new(),
        })
        .await
    }

    /// Render and dispatch one notification.
    pub async fn notify(&self, request: NotificationRequest) -> DeliveryOutcome {
        let parts = match templates::render(request.kind, &request.fields) {
            Ok(parts) => parts,
            Err(e) => {
                // A missing field is a caller bug, not a transport failure;
                // surface it in the outcome rather than panicking or
                // sending a half-rendered body.
                tracing::error!(
                    kind = request.kind.as_str(),
                    recipient = %request.recipient_address,
                    error = %e,
                    "notification could not be rendered"
                );
                return DeliveryOutcome::failed("notification could not be rendered", e);
            }
        };

        let note = RenderedNotification {
            kind: request.kind,
            recipient_address: request.recipient_address,
            recipient_display_name: request.recipient_display_name,
            subject: parts.subject,
            html_body: parts.html_body,
            text_body: parts.text_body,
        };

        self.engine.dispatch(&note).await
    }
}

/// Extract the `token` query parameter from a reset URL.
fn extract_token_param(reset_url: &str) -> Option<String> {
    let (_, rest) = reset_url.split_once("token=")?;
    let token = rest
        .split(['&', '#'])
        .next()
        .unwrap_or_default()
        .to_string();
    (!token.is_empty()).then_some(token)
}
