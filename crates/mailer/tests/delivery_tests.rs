//! End-to-end delivery engine scenarios with injected transports.

use async_trait::async_trait;
use recovery_mailer::config::{AppConfig, MailConfig};
use recovery_mailer::{
    AuditSink, DeliveryStatus, NotifyError, Notifier, RenderedNotification, Transport,
};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    FailTransient,
    FailAuth,
    FailRecipient,
    Hang,
}

/// Scriptable transport recording every send.
struct MockTransport {
    name: &'static str,
    behavior: Behavior,
    calls: AtomicU32,
    sent: Mutex<Vec<(String, String)>>,
}

impl MockTransport {
    fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior,
            calls: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn tier(&self) -> &'static str {
        self.name
    }

    async fn send(&self, note: &RenderedNotification) -> Result<(), NotifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Succeed => {
                self.sent
                    .lock()
                    .unwrap()
                    .push((note.subject.clone(), note.text_body.clone()));
                Ok(())
            }
            Behavior::FailTransient => Err(NotifyError::ConnectivityTransient(
                "connection refused".to_string(),
            )),
            Behavior::FailAuth => Err(NotifyError::AuthenticationFailed(
                "535 5.7.8 authentication failed".to_string(),
            )),
            Behavior::FailRecipient => Err(NotifyError::RecipientRejected(
                "550 5.1.1 no such user".to_string(),
            )),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

/// Audit sink capturing recorded notifications for assertions.
#[derive(Default)]
struct RecordingSink {
    entries: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingSink {
    fn record(&self, note: &RenderedNotification, reason: &str) {
        self.entries.lock().unwrap().push(format!(
            "{reason} {} {} {}",
            note.recipient_address, note.subject, note.text_body
        ));
    }
}

fn usable_config() -> AppConfig {
    AppConfig {
        frontend_url: "https://portal.example.com".to_string(),
        mail: MailConfig {
            server: "smtp.example.com".to_string(),
            username: "mailer@example.com".to_string(),
            password: "app-password".to_string(),
            from: "noreply@example.com".to_string(),
            ..MailConfig::default()
        },
    }
}

fn disabled_config() -> AppConfig {
    let mut config = usable_config();
    config.mail.enabled = false;
    config
}

struct Harness {
    notifier: Notifier,
    primary: Arc<MockTransport>,
    fallback: Arc<MockTransport>,
    sink: Arc<RecordingSink>,
}

fn harness(config: AppConfig, primary: Behavior, fallback: Behavior) -> Harness {
    let primary = MockTransport::new("mock-primary", primary);
    let fallback = MockTransport::new("mock-fallback", fallback);
    let sink = Arc::new(RecordingSink::default());
    let notifier = Notifier::with_transports(
        config,
        primary.clone(),
        fallback.clone(),
        sink.clone(),
    );
    Harness {
        notifier,
        primary,
        fallback,
        sink,
    }
}

#[tokio::test]
async fn disabled_channel_logs_notification_with_token() {
    let h = harness(disabled_config(), Behavior::Succeed, Behavior::Succeed);

    let outcome = h
        .notifier
        .request_password_reset_notification("a@b.com", "Ann", "https://x/reset?token=T1")
        .await;

    assert_eq!(outcome.status, DeliveryStatus::Logged);
    // The reset link is surfaced to the caller for manual recovery.
    assert!(outcome.detail.contains("T1"));

    // No network tier was attempted.
    assert_eq!(h.primary.calls(), 0);
    assert_eq!(h.fallback.calls(), 0);

    // The audit record holds the full body, token included.
    let entries = h.sink.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].contains("T1"));
    assert!(entries[0].contains("a@b.com"));
}

#[tokio::test]
async fn primary_success_needs_no_fallback_and_no_audit_record() {
    let h = harness(usable_config(), Behavior::Succeed, Behavior::Succeed);

    let outcome = h
        .notifier
        .request_password_reset_notification("ann@example.com", "Ann", "https://x/reset?token=tok1")
        .await;

    assert_eq!(outcome.status, DeliveryStatus::Sent);
    assert_eq!(h.primary.calls(), 1);
    assert_eq!(h.fallback.calls(), 0);
    assert!(h.sink.entries().is_empty());

    let sent = h.primary.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "Password Reset Request");
    assert!(sent[0].1.contains("tok1"));
}

#[tokio::test]
async fn transient_failure_invokes_fallback_exactly_once() {
    let h = harness(usable_config(), Behavior::FailTransient, Behavior::Succeed);

    let outcome = h
        .notifier
        .request_password_reset_notification("ann@example.com", "Ann", "https://x/reset?token=tok2")
        .await;

    assert_eq!(outcome.status, DeliveryStatus::SentViaFallback);
    assert_eq!(h.primary.calls(), 1, "primary must not be retried");
    assert_eq!(h.fallback.calls(), 1);
    assert!(h.sink.entries().is_empty());
    assert!(h.fallback.sent()[0].1.contains("tok2"));
}

#[tokio::test]
async fn authentication_failure_never_falls_back() {
    let h = harness(usable_config(), Behavior::FailAuth, Behavior::Succeed);

    let outcome = h
        .notifier
        .request_password_reset_notification("ann@example.com", "Ann", "https://x/reset?token=tok3")
        .await;

    assert_eq!(outcome.status, DeliveryStatus::Failed);
    assert_eq!(h.fallback.calls(), 0);
    assert!(
        outcome
            .diagnostic_error
            .as_deref()
            .is_some_and(|e| e.contains("authentication"))
    );
    // The notification still reached the audit log for manual recovery.
    let entries = h.sink.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].contains("tok3"));
}

#[tokio::test]
async fn recipient_rejection_never_falls_back() {
    let h = harness(usable_config(), Behavior::FailRecipient, Behavior::Succeed);

    let outcome = h
        .notifier
        .request_password_reset_notification("gone@example.com", "Ann", "https://x/reset?token=tok4")
        .await;

    assert_eq!(outcome.status, DeliveryStatus::Failed);
    assert_eq!(h.fallback.calls(), 0);
    assert_eq!(h.sink.entries().len(), 1);
}

#[tokio::test]
async fn exhausted_tiers_fail_into_the_audit_log() {
    let h = harness(
        usable_config(),
        Behavior::FailTransient,
        Behavior::FailTransient,
    );

    let outcome = h
        .notifier
        .request_password_reset_notification("ann@example.com", "Ann", "https://x/reset?token=tok5")
        .await;

    assert_eq!(outcome.status, DeliveryStatus::Failed);
    assert_eq!(h.primary.calls(), 1);
    assert_eq!(h.fallback.calls(), 1);
    let entries = h.sink.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].contains("tok5"));
}

#[tokio::test(start_paused = true)]
async fn hung_primary_is_bounded_by_the_configured_timeout() {
    let h = harness(usable_config(), Behavior::Hang, Behavior::Succeed);
    let timeout = Duration::from_secs(10);

    let started = tokio::time::Instant::now();
    let outcome = h
        .notifier
        .request_password_reset_notification("ann@example.com", "Ann", "https://x/reset?token=tok6")
        .await;
    let elapsed = started.elapsed();

    assert_eq!(outcome.status, DeliveryStatus::SentViaFallback);
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn hung_tiers_terminate_within_twice_the_timeout() {
    let h = harness(usable_config(), Behavior::Hang, Behavior::Hang);
    let timeout = Duration::from_secs(10);

    let started = tokio::time::Instant::now();
    let outcome = h
        .notifier
        .request_password_reset_notification("ann@example.com", "Ann", "https://x/reset?token=tok7")
        .await;
    let elapsed = started.elapsed();

    assert_eq!(outcome.status, DeliveryStatus::Failed);
    assert!(elapsed >= 2 * timeout);
    assert!(elapsed < 2 * timeout + Duration::from_secs(1));
    assert_eq!(h.sink.entries().len(), 1);
}

#[tokio::test]
async fn confirmation_notification_carries_the_login_url() {
    let h = harness(usable_config(), Behavior::Succeed, Behavior::Succeed);

    let outcome = h
        .notifier
        .confirm_password_reset_notification("ann@example.com", "Ann")
        .await;

    assert_eq!(outcome.status, DeliveryStatus::Sent);
    let sent = h.primary.sent();
    assert_eq!(sent[0].0, "Password Reset Successful");
    assert!(sent[0].1.contains("https://portal.example.com/login"));
}

#[tokio::test]
async fn reset_url_without_token_is_a_caller_contract_violation() {
    let h = harness(usable_config(), Behavior::Succeed, Behavior::Succeed);

    let outcome = h
        .notifier
        .request_password_reset_notification("ann@example.com", "Ann", "https://x/reset")
        .await;

    assert_eq!(outcome.status, DeliveryStatus::Failed);
    assert!(
        outcome
            .diagnostic_error
            .as_deref()
            .is_some_and(|e| e.contains("token"))
    );
    // Nothing was rendered, so neither the tiers nor the sink saw it.
    assert_eq!(h.primary.calls(), 0);
    assert!(h.sink.entries().is_empty());
}

#[tokio::test]
async fn connectivity_test_flows_through_the_chain() {
    let h = harness(usable_config(), Behavior::FailTransient, Behavior::Succeed);

    let outcome = h.notifier.send_connectivity_test("ops@example.com").await;

    assert_eq!(outcome.status, DeliveryStatus::SentViaFallback);
    assert_eq!(h.fallback.sent()[0].0, "Connectivity Test");
}
