//! Non-sending connectivity and authentication check.
//!
//! Used by health checks and support tooling only; the delivery path never
//! probes first, because the fallback chain already classifies failures and
//! probing would double the latency of every send.

use tokio::time::timeout;

use crate::config::AppConfig;
use crate::error::NotifyError;
use crate::notify::smtp::{build_transport, classify_smtp_failure};
use crate::notify::{DeliveryOutcome, DeliveryStatus};

/// Stable detail codes for the probe outcomes.
pub const PROBE_DISABLED: &str = "channel-disabled";
pub const PROBE_OK: &str = "probe-ok";
pub const PROBE_AUTH_FAILED: &str = "auth-failed";
pub const PROBE_UNREACHABLE: &str = "unreachable";

/// Open a connection to the configured relay, authenticate if configured,
/// and close without sending anything.
///
/// Like every other entry point this returns an outcome instead of an
/// error: `Logged`/`channel-disabled` when the profile is unusable, `Sent`/
/// `probe-ok` on success, `Failed` with `auth-failed` or `unreachable`
/// otherwise.
pub async fn probe(config: &AppConfig) -> DeliveryOutcome {
    let mail = &config.mail;
    if !mail.is_usable() {
        return DeliveryOutcome::logged(PROBE_DISABLED);
    }

    tracing::debug!(config = ?mail.redacted(), "probing mail channel");

    let transport = match build_transport(mail) {
        Ok(transport) => transport,
        Err(e) => return DeliveryOutcome::failed(PROBE_UNREACHABLE, e),
    };

    match timeout(mail.timeout(), transport.test_connection()).await {
        Ok(Ok(true)) => DeliveryOutcome {
            status: DeliveryStatus::Sent,
            detail: PROBE_OK.to_string(),
            diagnostic_error: None,
        },
        Ok(Ok(false)) => DeliveryOutcome::failed(PROBE_UNREACHABLE, "server rejected NOOP"),
        Ok(Err(e)) => match classify_smtp_failure(e.is_permanent(), &e.to_string()) {
            err @ NotifyError::AuthenticationFailed(_) => {
                DeliveryOutcome::failed(PROBE_AUTH_FAILED, err)
            }
            err => DeliveryOutcome::failed(PROBE_UNREACHABLE, err),
        },
        Err(_) => DeliveryOutcome::failed(
            PROBE_UNREACHABLE,
            format!("connection attempt timed out after {:?}", mail.timeout()),
        ),
    }
}
