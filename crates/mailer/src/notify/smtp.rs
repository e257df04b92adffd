//! Tier 1: the pooled SMTP transport client.
//!
//! Preferred because it reuses connections and reports structured errors.
//! Messages are multipart/alternative with both plain-text and HTML bodies.

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::PoolConfig;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use crate::config::MailConfig;
use crate::error::NotifyError;
use crate::notify::{RenderedNotification, Transport};

/// Connections held by the pool. Per-attempt timeouts, not the pool, bound
/// how long one slow recipient can hold a caller.
const POOL_MAX_CONNECTIONS: u32 = 4;

pub struct PooledSmtp {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl PooledSmtp {
    /// Build the pooled client from a usable profile.
    ///
    /// Construction does not open a connection; it only validates addresses
    /// and TLS parameters.
    pub fn from_config(mail: &MailConfig) -> Result<Self, NotifyError> {
        let sender = sender_mailbox(mail)?;
        let transport = build_transport(mail)?;
        Ok(Self { transport, sender })
    }
}

#[async_trait]
impl Transport for PooledSmtp {
    fn tier(&self) -> &'static str {
        "smtp-pool"
    }

    async fn send(&self, note: &RenderedNotification) -> Result<(), NotifyError> {
        let recipient = recipient_mailbox(note)?;

        let message = lettre::Message::builder()
            .from(self.sender.clone())
            .to(recipient)
            .subject(note.subject.clone())
            .header(lettre::message::header::MIME_VERSION_1_0)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(lettre::message::header::ContentType::TEXT_PLAIN)
                            .body(note.text_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(lettre::message::header::ContentType::TEXT_HTML)
                            .body(note.html_body.clone()),
                    ),
            )
            .map_err(|e| NotifyError::Permanent(format!("failed to build message: {e}")))?;

        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| classify_smtp_failure(e.is_permanent(), &e.to_string()))
    }
}

/// Build the lettre transport for the configured TLS mode and credentials.
pub(crate) fn build_transport(
    mail: &MailConfig,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
    let tls_parameters = if mail.implicit_tls || mail.starttls {
        let mut tls_builder = TlsParameters::builder(mail.server.clone());
        if !mail.validate_certs {
            tls_builder = tls_builder.dangerous_accept_invalid_certs(true);
        }
        Some(tls_builder.build().map_err(|e| {
            NotifyError::ConfigurationInvalid(format!("TLS configuration error: {e}"))
        })?)
    } else {
        None
    };

    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&mail.server)
        .port(mail.port)
        .timeout(Some(mail.timeout()))
        .pool_config(PoolConfig::new().max_size(POOL_MAX_CONNECTIONS));

    builder = match tls_parameters {
        Some(params) if mail.implicit_tls => builder.tls(Tls::Wrapper(params)),
        Some(params) => builder.tls(Tls::Required(params)),
        None => builder,
    };

    if mail.use_credentials {
        builder = builder.credentials(Credentials::new(
            mail.username.clone(),
            mail.password.clone(),
        ));
    }

    Ok(builder.build())
}

fn sender_mailbox(mail: &MailConfig) -> Result<Mailbox, NotifyError> {
    let address = mail.from.parse().map_err(|e| {
        NotifyError::ConfigurationInvalid(format!("invalid sender address '{}': {e}", mail.from))
    })?;
    let name = (!mail.from_name.trim().is_empty()).then(|| mail.from_name.clone());
    Ok(Mailbox::new(name, address))
}

fn recipient_mailbox(note: &RenderedNotification) -> Result<Mailbox, NotifyError> {
    let address = note.recipient_address.parse().map_err(|e| {
        NotifyError::RecipientRejected(format!(
            "invalid recipient address '{}': {e}",
            note.recipient_address
        ))
    })?;
    let name = (!note.recipient_display_name.trim().is_empty())
        .then(|| note.recipient_display_name.clone());
    Ok(Mailbox::new(name, address))
}

/// Classify a transport failure into the taxonomy driving the fallback
/// decision.
///
/// Permanent SMTP responses split into authentication (530/534/535/538) and
/// recipient (550-554) classes; transient responses and every
/// connection/TLS/timeout error count as connectivity failures eligible for
/// the next tier.
pub(crate) fn classify_smtp_failure(permanent: bool, text: &str) -> NotifyError {
    // Match codes on digit boundaries so a code inside an email address or
    // message-id does not trigger a false positive.
    let has_code = |code: &str| {
        text.split(|c: char| !c.is_ascii_digit())
            .any(|segment| segment == code)
    };
    let lowered = text.to_lowercase();

    if lowered.contains("authentication")
        || lowered.contains("credentials")
        || has_code("530")
        || has_code("534")
        || has_code("535")
        || has_code("538")
    {
        return NotifyError::AuthenticationFailed(text.to_string());
    }

    if permanent {
        if has_code("550") || has_code("551") || has_code("552") || has_code("553") || has_code("554")
        {
            NotifyError::RecipientRejected(text.to_string())
        } else {
            NotifyError::Permanent(text.to_string())
        }
    } else {
        NotifyError::ConnectivityTransient(text.to_string())
    }
}
