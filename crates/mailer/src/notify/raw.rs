//! Tier 2: the raw SMTP protocol client.
//!
//! A deliberately simple, single-shot session: connect, negotiate TLS as
//! configured, authenticate, submit the message, quit. Used only after the
//! pooled client failed with a connectivity-class error, so it shares no
//! state with the pool and opens a fresh connection each time.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use once_cell::sync::Lazy;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::config::MailConfig;
use crate::error::NotifyError;
use crate::notify::{RenderedNotification, Transport};

const MAX_REPLY_BYTES: usize = 16 * 1024;

static TLS_VERIFYING: Lazy<Arc<ClientConfig>> = Lazy::new(|| {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
});

static TLS_TRUSTING: Lazy<Arc<ClientConfig>> = Lazy::new(|| {
    Arc::new(
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertificateVerification(
                rustls::crypto::ring::default_provider(),
            )))
            .with_no_client_auth(),
    )
});

/// Accept-anything verifier for profiles with certificate validation turned
/// off (self-signed internal relays).
#[derive(Debug)]
struct NoCertificateVerification(rustls::crypto::CryptoProvider);

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls_pki_types::CertificateDer<'_>,
        _intermediates: &[rustls_pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// One SMTP reply, possibly spanning several continuation lines.
#[derive(Debug, PartialEq, Eq)]
struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    fn text(&self) -> String {
        self.lines.join(" ")
    }
}

/// Where in the session a reply was received; drives both the accepted
/// codes and the failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Greeting,
    Ehlo,
    StartTls,
    Auth,
    MailFrom,
    RcptTo,
    Data,
    Body,
}

impl Phase {
    fn accepts(self, code: u16) -> bool {
        match self {
            Phase::Greeting | Phase::StartTls => code == 220,
            Phase::Ehlo | Phase::MailFrom | Phase::Body => code == 250,
            Phase::Auth => code == 235,
            Phase::RcptTo => code == 250 || code == 251,
            Phase::Data => code == 354,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Phase::Greeting => "server greeting",
            Phase::Ehlo => "EHLO",
            Phase::StartTls => "STARTTLS",
            Phase::Auth => "AUTH",
            Phase::MailFrom => "MAIL FROM",
            Phase::RcptTo => "RCPT TO",
            Phase::Data => "DATA",
            Phase::Body => "message submission",
        }
    }
}

pub struct RawSmtp {
    mail: Arc<MailConfig>,
}

impl RawSmtp {
    pub fn new(mail: Arc<MailConfig>) -> Self {
        Self { mail }
    }

    async fn session<S>(
        &self,
        stream: &mut S,
        note: &RenderedNotification,
    ) -> Result<(), NotifyError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        expect_reply(stream, Phase::Greeting).await?;
        command(stream, "EHLO localhost", Phase::Ehlo).await?;
        self.submit(stream, note).await
    }

    async fn submit<S>(
        &self,
        stream: &mut S,
        note: &RenderedNotification,
    ) -> Result<(), NotifyError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        if self.mail.use_credentials {
            let identity = BASE64_STANDARD.encode(format!(
                "\0{}\0{}",
                self.mail.username, self.mail.password
            ));
            command(stream, &format!("AUTH PLAIN {identity}"), Phase::Auth).await?;
        }

        command(
            stream,
            &format!("MAIL FROM:<{}>", self.mail.from),
            Phase::MailFrom,
        )
        .await?;
        command(
            stream,
            &format!("RCPT TO:<{}>", note.recipient_address),
            Phase::RcptTo,
        )
        .await?;
        command(stream, "DATA", Phase::Data).await?;

        let payload = format_message(&self.mail, note);
        stream.write_all(payload.as_bytes()).await.map_err(io_transient)?;
        stream.write_all(b"\r\n.\r\n").await.map_err(io_transient)?;
        stream.flush().await.map_err(io_transient)?;
        expect_reply(stream, Phase::Body).await?;

        // Message accepted; QUIT is best effort.
        let _ = stream.write_all(b"QUIT\r\n").await;
        Ok(())
    }
}

#[async_trait]
impl Transport for RawSmtp {
    fn tier(&self) -> &'static str {
        "smtp-raw"
    }

    async fn send(&self, note: &RenderedNotification) -> Result<(), NotifyError> {
        let host = self.mail.server.clone();
        let tcp = TcpStream::connect((host.as_str(), self.mail.port))
            .await
            .map_err(|e| {
                NotifyError::ConnectivityTransient(format!(
                    "failed to connect to {host}:{}: {e}",
                    self.mail.port
                ))
            })?;

        if self.mail.implicit_tls {
            let mut stream = tls_upgrade(tcp, &host, self.mail.validate_certs).await?;
            self.session(&mut stream, note).await
        } else if self.mail.starttls {
            let mut stream = tcp;
            expect_reply(&mut stream, Phase::Greeting).await?;
            command(&mut stream, "EHLO localhost", Phase::Ehlo).await?;
            command(&mut stream, "STARTTLS", Phase::StartTls).await?;
            let mut stream = tls_upgrade(stream, &host, self.mail.validate_certs).await?;
            // No fresh greeting after the TLS upgrade; EHLO restarts the
            // session state instead.
            command(&mut stream, "EHLO localhost", Phase::Ehlo).await?;
            self.submit(&mut stream, note).await
        } else {
            let mut stream = tcp;
            self.session(&mut stream, note).await
        }
    }
}

async fn tls_upgrade<S>(
    stream: S,
    host: &str,
    validate_certs: bool,
) -> Result<tokio_rustls::client::TlsStream<S>, NotifyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let config = if validate_certs {
        TLS_VERIFYING.clone()
    } else {
        TLS_TRUSTING.clone()
    };
    let server_name = ServerName::try_from(host.to_string()).map_err(|e| {
        NotifyError::ConfigurationInvalid(format!("invalid TLS server name '{host}': {e}"))
    })?;
    TlsConnector::from(config)
        .connect(server_name, stream)
        .await
        .map_err(|e| {
            NotifyError::ConnectivityTransient(format!("TLS negotiation with {host} failed: {e}"))
        })
}

async fn command<S>(stream: &mut S, line: &str, phase: Phase) -> Result<Reply, NotifyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    stream
        .write_all(line.as_bytes())
        .await
        .map_err(io_transient)?;
    stream.write_all(b"\r\n").await.map_err(io_transient)?;
    stream.flush().await.map_err(io_transient)?;
    expect_reply(stream, phase).await
}

async fn expect_reply<S>(stream: &mut S, phase: Phase) -> Result<Reply, NotifyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let reply = read_reply(stream).await?;
    if phase.accepts(reply.code) {
        Ok(reply)
    } else {
        Err(classify_reply(phase, &reply))
    }
}

async fn read_reply<S>(stream: &mut S) -> Result<Reply, NotifyError>
where
    S: AsyncRead + Unpin + Send,
{
    let mut buf: Vec<u8> = Vec::with_capacity(256);
    let mut chunk = [0u8; 512];
    loop {
        if let Some(reply) = parse_reply(&buf) {
            return Ok(reply);
        }
        if buf.len() > MAX_REPLY_BYTES {
            return Err(NotifyError::Permanent("oversized SMTP reply".to_string()));
        }
        let n = stream.read(&mut chunk).await.map_err(io_transient)?;
        if n == 0 {
            return Err(NotifyError::ConnectivityTransient(
                "connection closed by server".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Parse a complete reply from `buf`, or `None` if more data is needed.
///
/// Multiline replies use `250-first` continuation lines terminated by a
/// `250 last` line.
fn parse_reply(buf: &[u8]) -> Option<Reply> {
    if !buf.ends_with(b"\r\n") {
        return None;
    }
    let text = String::from_utf8_lossy(buf);
    let lines: Vec<&str> = text.split("\r\n").filter(|l| !l.is_empty()).collect();
    let last = *lines.last()?;
    let bytes = last.as_bytes();
    if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }
    if bytes.len() > 3 && bytes[3] == b'-' {
        return None;
    }
    let code: u16 = last[..3].parse().ok()?;
    let lines = lines
        .iter()
        .map(|l| l.get(4..).unwrap_or("").to_string())
        .collect();
    Some(Reply { code, lines })
}

fn classify_reply(phase: Phase, reply: &Reply) -> NotifyError {
    let detail = format!(
        "{} rejected with {} {}",
        phase.describe(),
        reply.code,
        reply.text()
    );
    match reply.code {
        530 | 534 | 535 | 538 => NotifyError::AuthenticationFailed(detail),
        code if phase == Phase::Auth && code >= 500 => NotifyError::AuthenticationFailed(detail),
        code if phase == Phase::RcptTo && code >= 500 => NotifyError::RecipientRejected(detail),
        code if (400..500).contains(&code) => NotifyError::ConnectivityTransient(detail),
        _ => NotifyError::Permanent(detail),
    }
}

fn io_transient(e: std::io::Error) -> NotifyError {
    NotifyError::ConnectivityTransient(e.to_string())
}

/// Assemble the RFC 5322 message: headers, blank line, dot-stuffed HTML
/// body with CRLF line endings. The terminal `.` line is written by the
/// caller.
fn format_message(mail: &MailConfig, note: &RenderedNotification) -> String {
    let mut msg = String::new();
    if let Ok(date) =
        time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc2822)
    {
        msg.push_str(&format!("Date: {date}\r\n"));
    }
    if mail.from_name.trim().is_empty() {
        msg.push_str(&format!("From: <{}>\r\n", mail.from));
    } else {
        msg.push_str(&format!("From: {} <{}>\r\n", mail.from_name, mail.from));
    }
    if note.recipient_display_name.trim().is_empty() {
        msg.push_str(&format!("To: <{}>\r\n", note.recipient_address));
    } else {
        msg.push_str(&format!(
            "To: {} <{}>\r\n",
            note.recipient_display_name, note.recipient_address
        ));
    }
    msg.push_str(&format!("Subject: {}\r\n", note.subject));
    msg.push_str("MIME-Version: 1.0\r\n");
    msg.push_str("Content-Type: text/html; charset=utf-8\r\n");
    msg.push_str("\r\n");
    msg.push_str(&dot_stuff(&note.html_body));
    msg
}

fn dot_stuff(body: &str) -> String {
    body.lines()
        .map(|line| {
            if line.starts_with('.') {
                format!(".{line}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\r\n")
}
