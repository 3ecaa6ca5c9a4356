//! SMTP relay transport backed by `lettre`

use std::time::Duration;

use async_trait::async_trait;
use courier_common::outgoing;
use courier_store::{Payload, Security, TransportParams};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
    message::{
        Attachment, Mailbox, MultiPart, SinglePart,
        header::{ContentType, HeaderName, HeaderValue},
    },
    transport::smtp::authentication::Credentials,
};
use serde::Deserialize;

use crate::{
    error::{SendError, TransportFailure},
    transport::{Connection, Transport},
};

fn default_host() -> String {
    "localhost".to_string()
}

const fn default_port() -> u16 {
    25
}

const fn default_security() -> Security {
    Security::Plaintext
}

const fn default_timeout() -> u64 {
    60
}

/// Default connection settings for the SMTP relay
///
/// Per-message [`TransportParams`] override these field by field.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_security")]
    pub security: Security,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Per-command timeout (in seconds); expiry defers the message
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Sender used for payloads without a `from` address
    #[serde(default)]
    pub default_from: Option<String>,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            security: default_security(),
            username: None,
            password: None,
            timeout_secs: default_timeout(),
            default_from: None,
        }
    }
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("default_from", &self.default_from)
            .finish()
    }
}

impl SmtpConfig {
    /// The effective settings for a message carrying `params`
    #[must_use]
    pub fn merged(&self, params: Option<&TransportParams>) -> Self {
        let Some(params) = params else {
            return self.clone();
        };

        Self {
            host: params.host.clone().unwrap_or_else(|| self.host.clone()),
            port: params.port.unwrap_or(self.port),
            security: params.security.unwrap_or(self.security),
            username: params.username.clone().or_else(|| self.username.clone()),
            password: params.password.clone().or_else(|| self.password.clone()),
            timeout_secs: self.timeout_secs,
            default_from: self.default_from.clone(),
        }
    }
}

/// Where a lettre error happened; network errors while connecting are
/// connection failures, afterwards they are socket failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Connect,
    Send,
}

/// SMTP status codes that mean the credentials were refused
const AUTH_CODES: [u16; 4] = [530, 534, 535, 538];

/// Enhanced status codes (RFC 3463) that blame the envelope sender
const SENDER_STATUSES: [&str; 3] = ["5.1.7", "5.1.8", "4.1.8"];

fn classify(error: &lettre::transport::smtp::Error, stage: Stage) -> SendError {
    let detail = error.to_string();

    if error.is_timeout() {
        return TransportFailure::Timeout(detail).into();
    }

    if error.is_transient() || error.is_permanent() {
        let code = error
            .status()
            .and_then(|code| code.to_string().parse::<u16>().ok());

        return match code {
            Some(code) if AUTH_CODES.contains(&code) => {
                TransportFailure::AuthenticationFailed(detail)
            }
            _ if SENDER_STATUSES.iter().any(|status| detail.contains(status)) => {
                TransportFailure::SenderRefused(detail)
            }
            _ => TransportFailure::RecipientsRefused(detail),
        }
        .into();
    }

    if error.is_client() {
        return SendError::Internal(detail);
    }

    match stage {
        Stage::Connect => TransportFailure::ConnectionFailed(detail).into(),
        Stage::Send => TransportFailure::Socket(detail).into(),
    }
}

fn invalid(error: impl std::fmt::Display) -> SendError {
    SendError::InvalidMessage(error.to_string())
}

fn mailbox(address: &str) -> Result<Mailbox, SendError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| SendError::InvalidMessage(format!("{address}: {e}")))
}

/// Turn a queued payload into a MIME message
///
/// # Errors
/// [`SendError::InvalidMessage`] when an address, header or content type
/// does not parse, or there is no sender at all
pub fn build_message(
    payload: &Payload,
    default_from: Option<&str>,
) -> Result<lettre::Message, SendError> {
    let from = payload
        .from
        .as_deref()
        .or(default_from)
        .ok_or_else(|| SendError::InvalidMessage("no sender address".to_string()))?;

    let mut builder = lettre::Message::builder()
        .from(mailbox(from)?)
        .subject(payload.subject.as_str());

    for to in &payload.to {
        builder = builder.to(mailbox(to)?);
    }

    for bcc in &payload.bcc {
        builder = builder.bcc(mailbox(bcc)?);
    }

    for (name, value) in &payload.headers {
        let name = HeaderName::new_from_ascii(name.clone()).map_err(invalid)?;
        builder = builder.raw_header(HeaderValue::new(name, value.clone()));
    }

    let text = match &payload.html_body {
        Some(html) => {
            MultiPart::alternative_plain_html(payload.body.clone(), html.clone())
        }
        None if payload.attachments.is_empty() => {
            return builder.body(payload.body.clone()).map_err(invalid);
        }
        None => MultiPart::mixed().singlepart(SinglePart::plain(payload.body.clone())),
    };

    if payload.attachments.is_empty() {
        return builder.multipart(text).map_err(invalid);
    }

    let mut mixed = if payload.html_body.is_some() {
        MultiPart::mixed().multipart(text)
    } else {
        text
    };

    for attachment in &payload.attachments {
        let content_type = ContentType::parse(&attachment.content_type).map_err(invalid)?;
        mixed = mixed.singlepart(
            Attachment::new(attachment.filename.clone())
                .body(attachment.data.clone(), content_type),
        );
    }

    builder.multipart(mixed).map_err(invalid)
}

/// Relays mail through one SMTP server per set of transport parameters
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    config: SmtpConfig,
}

impl SmtpTransport {
    #[must_use]
    pub const fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn mailer(config: &SmtpConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, SendError> {
        let builder = match config.security {
            Security::Plaintext => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(config.host.as_str())
            }
            Security::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                    .map_err(|e| classify(&e, Stage::Connect))?
            }
            Security::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| classify(&e, Stage::Connect))?,
        };

        let builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        let builder = match (&config.username, &config.password) {
            (Some(username), password) => builder.credentials(Credentials::new(
                username.clone(),
                password.clone().unwrap_or_default(),
            )),
            (None, _) => builder,
        };

        Ok(builder.build())
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn open(
        &self,
        params: Option<&TransportParams>,
    ) -> Result<Box<dyn Connection>, SendError> {
        let config = self.config.merged(params);
        let mailer = Self::mailer(&config)?;

        outgoing!(
            level = DEBUG,
            "Connecting to {}:{} ({:?})",
            config.host,
            config.port,
            config.security
        );

        match mailer.test_connection().await {
            Ok(true) => Ok(Box::new(SmtpConnection {
                mailer,
                default_from: config.default_from,
            })),
            Ok(false) => Err(TransportFailure::ConnectionFailed(format!(
                "{}:{} did not accept a session",
                config.host, config.port
            ))
            .into()),
            Err(e) => Err(classify(&e, Stage::Connect)),
        }
    }
}

struct SmtpConnection {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    default_from: Option<String>,
}

#[async_trait]
impl Connection for SmtpConnection {
    async fn send(&mut self, payload: &Payload) -> Result<(), SendError> {
        let message = build_message(payload, self.default_from.as_deref())?;

        let response = self
            .mailer
            .send(message)
            .await
            .map_err(|e| classify(&e, Stage::Send))?;

        outgoing!(
            level = DEBUG,
            "Relay accepted '{}': {}",
            payload.subject,
            response.code()
        );

        Ok(())
    }
}
