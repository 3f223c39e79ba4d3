//! SMTP worker
//!
//! Submits one message per call over a dedicated SMTP session. The
//! transaction is driven stage by stage on a lettre connection so a
//! rejection can be reported together with the stage that produced
//! it.

use crate::config::{SmtpConfig, TlsMode};
use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use lettre::Address;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox as Recipient, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{AsyncSmtpConnection, TlsParameters};
use lettre::transport::smtp::commands::{Data, Mail, Rcpt};
use lettre::transport::smtp::extension::ClientId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const AUTH_MECHANISMS: &[Mechanism] = &[Mechanism::Plain, Mechanism::Login];

/// The step of an SMTP transaction a rejection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SmtpStage {
    Greeting,
    StartTls,
    Auth,
    MailFrom,
    RcptTo,
    Data,
    Message,
}

impl fmt::Display for SmtpStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Greeting => "greeting",
            Self::StartTls => "STARTTLS",
            Self::Auth => "AUTH",
            Self::MailFrom => "MAIL FROM",
            Self::RcptTo => "RCPT TO",
            Self::Data => "DATA",
            Self::Message => "message",
        })
    }
}

/// A file attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingAttachment {
    pub filename: String,
    /// MIME type; defaults to `application/octet-stream`.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Base64-encoded content.
    pub content: String,
}

/// A message to submit, built from the request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<OutgoingAttachment>,
}

/// A validated message ready for the wire.
struct Prepared {
    sender: Address,
    recipients: Vec<Address>,
    formatted: Vec<u8>,
}

impl OutgoingMessage {
    /// Check the payload and render it, without touching the network.
    fn prepare(&self) -> Result<Prepared> {
        if self.from.trim().is_empty() {
            return Err(Error::Validation("sender is empty".into()));
        }
        if self.to.iter().all(|r| r.trim().is_empty()) {
            return Err(Error::Validation("at least one recipient is required".into()));
        }

        let from = parse_mailbox(&self.from)?;
        let to = parse_all(&self.to)?;
        let cc = parse_all(&self.cc)?;

        let mut builder = Message::builder().from(from.clone()).subject(self.subject.clone());
        for r in &to {
            builder = builder.to(r.clone());
        }
        for r in &cc {
            builder = builder.cc(r.clone());
        }

        let built = if self.attachments.is_empty() {
            builder
                .header(ContentType::TEXT_PLAIN)
                .body(self.body.clone())
        } else {
            let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(self.body.clone()));
            for attachment in &self.attachments {
                parts = parts.singlepart(attachment.to_part()?);
            }
            builder.multipart(parts)
        };
        let message =
            built.map_err(|e| Error::Validation(format!("cannot build message: {e}")))?;

        Ok(Prepared {
            sender: from.email,
            recipients: to.into_iter().chain(cc).map(|r| r.email).collect(),
            formatted: message.formatted(),
        })
    }
}

impl OutgoingAttachment {
    fn to_part(&self) -> Result<SinglePart> {
        let content = BASE64
            .decode(self.content.trim())
            .map_err(|e| Error::Validation(format!("attachment {}: {e}", self.filename)))?;
        let content_type = ContentType::parse(
            self.content_type
                .as_deref()
                .unwrap_or("application/octet-stream"),
        )
        .map_err(|e| Error::Validation(format!("attachment {}: {e}", self.filename)))?;

        Ok(Attachment::new(self.filename.clone()).body(content, content_type))
    }
}

fn parse_mailbox(raw: &str) -> Result<Recipient> {
    raw.trim()
        .parse()
        .map_err(|e| Error::Validation(format!("invalid address '{raw}': {e}")))
}

fn parse_all(raw: &[String]) -> Result<Vec<Recipient>> {
    raw.iter()
        .filter(|r| !r.trim().is_empty())
        .map(|r| parse_mailbox(r))
        .collect()
}

/// Map a lettre failure at `stage` onto the gateway taxonomy.
fn classify(stage: SmtpStage, err: &lettre::transport::smtp::Error) -> Error {
    if err.is_permanent() || err.is_transient() || err.is_client() {
        Error::Submission {
            stage,
            response: err.to_string(),
        }
    } else if err.is_response() {
        Error::Protocol(format!("SMTP {stage}: {err}"))
    } else {
        Error::Connection(format!("SMTP {stage}: {err}"))
    }
}

/// Per-request SMTP worker for the configured account.
pub struct SmtpWorker<'a> {
    config: &'a SmtpConfig,
}

impl<'a> SmtpWorker<'a> {
    #[must_use]
    pub const fn new(config: &'a SmtpConfig) -> Self {
        Self { config }
    }

    /// Submit `payload` and wait for the server to accept it.
    ///
    /// Validation happens before any connection is attempted. The
    /// worker never retries.
    ///
    /// # Errors
    ///
    /// `Validation` for a malformed payload, `Submission` when the
    /// server rejects a stage, `Connection` for transport failures.
    pub async fn send_message(&self, payload: &OutgoingMessage) -> Result<()> {
        let prepared = payload.prepare()?;

        let mut conn = self.open().await?;
        let outcome = Self::transact(&mut conn, &prepared).await;

        if outcome.is_ok() {
            if let Err(e) = conn.quit().await {
                warn!("SMTP quit failed after acceptance: {}", e);
            }
        } else {
            conn.abort().await;
        }

        if outcome.is_ok() {
            info!(
                "Submitted message from {} to {} recipient(s)",
                prepared.sender,
                prepared.recipients.len()
            );
        }
        outcome
    }

    fn tls_parameters(&self) -> Result<TlsParameters> {
        TlsParameters::builder(self.config.host.clone())
            .dangerous_accept_invalid_certs(self.config.accept_invalid_certs)
            .build()
            .map_err(|e| Error::Connection(format!("SMTP TLS setup failed: {e}")))
    }

    async fn open(&self) -> Result<AsyncSmtpConnection> {
        let hello = ClientId::Domain("localhost".to_string());
        let implicit = match self.config.tls {
            TlsMode::Implicit => Some(self.tls_parameters()?),
            TlsMode::StartTls | TlsMode::Off => None,
        };

        debug!(
            "Connecting to SMTP server at {}:{} ({:?})",
            self.config.host, self.config.port, self.config.tls
        );
        let mut conn = AsyncSmtpConnection::connect_tokio1(
            (self.config.host.as_str(), self.config.port),
            Some(COMMAND_TIMEOUT),
            &hello,
            implicit,
            None,
        )
        .await
        .map_err(|e| classify(SmtpStage::Greeting, &e))?;

        if self.config.tls == TlsMode::StartTls {
            conn.starttls(self.tls_parameters()?, &hello)
                .await
                .map_err(|e| classify(SmtpStage::StartTls, &e))?;
        }

        let credentials =
            Credentials::new(self.config.username.clone(), self.config.password.clone());
        conn.auth(AUTH_MECHANISMS, &credentials)
            .await
            .map_err(|e| classify(SmtpStage::Auth, &e))?;

        Ok(conn)
    }

    async fn transact(conn: &mut AsyncSmtpConnection, prepared: &Prepared) -> Result<()> {
        conn.command(Mail::new(Some(prepared.sender.clone()), vec![]))
            .await
            .map_err(|e| classify(SmtpStage::MailFrom, &e))?;

        for recipient in &prepared.recipients {
            debug!("RCPT TO {}", recipient);
            conn.command(Rcpt::new(recipient.clone(), vec![]))
                .await
                .map_err(|e| classify(SmtpStage::RcptTo, &e))?;
        }

        conn.command(Data)
            .await
            .map_err(|e| classify(SmtpStage::Data, &e))?;
        conn.message(&prepared.formatted)
            .await
            .map_err(|e| classify(SmtpStage::Message, &e))?;

        Ok(())
    }
}
