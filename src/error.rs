//! Error types for webmail-gateway

use crate::smtp::SmtpStage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Mailbox not found: {0}")]
    MailboxNotFound(String),

    #[error("Message {id} not found in {mailbox}")]
    MessageNotFound { mailbox: String, id: u32 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("SMTP {stage} rejected: {response}")]
    Submission { stage: SmtpStage, response: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Contact store error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classify an `async-imap` failure that happened while `context`
    /// was in flight.
    ///
    /// Tagged `NO`/`BAD` replies to a well-formed command and
    /// unparseable server output both count as protocol errors here;
    /// callers that know better (LOGIN, SELECT) map `NO` themselves.
    pub(crate) fn imap(context: &str, err: async_imap::error::Error) -> Self {
        use async_imap::error::Error as ImapError;

        match err {
            ImapError::Io(e) => Self::Connection(format!("{context}: {e}")),
            ImapError::ConnectionLost => Self::Connection(format!("{context}: connection lost")),
            other => Self::Protocol(format!("{context}: {other}")),
        }
    }
}
