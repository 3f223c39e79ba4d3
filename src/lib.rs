//! Webmail gateway core
//!
//! The mail-protocol worker layer behind a single-account webmail
//! gateway. Each operation opens its own IMAP or SMTP session,
//! performs one logical operation, and closes the session again; no
//! connection outlives the call that opened it.
//!
//! Workers are built from an immutable [`ServerInfo`]. The
//! [`Gateway`] type bundles them behind the calls a request
//! dispatcher needs, and [`ContactsWorker`] keeps a small address
//! book on disk.

mod config;
mod connection;
mod contacts;
mod error;
mod flag;
mod gateway;
mod imap;
mod mailbox;
mod message;
mod smtp;

pub use config::{ImapConfig, ServerInfo, SmtpConfig, TlsMode};
pub use contacts::{Contact, ContactInput, ContactsWorker};
pub use error::{Error, Result};
pub use flag::Flag;
pub use gateway::Gateway;
pub use imap::ImapWorker;
pub use mailbox::Mailbox;
pub use message::{MessageBody, MessageSummary};
pub use smtp::{OutgoingAttachment, OutgoingMessage, SmtpStage, SmtpWorker};
