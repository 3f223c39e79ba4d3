//! Message records produced by the IMAP worker

use crate::error::{Error, Result};
use crate::flag::Flag;
use async_imap::types::Fetch;
use mail_parser::MessageParser;
use serde::Serialize;

/// Summary metadata for one message in a mailbox.
///
/// `id` is the message UID. It is only meaningful for the mailbox it
/// was listed from and should be re-resolved on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSummary {
    pub id: u32,
    pub from: String,
    pub subject: String,
    pub date: String,
    pub flags: Vec<Flag>,
}

impl MessageSummary {
    #[must_use]
    pub fn is_seen(&self) -> bool {
        self.flags.contains(&Flag::Seen)
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.flags.contains(&Flag::Deleted)
    }

    /// Build a summary from a `UID FETCH (UID FLAGS ENVELOPE)` item.
    pub(crate) fn from_fetch(fetch: &Fetch) -> Result<Self> {
        let id = fetch
            .uid
            .ok_or_else(|| Error::Protocol(format!("FETCH {} carried no UID", fetch.message)))?;
        let flags = fetch.flags().map(Flag::from).collect();

        let Some(envelope) = fetch.envelope() else {
            return Ok(Self {
                id,
                from: String::new(),
                subject: String::new(),
                date: String::new(),
                flags,
            });
        };

        let from = envelope
            .from
            .as_ref()
            .and_then(|addrs| addrs.first())
            .map(|addr| {
                format_address(
                    addr.name.as_deref(),
                    addr.mailbox.as_deref(),
                    addr.host.as_deref(),
                )
            })
            .unwrap_or_default();

        Ok(Self {
            id,
            from,
            subject: lossy(envelope.subject.as_deref()),
            date: lossy(envelope.date.as_deref()),
            flags,
        })
    }
}

/// The text payload of one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageBody {
    pub id: u32,
    pub text: String,
}

impl MessageBody {
    /// Extract the text body from a raw RFC 5322 message.
    ///
    /// Prefers the first text part; falls back to the raw message when
    /// the parser finds none.
    #[must_use]
    pub fn from_raw(id: u32, raw: &[u8]) -> Self {
        let text = MessageParser::default()
            .parse(raw)
            .and_then(|msg| msg.body_text(0).map(|t| t.into_owned()))
            .unwrap_or_else(|| String::from_utf8_lossy(raw).into_owned());
        Self { id, text }
    }
}

fn lossy(bytes: Option<&[u8]>) -> String {
    bytes
        .map(|b| String::from_utf8_lossy(b).trim().to_string())
        .unwrap_or_default()
}

fn format_address(name: Option<&[u8]>, mailbox: Option<&[u8]>, host: Option<&[u8]>) -> String {
    let name = lossy(name);
    let address = match (mailbox, host) {
        (Some(m), Some(h)) => format!("{}@{}", lossy(Some(m)), lossy(Some(h))),
        (Some(m), None) => lossy(Some(m)),
        _ => String::new(),
    };

    match (name.is_empty(), address.is_empty()) {
        (false, false) => format!("{name} <{address}>"),
        (true, _) => address,
        (false, true) => name,
    }
}
