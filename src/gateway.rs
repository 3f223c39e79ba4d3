//! Gateway facade
//!
//! The collaborator contract a request dispatcher talks to. Each call
//! builds a fresh worker around the shared, read-only configuration
//! and discards it when the call returns.

use crate::config::ServerInfo;
use crate::contacts::{Contact, ContactInput, ContactsWorker};
use crate::error::Result;
use crate::imap::ImapWorker;
use crate::mailbox::Mailbox;
use crate::message::{MessageBody, MessageSummary};
use crate::smtp::{OutgoingMessage, SmtpWorker};
use std::path::PathBuf;
use std::sync::Arc;

/// Cheap to clone; clones share the same configuration.
#[derive(Debug, Clone)]
pub struct Gateway {
    server: Arc<ServerInfo>,
    contacts: Arc<PathBuf>,
}

impl Gateway {
    #[must_use]
    pub fn new(server: ServerInfo, contacts_path: impl Into<PathBuf>) -> Self {
        Self {
            server: Arc::new(server),
            contacts: Arc::new(contacts_path.into()),
        }
    }

    #[must_use]
    pub fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    /// # Errors
    ///
    /// See [`ImapWorker::list_mailboxes`].
    pub async fn list_mailboxes(&self) -> Result<Vec<Mailbox>> {
        ImapWorker::new(&self.server.imap).list_mailboxes().await
    }

    /// # Errors
    ///
    /// See [`ImapWorker::list_messages`].
    pub async fn list_messages(&self, mailbox: &str) -> Result<Vec<MessageSummary>> {
        ImapWorker::new(&self.server.imap)
            .list_messages(mailbox)
            .await
    }

    /// # Errors
    ///
    /// See [`ImapWorker::get_message_body`].
    pub async fn get_message_body(&self, mailbox: &str, id: u32) -> Result<MessageBody> {
        ImapWorker::new(&self.server.imap)
            .get_message_body(mailbox, id)
            .await
    }

    /// # Errors
    ///
    /// See [`ImapWorker::delete_message`].
    pub async fn delete_message(&self, mailbox: &str, id: u32) -> Result<()> {
        ImapWorker::new(&self.server.imap)
            .delete_message(mailbox, id)
            .await
    }

    /// # Errors
    ///
    /// See [`SmtpWorker::send_message`].
    pub async fn send_message(&self, payload: &OutgoingMessage) -> Result<()> {
        SmtpWorker::new(&self.server.smtp)
            .send_message(payload)
            .await
    }

    /// # Errors
    ///
    /// See [`ContactsWorker::list_contacts`].
    pub async fn list_contacts(&self) -> Result<Vec<Contact>> {
        ContactsWorker::new(self.contacts.as_path())
            .list_contacts()
            .await
    }

    /// # Errors
    ///
    /// See [`ContactsWorker::add_contact`].
    pub async fn add_contact(&self, input: ContactInput) -> Result<Contact> {
        ContactsWorker::new(self.contacts.as_path())
            .add_contact(input)
            .await
    }
}
