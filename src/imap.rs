//! IMAP worker
//!
//! Every public method opens its own session, performs exactly one
//! logical operation, and closes the session again before returning.
//! Nothing obtained from the server (UIDs in particular) is meant to
//! outlive the call that produced it.

use crate::config::ImapConfig;
use crate::connection::{self, ImapSession};
use crate::error::{Error, Result};
use crate::mailbox::Mailbox;
use crate::message::{MessageBody, MessageSummary};
use async_imap::types::{Fetch, NameAttribute};
use futures::TryStreamExt;
use tracing::{debug, info, warn};

/// One unit of work performed inside a freshly opened session.
///
/// The worker owns the surrounding lifecycle (connect, authenticate,
/// close); an operation only sees the authenticated session and is
/// responsible for its own SELECT.
pub(crate) trait Operation {
    type Output;

    /// Short name used in logs.
    const NAME: &'static str;

    async fn perform(self, session: &mut ImapSession) -> Result<Self::Output>;
}

/// Per-request IMAP worker for the configured account.
pub struct ImapWorker<'a> {
    config: &'a ImapConfig,
}

impl<'a> ImapWorker<'a> {
    #[must_use]
    pub const fn new(config: &'a ImapConfig) -> Self {
        Self { config }
    }

    /// List every mailbox with its message and unseen counts.
    ///
    /// Order follows the server's LIST output.
    ///
    /// # Errors
    ///
    /// `Connection`, `Auth`, or `Protocol` if the session cannot be
    /// established or LIST/STATUS fails.
    pub async fn list_mailboxes(&self) -> Result<Vec<Mailbox>> {
        self.run(ListMailboxes).await
    }

    /// List summaries of every message in `mailbox`, ascending by UID.
    ///
    /// # Errors
    ///
    /// `MailboxNotFound` if SELECT is refused; otherwise the session
    /// errors. Never returns a partial list.
    pub async fn list_messages(&self, mailbox: &str) -> Result<Vec<MessageSummary>> {
        self.run(ListMessages { mailbox }).await
    }

    /// Fetch the text body of message `id` in `mailbox`.
    ///
    /// Uses `BODY.PEEK[]`, so the message is not marked seen.
    ///
    /// # Errors
    ///
    /// `MessageNotFound` if the UID no longer resolves, `MailboxNotFound`
    /// if SELECT is refused.
    pub async fn get_message_body(&self, mailbox: &str, id: u32) -> Result<MessageBody> {
        self.run(FetchBody { mailbox, id }).await
    }

    /// Mark message `id` deleted and expunge it.
    ///
    /// # Errors
    ///
    /// `MessageNotFound` if the UID does not resolve, `MailboxNotFound`
    /// if SELECT is refused. A message that carries `\Deleted` but has
    /// not been expunged still resolves and is removed. Only `id` is
    /// expunged; other messages flagged `\Deleted` are left in place.
    pub async fn delete_message(&self, mailbox: &str, id: u32) -> Result<()> {
        self.run(DeleteMessage { mailbox, id }).await
    }

    /// Open a session, perform `op`, and close the session on every
    /// exit path.
    async fn run<O: Operation>(&self, op: O) -> Result<O::Output> {
        debug!("{}: opening session", O::NAME);
        let mut session = connection::open(self.config).await?;

        let outcome = op.perform(&mut session).await;
        connection::close(session).await;

        match &outcome {
            Ok(_) => info!("{} completed", O::NAME),
            Err(e) => debug!("{} failed: {}", O::NAME, e),
        }
        outcome
    }
}

struct ListMailboxes;

impl Operation for ListMailboxes {
    type Output = Vec<Mailbox>;
    const NAME: &'static str = "list_mailboxes";

    async fn perform(self, session: &mut ImapSession) -> Result<Vec<Mailbox>> {
        let names: Vec<_> = session
            .list(Some(""), Some("*"))
            .await
            .map_err(|e| Error::imap("LIST", e))?
            .try_collect()
            .await
            .map_err(|e| Error::imap("LIST", e))?;

        let mut mailboxes: Vec<Mailbox> = names
            .iter()
            .map(|name| {
                let mut mb = Mailbox::new(name.name(), name.delimiter());
                mb.selectable = !name
                    .attributes()
                    .iter()
                    .any(|a| matches!(a, NameAttribute::NoSelect));
                mb
            })
            .collect();
        drop(names);

        for mb in mailboxes.iter_mut().filter(|mb| mb.selectable) {
            let status = session
                .status(&mb.path, "(MESSAGES UNSEEN)")
                .await
                .map_err(|e| Error::imap(&format!("STATUS {}", mb.path), e))?;
            mb.messages = status.exists;
            mb.unseen = status.unseen.unwrap_or(0);
        }

        debug!("Listed {} mailboxes", mailboxes.len());
        Ok(mailboxes)
    }
}

struct ListMessages<'m> {
    mailbox: &'m str,
}

impl Operation for ListMessages<'_> {
    type Output = Vec<MessageSummary>;
    const NAME: &'static str = "list_messages";

    async fn perform(self, session: &mut ImapSession) -> Result<Vec<MessageSummary>> {
        let selected = connection::select(session, self.mailbox).await?;
        if selected.exists == 0 {
            return Ok(Vec::new());
        }

        let fetches = fetch_all(session, "1:*", "(UID FLAGS ENVELOPE)").await?;

        // Short means the FETCH was refused or the stream ended early.
        if fetches.len() < selected.exists as usize {
            return Err(Error::Protocol(format!(
                "FETCH returned {} of {} messages in {}",
                fetches.len(),
                selected.exists,
                self.mailbox
            )));
        }

        let mut summaries = fetches
            .iter()
            .map(MessageSummary::from_fetch)
            .collect::<Result<Vec<_>>>()?;
        summaries.sort_by_key(|m| m.id);
        summaries.dedup_by_key(|m| m.id);

        debug!("{} messages in {}", summaries.len(), self.mailbox);
        Ok(summaries)
    }
}

struct FetchBody<'m> {
    mailbox: &'m str,
    id: u32,
}

impl Operation for FetchBody<'_> {
    type Output = MessageBody;
    const NAME: &'static str = "get_message_body";

    async fn perform(self, session: &mut ImapSession) -> Result<MessageBody> {
        connection::select(session, self.mailbox).await?;

        let fetches = fetch_all(session, &self.id.to_string(), "(UID BODY.PEEK[])").await?;

        fetches
            .iter()
            .filter(|f| f.uid == Some(self.id))
            .find_map(|f| f.body())
            .map(|raw| MessageBody::from_raw(self.id, raw))
            .ok_or_else(|| Error::MessageNotFound {
                mailbox: self.mailbox.to_string(),
                id: self.id,
            })
    }
}

struct DeleteMessage<'m> {
    mailbox: &'m str,
    id: u32,
}

impl Operation for DeleteMessage<'_> {
    type Output = ();
    const NAME: &'static str = "delete_message";

    async fn perform(self, session: &mut ImapSession) -> Result<()> {
        connection::select(session, self.mailbox).await?;
        let uid = self.id.to_string();

        // Resolve the UID first: STORE on a missing UID is a silent no-op.
        let found = fetch_all(session, &uid, "(UID FLAGS)")
            .await?
            .iter()
            .any(|f| f.uid == Some(self.id));
        if !found {
            return Err(Error::MessageNotFound {
                mailbox: self.mailbox.to_string(),
                id: self.id,
            });
        }

        store_flags(session, &uid, "+FLAGS.SILENT (\\Deleted)").await?;

        let uidplus = session
            .capabilities()
            .await
            .map_err(|e| Error::imap("CAPABILITY", e))?
            .has_str("UIDPLUS");

        if uidplus {
            let expunged: Vec<u32> = session
                .uid_expunge(&uid)
                .await
                .map_err(|e| Error::imap("UID EXPUNGE", e))?
                .try_collect()
                .await
                .map_err(|e| Error::imap("UID EXPUNGE", e))?;
            debug!("UID EXPUNGE {} removed {} message(s)", uid, expunged.len());
        } else {
            expunge_only(session, self.id).await?;
        }

        debug!("Deleted UID {} from {}", self.id, self.mailbox);
        Ok(())
    }
}

/// Plain EXPUNGE restricted to `id`.
///
/// Other messages already carrying `\Deleted` have the flag lifted for
/// the duration of the EXPUNGE and put back afterwards, whether or not
/// the EXPUNGE succeeded.
async fn expunge_only(session: &mut ImapSession, id: u32) -> Result<()> {
    let others: Vec<String> = fetch_all(session, "1:*", "(UID FLAGS)")
        .await?
        .iter()
        .filter(|f| f.uid.is_some_and(|u| u != id))
        .filter(|f| f.flags().any(|flag| matches!(flag, async_imap::types::Flag::Deleted)))
        .filter_map(|f| f.uid.map(|u| u.to_string()))
        .collect();
    let others = others.join(",");

    if !others.is_empty() {
        debug!("Shielding UIDs {} from EXPUNGE", others);
        store_flags(session, &others, "-FLAGS.SILENT (\\Deleted)").await?;
    }

    let expunged = match session.expunge().await {
        Ok(stream) => stream.try_collect::<Vec<u32>>().await,
        Err(e) => Err(e),
    }
    .map_err(|e| Error::imap("EXPUNGE", e));

    let restored = if others.is_empty() {
        Ok(())
    } else {
        store_flags(session, &others, "+FLAGS.SILENT (\\Deleted)").await
    };
    if let Err(e) = &restored {
        warn!("Could not restore \\Deleted on UIDs {}: {}", others, e);
    }

    debug!("EXPUNGE removed {} message(s)", expunged?.len());
    restored
}

async fn store_flags(session: &mut ImapSession, uids: &str, query: &str) -> Result<()> {
    let _: Vec<_> = session
        .uid_store(uids, query)
        .await
        .map_err(|e| Error::imap("STORE", e))?
        .try_collect()
        .await
        .map_err(|e| Error::imap("STORE", e))?;
    Ok(())
}

/// Run a UID FETCH and collect every response item.
///
/// async-imap ends the stream quietly at the tagged completion whether
/// it was OK, NO or BAD, and at a clean EOF. A dropped TLS session
/// surfaces as an I/O error. Callers that know how many items to
/// expect check the count themselves.
async fn fetch_all(session: &mut ImapSession, uids: &str, query: &str) -> Result<Vec<Fetch>> {
    session
        .uid_fetch(uids, query)
        .await
        .map_err(|e| Error::imap("FETCH", e))?
        .try_collect()
        .await
        .map_err(|e| Error::imap("FETCH", e))
}
