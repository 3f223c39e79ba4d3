//! Mailbox records
//!
//! A [`Mailbox`] is one entry of the server's LIST output, flattened
//! out of the hierarchy and annotated with STATUS counts. Records are
//! built fresh on every listing and never cached.

use serde::Serialize;

/// One mailbox as reported by the server.
///
/// # Examples
///
/// ```
/// use webmail_gateway::Mailbox;
///
/// let mb = Mailbox::new("Work/Projects", Some("/"));
/// assert_eq!(mb.name, "Projects");
/// assert_eq!(mb.parent(), Some("Work"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mailbox {
    /// Full hierarchical name, as used with SELECT.
    pub path: String,
    /// Last component of `path`.
    pub name: String,
    /// Hierarchy delimiter, absent for flat namespaces.
    pub delimiter: Option<String>,
    /// Whether the mailbox can be selected (`\Noselect` containers can't).
    pub selectable: bool,
    /// Number of messages (STATUS MESSAGES).
    pub messages: u32,
    /// Number of messages without `\Seen` (STATUS UNSEEN).
    pub unseen: u32,
}

impl Mailbox {
    /// Create a selectable mailbox record with zero counts.
    #[must_use]
    pub fn new(path: impl Into<String>, delimiter: Option<&str>) -> Self {
        let path = path.into();
        let name = leaf_name(&path, delimiter).to_string();
        Self {
            path,
            name,
            delimiter: delimiter.map(ToString::to_string),
            selectable: true,
            messages: 0,
            unseen: 0,
        }
    }

    /// Path of the enclosing mailbox, if this one is nested.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        let delim = self.delimiter.as_deref().filter(|d| !d.is_empty())?;
        self.path.rsplit_once(delim).map(|(parent, _)| parent)
    }

    /// Nesting depth (0 for top-level mailboxes).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.delimiter
            .as_deref()
            .filter(|d| !d.is_empty())
            .map_or(0, |d| self.path.matches(d).count())
    }
}

fn leaf_name<'a>(path: &'a str, delimiter: Option<&str>) -> &'a str {
    match delimiter.filter(|d| !d.is_empty()) {
        Some(d) => path.rsplit(d).next().unwrap_or(path),
        None => path,
    }
}
