//! Mailbox ordering for display
//!
//! Servers disagree on how they name the common mailboxes ("Sent",
//! "Sent Messages", "[Gmail]/Sent Mail", ...). [`order_mailboxes`]
//! pulls the recognized ones to the front in a fixed order and sorts
//! everything else after a separator.

use serde::{Serialize, Serializer};
use std::fmt;

/// The mailboxes that get a fixed place at the top of the list, in
/// display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialFolder {
    Inbox,
    Sent,
    Drafts,
    AllMail,
}

impl SpecialFolder {
    pub const ALL: [Self; 4] = [Self::Inbox, Self::Sent, Self::Drafts, Self::AllMail];

    /// Names recognized for this folder, compared case-insensitively.
    #[must_use]
    pub const fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Inbox => &["inbox"],
            Self::Sent => &["sent", "sent messages", "[gmail]/sent mail"],
            Self::Drafts => &["draft", "drafts", "[gmail]/drafts"],
            Self::AllMail => &["all mail", "[gmail]/all mail"],
        }
    }

    #[must_use]
    pub fn matches(self, name: &str) -> bool {
        self.aliases()
            .iter()
            .any(|alias| alias.eq_ignore_ascii_case(name))
    }

    /// Which special folder, if any, `name` refers to.
    #[must_use]
    pub fn recognize(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|folder| folder.matches(name))
    }
}

/// One row of an ordered mailbox list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MailboxEntry {
    Mailbox(String),
    Separator,
}

impl MailboxEntry {
    pub const SEPARATOR: &'static str = "---";

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Mailbox(name) => name,
            Self::Separator => Self::SEPARATOR,
        }
    }

    /// The mailbox name, `None` for the separator.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Mailbox(name) => Some(name),
            Self::Separator => None,
        }
    }

    #[must_use]
    pub const fn is_separator(&self) -> bool {
        matches!(self, Self::Separator)
    }
}

impl fmt::Display for MailboxEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MailboxEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Order mailbox names for display.
///
/// Special folders come first, grouped in [`SpecialFolder::ALL`] order
/// and keeping their input order within a group. The remaining names
/// follow a [`MailboxEntry::Separator`], sorted case-insensitively.
/// The separator is omitted when nothing remains.
#[must_use]
pub fn order_mailboxes<S: AsRef<str>>(names: &[S]) -> Vec<MailboxEntry> {
    let mut used = vec![false; names.len()];
    let mut ordered = Vec::with_capacity(names.len() + 1);

    for folder in SpecialFolder::ALL {
        for (idx, name) in names.iter().enumerate() {
            if !used[idx] && folder.matches(name.as_ref()) {
                used[idx] = true;
                ordered.push(MailboxEntry::Mailbox(name.as_ref().to_string()));
            }
        }
    }

    let mut others: Vec<&str> = names
        .iter()
        .zip(&used)
        .filter(|(_, used)| !**used)
        .map(|(name, _)| name.as_ref())
        .collect();

    if !others.is_empty() {
        others.sort_by_cached_key(|name| name.to_lowercase());
        ordered.push(MailboxEntry::Separator);
        ordered.extend(others.into_iter().map(|name| MailboxEntry::Mailbox(name.to_string())));
    }

    ordered
}
