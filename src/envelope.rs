//! Message summaries shown in list views

use crate::flag::Flag;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::fmt;

/// A mailbox address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Address {
    pub name: Option<String>,
    pub email: String,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => write!(f, "{name} <{}>", self.email),
            _ => f.write_str(&self.email),
        }
    }
}

/// Envelope data for one message: enough to render a list row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub uid: u32,
    pub subject: String,
    pub from: Vec<Address>,
    pub to: Vec<Address>,
    pub date: Option<DateTime<FixedOffset>>,
    pub flags: Vec<Flag>,
}

impl Envelope {
    #[must_use]
    pub fn has_flag(&self, flag: &Flag) -> bool {
        self.flags.contains(flag)
    }

    #[must_use]
    pub fn is_unread(&self) -> bool {
        !self.has_flag(&Flag::Seen)
    }

    #[must_use]
    pub fn is_flagged(&self) -> bool {
        self.has_flag(&Flag::Flagged)
    }

    /// Add or remove `\Seen` locally, mirroring a successful STORE.
    pub fn set_seen(&mut self, seen: bool) {
        if seen {
            if self.is_unread() {
                self.flags.push(Flag::Seen);
            }
        } else {
            self.flags.retain(|f| *f != Flag::Seen);
        }
    }
}

/// One page of a mailbox listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Page {
    /// Newest first.
    pub envelopes: Vec<Envelope>,
    /// Number of messages in the mailbox, not just on this page.
    pub total: u32,
}

/// Parse an envelope `Date` value, tolerating the comment suffixes
/// some servers append (e.g. `... +0000 (UTC)`).
#[must_use]
pub fn parse_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = raw.trim();
    let without_comment = trimmed
        .rfind(" (")
        .filter(|_| trimmed.ends_with(')'))
        .map_or(trimmed, |idx| &trimmed[..idx]);
    DateTime::parse_from_rfc2822(without_comment).ok()
}
