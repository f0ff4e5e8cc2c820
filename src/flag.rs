//! Message flags and flag updates
//!
//! System flags have dedicated variants; anything else the server
//! reports is kept verbatim as a [`Flag::Keyword`].

use serde::Serialize;
use std::fmt;

/// An IMAP message flag.
///
/// # Examples
///
/// ```
/// use budge::Flag;
///
/// assert_eq!(Flag::parse("\\seen"), Flag::Seen);
/// assert_eq!(Flag::Seen.as_imap_str(), "\\Seen");
/// assert_eq!(Flag::parse("$Junk"), Flag::Keyword("$Junk".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum Flag {
    /// Message has been read (`\Seen`).
    Seen,
    /// Message has been answered (`\Answered`).
    Answered,
    /// Message is flagged for attention (`\Flagged`).
    Flagged,
    /// Message is marked for deletion (`\Deleted`).
    Deleted,
    /// Message is a draft (`\Draft`).
    Draft,
    /// Any other flag, including server keywords.
    Keyword(String),
}

impl Flag {
    /// Parse a flag as it appears on the wire. System flags match
    /// case-insensitively.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        const SYSTEM: [(&str, Flag); 5] = [
            ("\\Seen", Flag::Seen),
            ("\\Answered", Flag::Answered),
            ("\\Flagged", Flag::Flagged),
            ("\\Deleted", Flag::Deleted),
            ("\\Draft", Flag::Draft),
        ];
        SYSTEM
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(raw))
            .map_or_else(|| Self::Keyword(raw.to_string()), |(_, flag)| flag)
    }

    /// The IMAP wire representation of this flag.
    #[must_use]
    pub fn as_imap_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Keyword(kw) => kw,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap_str())
    }
}

impl From<Flag> for String {
    fn from(flag: Flag) -> Self {
        flag.as_imap_str().to_string()
    }
}

/// How a STORE changes the flags of the targeted messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Add,
    Remove,
}

impl StoreOp {
    /// The silent STORE data item for this operation, e.g.
    /// `+FLAGS.SILENT (\Seen)`.
    #[must_use]
    pub fn query(self, flags: &[Flag]) -> String {
        let item = match self {
            Self::Add => "+FLAGS.SILENT",
            Self::Remove => "-FLAGS.SILENT",
        };
        let list = flags
            .iter()
            .map(Flag::as_imap_str)
            .collect::<Vec<_>>()
            .join(" ");
        format!("{item} ({list})")
    }
}
