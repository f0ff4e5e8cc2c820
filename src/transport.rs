//! Transport seam between the session and the mail protocol
//!
//! [`Session`](crate::Session) only ever talks to the server through
//! these traits. [`ImapConnector`](crate::ImapConnector) is the
//! production implementation; tests plug in an in-memory server.

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::flag::{Flag, StoreOp};
use async_trait::async_trait;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// How the connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// TLS from the first byte (IMAPS, usually port 993).
    #[default]
    Tls,
    /// Plain connection upgraded with STARTTLS (usually port 143).
    StartTls,
    /// No encryption at all.
    Plain,
}

impl TlsMode {
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Tls => 993,
            Self::StartTls | Self::Plain => 143,
        }
    }
}

impl FromStr for TlsMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tls" | "ssl" | "imaps" => Ok(Self::Tls),
            "starttls" => Ok(Self::StartTls),
            "none" | "plain" | "insecure" => Ok(Self::Plain),
            other => Err(Error::Config(format!(
                "unknown TLS mode '{other}', expected tls, starttls or none"
            ))),
        }
    }
}

/// A set of messages addressed either by sequence number or by UID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdSet {
    Sequence(RangeInclusive<u32>),
    Uids(Vec<u32>),
}

impl IdSet {
    #[must_use]
    pub const fn is_uid(&self) -> bool {
        matches!(self, Self::Uids(_))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Sequence(range) => range.is_empty(),
            Self::Uids(uids) => uids.is_empty(),
        }
    }
}

impl fmt::Display for IdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequence(range) if range.start() == range.end() => write!(f, "{}", range.start()),
            Self::Sequence(range) => write!(f, "{}:{}", range.start(), range.end()),
            Self::Uids(uids) => {
                let joined = uids.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
                f.write_str(&joined)
            }
        }
    }
}

/// Opens connections to a mail server.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: MailConnection;

    async fn dial(&self, address: &str, tls: TlsMode) -> Result<Self::Connection>;
}

/// One live connection handle.
///
/// Methods take `&mut self`; the session serializes access.
#[async_trait]
pub trait MailConnection: Send + 'static {
    async fn login(&mut self, username: &str, password: &str) -> Result<()>;

    async fn logout(&mut self) -> Result<()>;

    /// Drop the underlying stream without a protocol goodbye.
    async fn close(&mut self);

    async fn list_mailboxes(&mut self) -> Result<Vec<String>>;

    /// SELECT `name`, returning its message count.
    async fn select_mailbox(&mut self, name: &str) -> Result<u32>;

    /// Message count of `name` without changing the selection.
    async fn mailbox_status(&mut self, name: &str) -> Result<u32>;

    async fn fetch_envelopes(&mut self, ids: &IdSet) -> Result<Vec<Envelope>>;

    /// Raw RFC 5322 bytes of the message with this UID in the
    /// selected mailbox.
    async fn fetch_body(&mut self, uid: u32) -> Result<Vec<u8>>;

    /// UID search in the selected mailbox.
    async fn search(&mut self, query: &str) -> Result<Vec<u32>>;

    async fn store_flags(&mut self, uids: &[u32], op: StoreOp, flags: &[Flag]) -> Result<()>;

    async fn expunge(&mut self) -> Result<()>;
}
