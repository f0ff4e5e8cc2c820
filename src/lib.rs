//! Terminal IMAP client core
//!
//! The pieces a mail front end builds on:
//!
//! - [`Session`]: the single server connection, its
//!   `Disconnected → Connecting → Connected → Authenticated` lifecycle,
//!   bounded [`reconnect`](Session::reconnect) with exponential backoff,
//!   and the mailbox operations (list, page, body, search, mark, delete).
//! - [`Cache`] / [`BodyLoader`]: LRU-cached rendered message bodies.
//! - [`MailboxMonitor`]: cancellable per-mailbox polling for new mail.
//! - [`order_mailboxes`]: display ordering with INBOX, Sent, Drafts and
//!   All Mail first.
//! - [`Dispatcher`] / [`Inbox`]: command/event plumbing between a UI
//!   and the session.
//!
//! The session talks to the server through the [`Connector`] and
//! [`MailConnection`] traits; [`ImapConnector`] implements them over
//! `async-imap` with TLS, STARTTLS or plain connections.

mod body;
mod cache;
mod config;
mod connection;
mod dispatch;
mod envelope;
mod error;
mod flag;
mod folder;
mod inbox;
mod monitor;
mod reconnect;
mod session;
mod transport;

pub use body::{BodyLoader, Renderer, TextRenderer};
pub use cache::Cache;
pub use config::{BehaviorConfig, Config, ImapConfig};
pub use connection::{ImapConnection, ImapConnector};
pub use dispatch::{Command, Dispatcher, EVENT_BUFFER, Event};
pub use envelope::{Address, Envelope, Page, parse_date};
pub use error::{Error, Result};
pub use flag::{Flag, StoreOp};
pub use folder::{MailboxEntry, SpecialFolder, order_mailboxes};
pub use inbox::Inbox;
pub use monitor::MailboxMonitor;
pub use reconnect::ReconnectPolicy;
pub use session::{ConnectionState, MessageCounter, Session};
pub use transport::{Connector, IdSet, MailConnection, TlsMode};
