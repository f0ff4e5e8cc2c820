//! In-memory fake mail server for integration testing
//!
//! Implements the `Connector`/`MailConnection` traits over shared test
//! state instead of speaking the wire protocol, so tests exercise the
//! session, cache, monitor and dispatcher end to end.
//!
//! ## Module layout
//!
//! - `connector` -- the fake server, connector and connections
//! - `mailbox` -- test data model (folders, emails, builder)

#![allow(dead_code)]

pub mod connector;
pub mod mailbox;

pub use connector::{FakeConnector, FakeServer, PASSWORD, USERNAME};
pub use mailbox::{MailboxBuilder, make_raw_email};
