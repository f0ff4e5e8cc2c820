//! In-memory implementation of the transport traits
//!
//! `FakeServer` owns the shared state; `connector()` hands out a
//! `FakeConnector` whose connections read and mutate that state, so a
//! test can deliver mail or inspect flags while a session is live.

use super::mailbox::{Mailbox, TestEmail};
use async_trait::async_trait;
use budge::{Connector, Envelope, Error, Flag, IdSet, MailConnection, Result, StoreOp, TlsMode};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

pub const USERNAME: &str = "testuser";
pub const PASSWORD: &str = "testpass";

#[derive(Debug, Default)]
pub struct ServerState {
    pub mailbox: Mailbox,
    /// Refuse this many upcoming dials.
    pub refuse_dials: u32,
    /// Fail every STATUS while set.
    pub fail_status: bool,
    pub dials: u32,
    pub logins: u32,
    pub logouts: u32,
    pub body_fetches: u32,
    pub status_queries: u32,
}

#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new(mailbox: Mailbox) -> Self {
        let server = Self::default();
        server.state().mailbox = mailbox;
        server
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            state: Arc::clone(&self.state),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    /// Append a message to `folder`, as if it had just arrived.
    pub fn deliver(&self, folder: &str, uid: u32, raw: &[u8]) {
        let mut state = self.state();
        let folder = state.mailbox.folder_mut(folder).expect("unknown folder");
        folder.emails.push(TestEmail {
            uid,
            seen: false,
            deleted: false,
            raw: raw.to_vec(),
        });
    }

    pub fn email(&self, folder: &str, uid: u32) -> Option<TestEmail> {
        self.state()
            .mailbox
            .folder(folder)?
            .emails
            .iter()
            .find(|e| e.uid == uid)
            .cloned()
    }

    pub fn count(&self, folder: &str) -> usize {
        self.state()
            .mailbox
            .folder(folder)
            .map_or(0, |f| f.emails.len())
    }
}

pub struct FakeConnector {
    state: Arc<Mutex<ServerState>>,
}

#[async_trait]
impl Connector for FakeConnector {
    type Connection = FakeConnection;

    async fn dial(&self, _address: &str, _tls: TlsMode) -> Result<FakeConnection> {
        let mut state = self.state.lock().unwrap();
        state.dials += 1;
        if state.refuse_dials > 0 {
            state.refuse_dials -= 1;
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(FakeConnection {
            state: Arc::clone(&self.state),
            logged_in: false,
            selected: None,
        })
    }
}

pub struct FakeConnection {
    state: Arc<Mutex<ServerState>>,
    logged_in: bool,
    selected: Option<String>,
}

impl FakeConnection {
    fn check_login(&self) -> Result<()> {
        if self.logged_in {
            Ok(())
        } else {
            Err(Error::Imap("BAD not authenticated".into()))
        }
    }

    fn with_selected<T>(&self, f: impl FnOnce(&mut Vec<TestEmail>) -> Result<T>) -> Result<T> {
        self.check_login()?;
        let name = self
            .selected
            .as_deref()
            .ok_or_else(|| Error::Imap("BAD no mailbox selected".into()))?;
        let mut state = self.state.lock().unwrap();
        let folder = state
            .mailbox
            .folder_mut(name)
            .ok_or_else(|| Error::Imap(format!("NO mailbox {name} vanished")))?;
        f(&mut folder.emails)
    }
}

#[async_trait]
impl MailConnection for FakeConnection {
    async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if username == USERNAME && password == PASSWORD {
            state.logins += 1;
            self.logged_in = true;
            Ok(())
        } else {
            Err(Error::Imap("NO [AUTHENTICATIONFAILED] invalid credentials".into()))
        }
    }

    async fn logout(&mut self) -> Result<()> {
        self.check_login()?;
        self.state.lock().unwrap().logouts += 1;
        self.logged_in = false;
        Ok(())
    }

    async fn close(&mut self) {
        self.logged_in = false;
        self.selected = None;
    }

    async fn list_mailboxes(&mut self) -> Result<Vec<String>> {
        self.check_login()?;
        let state = self.state.lock().unwrap();
        Ok(state.mailbox.folders.iter().map(|f| f.name.clone()).collect())
    }

    async fn select_mailbox(&mut self, name: &str) -> Result<u32> {
        self.check_login()?;
        let count = {
            let state = self.state.lock().unwrap();
            let folder = state
                .mailbox
                .folder(name)
                .ok_or_else(|| Error::Imap(format!("NO no such mailbox {name}")))?;
            folder.emails.len()
        };
        self.selected = Some(name.to_string());
        Ok(u32::try_from(count).unwrap())
    }

    async fn mailbox_status(&mut self, name: &str) -> Result<u32> {
        self.check_login()?;
        let mut state = self.state.lock().unwrap();
        state.status_queries += 1;
        if state.fail_status {
            return Err(Error::Imap("NO STATUS unavailable".into()));
        }
        let folder = state
            .mailbox
            .folder(name)
            .ok_or_else(|| Error::Imap(format!("NO no such mailbox {name}")))?;
        Ok(u32::try_from(folder.emails.len()).unwrap())
    }

    async fn fetch_envelopes(&mut self, ids: &IdSet) -> Result<Vec<Envelope>> {
        self.with_selected(|emails| {
            let envelopes = match ids {
                IdSet::Sequence(range) => emails
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| range.contains(&(u32::try_from(*idx).unwrap() + 1)))
                    .map(|(_, e)| e.envelope())
                    .collect(),
                IdSet::Uids(uids) => emails
                    .iter()
                    .filter(|e| uids.contains(&e.uid))
                    .map(TestEmail::envelope)
                    .collect(),
            };
            Ok(envelopes)
        })
    }

    async fn fetch_body(&mut self, uid: u32) -> Result<Vec<u8>> {
        let raw = self.with_selected(|emails| {
            emails
                .iter()
                .find(|e| e.uid == uid)
                .map(|e| e.raw.clone())
                .ok_or_else(|| Error::Imap(format!("No body found for UID {uid}")))
        })?;
        self.state.lock().unwrap().body_fetches += 1;
        Ok(raw)
    }

    async fn search(&mut self, query: &str) -> Result<Vec<u32>> {
        let needle = query
            .strip_prefix("TEXT ")
            .ok_or_else(|| Error::Imap(format!("BAD unsupported search {query}")))?
            .trim_matches('"')
            .replace("\\\"", "\"")
            .replace("\\\\", "\\")
            .to_lowercase();
        self.with_selected(|emails| {
            Ok(emails
                .iter()
                .filter(|e| String::from_utf8_lossy(&e.raw).to_lowercase().contains(&needle))
                .map(|e| e.uid)
                .collect())
        })
    }

    async fn store_flags(&mut self, uids: &[u32], op: StoreOp, flags: &[Flag]) -> Result<()> {
        self.with_selected(|emails| {
            for email in emails.iter_mut().filter(|e| uids.contains(&e.uid)) {
                for flag in flags {
                    let slot = match flag {
                        Flag::Seen => &mut email.seen,
                        Flag::Deleted => &mut email.deleted,
                        _ => continue,
                    };
                    *slot = match op {
                        StoreOp::Add => true,
                        StoreOp::Remove => false,
                    };
                }
            }
            Ok(())
        })
    }

    async fn expunge(&mut self) -> Result<()> {
        self.with_selected(|emails| {
            emails.retain(|e| !e.deleted);
            Ok(())
        })
    }
}
