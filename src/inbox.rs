//! UI-side state driven by [`Event`]s
//!
//! [`Inbox`] holds what a front end displays (mailbox list, current
//! listing, open message, last error) and decides which follow-up
//! [`Command`]s each event calls for. It never does I/O itself.

use crate::dispatch::{Command, Event};
use crate::envelope::{Envelope, Page};
use crate::error::Error;
use crate::folder::MailboxEntry;
use std::mem;

#[derive(Debug, Default)]
pub struct Inbox {
    default_folder: String,
    connected: bool,
    mailboxes: Vec<MailboxEntry>,
    current: Option<String>,
    page: Page,
    search: Option<Search>,
    opened: Option<u32>,
    body: Option<String>,
    error: Option<Error>,
}

/// Active search results and the listing they replaced.
#[derive(Debug)]
struct Search {
    query: String,
    stashed: Page,
}

impl Inbox {
    /// `default_folder` is opened once the mailbox list arrives.
    #[must_use]
    pub fn new(default_folder: impl Into<String>) -> Self {
        Self {
            default_folder: default_folder.into(),
            ..Self::default()
        }
    }

    /// Fold one event into the state, returning the commands it
    /// triggers.
    pub fn apply(&mut self, event: Event) -> Vec<Command> {
        match event {
            Event::Connected => {
                self.connected = true;
                self.error = None;
                vec![Command::LoadMailboxes]
            }
            Event::ConnectFailed(e) => {
                if !matches!(e, Error::AlreadyConnected) {
                    self.connected = false;
                }
                self.error = Some(e);
                vec![]
            }
            Event::MailboxesLoaded(entries) => {
                self.mailboxes = entries;
                if self.current.is_some() {
                    return vec![];
                }
                self.find_mailbox(&self.default_folder)
                    .map(|name| vec![Command::OpenMailbox(name.to_string())])
                    .unwrap_or_default()
            }
            Event::PageLoaded { mailbox, page } => self.page_loaded(mailbox, page),
            Event::BodyLoaded { mailbox, uid, body } => {
                if self.is_current(&mailbox) && self.opened == Some(uid) {
                    self.body = Some(body);
                }
                vec![]
            }
            Event::SearchLoaded { query, envelopes } => {
                let total = u32::try_from(envelopes.len()).unwrap_or(u32::MAX);
                let results = Page { envelopes, total };
                let stashed = match self.search.take() {
                    Some(previous) => previous.stashed,
                    None => mem::take(&mut self.page),
                };
                self.page = results;
                self.search = Some(Search { query, stashed });
                vec![]
            }
            Event::MarkedRead { mailbox, uid, read } => {
                if self.is_current(&mailbox) {
                    self.for_each_listing(|envelopes| {
                        if let Some(env) = envelopes.iter_mut().find(|e| e.uid == uid) {
                            env.set_seen(read);
                        }
                    });
                }
                vec![]
            }
            Event::Deleted { mailbox, uid } => {
                if self.is_current(&mailbox) {
                    remove_envelope(&mut self.page, uid);
                    if let Some(search) = self.search.as_mut() {
                        remove_envelope(&mut search.stashed, uid);
                    }
                    if self.opened == Some(uid) {
                        self.opened = None;
                        self.body = None;
                    }
                }
                vec![]
            }
            Event::NewMail { mailbox, .. } => {
                if self.is_current(&mailbox) {
                    vec![Command::OpenMailbox(mailbox)]
                } else {
                    vec![]
                }
            }
            Event::Failed(e) => {
                let reconnect = self.connected && e.is_retryable();
                if reconnect {
                    self.connected = false;
                }
                self.error = Some(e);
                if reconnect {
                    vec![Command::Reconnect]
                } else {
                    vec![]
                }
            }
        }
    }

    /// Open message `uid` from the current listing. Unread messages
    /// are marked seen locally and on the server.
    pub fn open_message(&mut self, uid: u32) -> Vec<Command> {
        let Some(mailbox) = self.current.clone() else {
            return vec![];
        };
        let Some(unread) = self
            .page
            .envelopes
            .iter()
            .find(|e| e.uid == uid)
            .map(Envelope::is_unread)
        else {
            return vec![];
        };

        self.opened = Some(uid);
        self.body = None;

        let mut commands = vec![Command::LoadBody {
            mailbox: mailbox.clone(),
            uid,
        }];
        if unread {
            self.for_each_listing(|envelopes| {
                if let Some(env) = envelopes.iter_mut().find(|e| e.uid == uid) {
                    env.set_seen(true);
                }
            });
            commands.push(Command::MarkRead {
                mailbox,
                uid,
                read: true,
            });
        }
        commands
    }

    pub fn close_message(&mut self) {
        self.opened = None;
        self.body = None;
    }

    /// Command to search the current mailbox, if one is open.
    #[must_use]
    pub fn search(&self, query: &str) -> Option<Command> {
        self.current.as_ref().map(|mailbox| Command::Search {
            mailbox: mailbox.clone(),
            query: query.to_string(),
        })
    }

    /// Leave search results and restore the listing they replaced.
    /// Returns `false` if no search was active.
    pub fn exit_search(&mut self) -> bool {
        match self.search.take() {
            Some(search) => {
                self.page = search.stashed;
                true
            }
            None => false,
        }
    }

    /// Take the last error for display, clearing it.
    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    #[must_use]
    pub fn mailboxes(&self) -> &[MailboxEntry] {
        &self.mailboxes
    }

    #[must_use]
    pub fn current_mailbox(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// The listing on screen: the mailbox page or search results.
    #[must_use]
    pub const fn page(&self) -> &Page {
        &self.page
    }

    #[must_use]
    pub const fn is_searching(&self) -> bool {
        self.search.is_some()
    }

    #[must_use]
    pub fn search_query(&self) -> Option<&str> {
        self.search.as_ref().map(|s| s.query.as_str())
    }

    #[must_use]
    pub const fn opened(&self) -> Option<u32> {
        self.opened
    }

    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    #[must_use]
    pub const fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    fn page_loaded(&mut self, mailbox: String, page: Page) -> Vec<Command> {
        if self.is_current(&mailbox) {
            // Reload of the open mailbox: keep search results on screen.
            match self.search.as_mut() {
                Some(search) => search.stashed = page,
                None => self.page = page,
            }
            return vec![];
        }

        let mut commands = Vec::with_capacity(2);
        if let Some(previous) = self.current.replace(mailbox.clone()) {
            commands.push(Command::Unwatch(previous));
        }
        commands.push(Command::Watch(mailbox));

        self.page = page;
        self.search = None;
        self.close_message();
        commands
    }

    fn is_current(&self, mailbox: &str) -> bool {
        self.current.as_deref() == Some(mailbox)
    }

    fn find_mailbox(&self, name: &str) -> Option<&str> {
        self.mailboxes
            .iter()
            .filter_map(MailboxEntry::name)
            .find(|candidate| candidate.eq_ignore_ascii_case(name))
    }

    fn for_each_listing(&mut self, mut update: impl FnMut(&mut [Envelope])) {
        update(&mut self.page.envelopes);
        if let Some(search) = self.search.as_mut() {
            update(&mut search.stashed.envelopes);
        }
    }
}

fn remove_envelope(page: &mut Page, uid: u32) {
    let before = page.envelopes.len();
    page.envelopes.retain(|e| e.uid != uid);
    if page.envelopes.len() < before {
        page.total = page.total.saturating_sub(1);
    }
}
