//! Commands from the UI, events back to it
//!
//! The [`Dispatcher`] runs every [`Command`] on a background task and
//! reports its outcome as exactly one [`Event`] on the event channel.
//! `Watch` and `Unwatch` report nothing themselves; the pollers they
//! start send [`Event::NewMail`] on the same channel.

use crate::body::BodyLoader;
use crate::config::BehaviorConfig;
use crate::envelope::{Envelope, Page};
use crate::error::Error;
use crate::folder::{MailboxEntry, order_mailboxes};
use crate::monitor::MailboxMonitor;
use crate::session::Session;
use crate::transport::Connector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capacity of the event channel returned by [`Dispatcher::new`].
pub const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Dial and log in.
    Connect,
    Reconnect,
    LoadMailboxes,
    /// Select a mailbox and load its newest page.
    OpenMailbox(String),
    LoadBody { mailbox: String, uid: u32 },
    MarkRead { mailbox: String, uid: u32, read: bool },
    Delete { mailbox: String, uid: u32 },
    Search { mailbox: String, query: String },
    /// Start polling a mailbox for new mail.
    Watch(String),
    Unwatch(String),
}

impl Command {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Reconnect => "reconnect",
            Self::LoadMailboxes => "load-mailboxes",
            Self::OpenMailbox(_) => "open-mailbox",
            Self::LoadBody { .. } => "load-body",
            Self::MarkRead { .. } => "mark-read",
            Self::Delete { .. } => "delete",
            Self::Search { .. } => "search",
            Self::Watch(_) => "watch",
            Self::Unwatch(_) => "unwatch",
        }
    }
}

#[derive(Debug)]
pub enum Event {
    Connected,
    ConnectFailed(Error),
    MailboxesLoaded(Vec<MailboxEntry>),
    PageLoaded { mailbox: String, page: Page },
    BodyLoaded { mailbox: String, uid: u32, body: String },
    SearchLoaded { query: String, envelopes: Vec<Envelope> },
    MarkedRead { mailbox: String, uid: u32, read: bool },
    Deleted { mailbox: String, uid: u32 },
    NewMail { mailbox: String, count: u32 },
    Failed(Error),
}

/// Runs commands against a shared [`Session`].
pub struct Dispatcher<C: Connector> {
    session: Arc<Session<C>>,
    bodies: Arc<BodyLoader<C>>,
    monitor: Arc<MailboxMonitor<Session<C>>>,
    events: mpsc::Sender<Event>,
    page_size: u32,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl<C: Connector> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            bodies: Arc::clone(&self.bodies),
            monitor: Arc::clone(&self.monitor),
            events: self.events.clone(),
            page_size: self.page_size,
            poll_interval: self.poll_interval,
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<C: Connector> Dispatcher<C> {
    /// Build a dispatcher and the receiving end of its event channel.
    ///
    /// # Panics
    ///
    /// Panics if `behavior.cache_capacity` is zero.
    #[must_use]
    pub fn new(session: Arc<Session<C>>, behavior: &BehaviorConfig) -> (Self, mpsc::Receiver<Event>) {
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let bodies = BodyLoader::new(Arc::clone(&session), behavior.cache_capacity);
        let monitor = MailboxMonitor::new(Arc::clone(&session), events.clone());

        let dispatcher = Self {
            session,
            bodies: Arc::new(bodies),
            monitor: Arc::new(monitor),
            events,
            page_size: behavior.page_size,
            poll_interval: behavior.poll_interval,
            shutdown: CancellationToken::new(),
        };
        (dispatcher, rx)
    }

    #[must_use]
    pub const fn session(&self) -> &Arc<Session<C>> {
        &self.session
    }

    #[must_use]
    pub fn bodies(&self) -> &BodyLoader<C> {
        &self.bodies
    }

    #[must_use]
    pub fn monitor(&self) -> &MailboxMonitor<Session<C>> {
        &self.monitor
    }

    /// Run `command` on a background task.
    ///
    /// `Watch` and `Unwatch` update the poller registry before this
    /// returns, so they take effect in dispatch order.
    pub fn dispatch(&self, command: Command) -> JoinHandle<()> {
        match command {
            Command::Watch(mailbox) => {
                let starting = self.monitor.start(&mailbox, self.poll_interval);
                tokio::spawn(async move {
                    starting.await;
                })
            }
            Command::Unwatch(mailbox) => {
                self.monitor.stop(&mailbox);
                tokio::spawn(async {})
            }
            command => {
                let this = self.clone();
                tokio::spawn(async move {
                    let name = command.name();
                    let Some(event) = this.execute(command).await else {
                        return;
                    };
                    if this.events.send(event).await.is_err() {
                        debug!(command = name, "event receiver gone, dropping result");
                    }
                })
            }
        }
    }

    /// Run `command` to completion and return its result event.
    /// `Watch`/`Unwatch` return `None`.
    pub async fn execute(&self, command: Command) -> Option<Event> {
        let name = command.name();
        let event = match command {
            Command::Connect => self.connect().await,
            Command::Reconnect => match self.session.reconnect(&self.shutdown).await {
                Ok(()) => Event::Connected,
                Err(e) => Event::ConnectFailed(e),
            },
            Command::LoadMailboxes => match self.session.list_mailboxes().await {
                Ok(names) => Event::MailboxesLoaded(order_mailboxes(&names)),
                Err(e) => Event::Failed(e),
            },
            Command::OpenMailbox(mailbox) => {
                match self.session.fetch_page(&mailbox, self.page_size).await {
                    Ok(page) => Event::PageLoaded { mailbox, page },
                    Err(e) => Event::Failed(e),
                }
            }
            Command::LoadBody { mailbox, uid } => match self.bodies.load(&mailbox, uid).await {
                Ok(body) => Event::BodyLoaded { mailbox, uid, body },
                Err(e) => Event::Failed(e),
            },
            Command::MarkRead { mailbox, uid, read } => {
                match self.session.mark_read(&mailbox, uid, read).await {
                    Ok(()) => Event::MarkedRead { mailbox, uid, read },
                    Err(e) => Event::Failed(e),
                }
            }
            Command::Delete { mailbox, uid } => match self.session.delete(&mailbox, uid).await {
                Ok(()) => {
                    self.bodies.forget(&mailbox, uid);
                    Event::Deleted { mailbox, uid }
                }
                Err(e) => Event::Failed(e),
            },
            Command::Search { mailbox, query } => {
                match self.session.search(&mailbox, &query).await {
                    Ok(envelopes) => Event::SearchLoaded { query, envelopes },
                    Err(e) => Event::Failed(e),
                }
            }
            Command::Watch(mailbox) => {
                self.monitor.start(&mailbox, self.poll_interval).await;
                return None;
            }
            Command::Unwatch(mailbox) => {
                self.monitor.stop(&mailbox);
                return None;
            }
        };

        if let Event::Failed(e) | Event::ConnectFailed(e) = &event {
            warn!(command = name, error = %e, "command failed");
        }
        Some(event)
    }

    /// Cancel a pending reconnect and stop every poller.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.monitor.stop_all();
    }

    async fn connect(&self) -> Event {
        if let Err(e) = self.session.connect().await {
            return Event::ConnectFailed(e);
        }
        if let Err(e) = self.session.authenticate().await {
            self.session.disconnect().await;
            return Event::ConnectFailed(e);
        }
        Event::Connected
    }
}
