//! Per-mailbox new-mail polling
//!
//! A [`MailboxMonitor`] keeps at most one poller per mailbox. Each
//! poller periodically asks a [`MessageCounter`] for the mailbox's
//! message count and reports increases as [`Event::NewMail`].

use crate::dispatch::Event;
use crate::session::MessageCounter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type Registry = Arc<Mutex<HashMap<String, Entry>>>;

#[derive(Debug)]
struct Entry {
    id: u64,
    token: CancellationToken,
}

/// Registry of running pollers, keyed by mailbox name.
///
/// Dropping the monitor stops every poller.
pub struct MailboxMonitor<M: MessageCounter> {
    counter: Arc<M>,
    events: mpsc::Sender<Event>,
    entries: Registry,
    next_id: AtomicU64,
}

impl<M: MessageCounter> MailboxMonitor<M> {
    #[must_use]
    pub fn new(counter: Arc<M>, events: mpsc::Sender<Event>) -> Self {
        Self {
            counter,
            events,
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Start polling `mailbox` every `interval`, replacing any poller
    /// already running for it.
    ///
    /// The poller is registered before this returns, so a later
    /// [`stop`](Self::stop) cancels it even while the returned future is
    /// still pending. The future queries the current count once as the
    /// baseline, spawns the poller and resolves to its cancellation
    /// token. If the query fails, the first successful poll sets the
    /// baseline instead of reporting new mail.
    pub fn start(
        &self,
        mailbox: &str,
        interval: Duration,
    ) -> impl Future<Output = CancellationToken> + Send + use<M> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let replaced = lock(&self.entries).insert(
            mailbox.to_string(),
            Entry {
                id,
                token: token.clone(),
            },
        );
        if let Some(old) = replaced {
            old.token.cancel();
        }

        let poller = Poller {
            counter: Arc::clone(&self.counter),
            events: self.events.clone(),
            entries: Arc::clone(&self.entries),
            mailbox: mailbox.to_string(),
            id,
            token,
            last: None,
        };
        poller.seed_then_spawn(interval)
    }

    /// Stop the poller for `mailbox`. Returns whether one was running.
    pub fn stop(&self, mailbox: &str) -> bool {
        let removed = lock(&self.entries).remove(mailbox);
        removed.is_some_and(|entry| {
            entry.token.cancel();
            debug!(mailbox, "monitor stopped");
            true
        })
    }

    pub fn stop_all(&self) {
        for (_, entry) in lock(&self.entries).drain() {
            entry.token.cancel();
        }
    }

    #[must_use]
    pub fn is_monitoring(&self, mailbox: &str) -> bool {
        lock(&self.entries).contains_key(mailbox)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M: MessageCounter> Drop for MailboxMonitor<M> {
    fn drop(&mut self) {
        self.stop_all();
    }
}

struct Poller<M> {
    counter: Arc<M>,
    events: mpsc::Sender<Event>,
    entries: Registry,
    mailbox: String,
    id: u64,
    token: CancellationToken,
    last: Option<u32>,
}

impl<M: MessageCounter> Poller<M> {
    async fn seed_then_spawn(mut self, interval: Duration) -> CancellationToken {
        self.last = match self.counter.message_count(&self.mailbox).await {
            Ok(count) => Some(count),
            Err(e) => {
                debug!(
                    mailbox = %self.mailbox,
                    error = %e,
                    "initial count failed, deferring baseline"
                );
                None
            }
        };

        let token = self.token.clone();
        // Stopped or replaced while the seed query was in flight.
        if !self.is_registered() {
            debug!(mailbox = %self.mailbox, "monitor stopped before first poll");
            return token;
        }

        debug!(mailbox = %self.mailbox, ?interval, seed = ?self.last, "monitor started");
        tokio::spawn(self.run(interval));
        token
    }

    async fn run(mut self, interval: Duration) {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if !self.is_registered() {
                break;
            }

            let count = match self.counter.message_count(&self.mailbox).await {
                Ok(count) => count,
                Err(e) => {
                    debug!(mailbox = %self.mailbox, error = %e, "poll failed, skipping");
                    continue;
                }
            };

            match self.last {
                None => self.last = Some(count),
                Some(last) if count > last => {
                    self.last = Some(count);
                    if self.token.is_cancelled() {
                        break;
                    }
                    info!(mailbox = %self.mailbox, count, "new mail");
                    let event = Event::NewMail {
                        mailbox: self.mailbox.clone(),
                        count,
                    };
                    tokio::select! {
                        biased;
                        () = self.token.cancelled() => break,
                        sent = self.events.send(event) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                Some(_) => {}
            }
        }

        debug!(mailbox = %self.mailbox, "poller exited");
    }

    fn is_registered(&self) -> bool {
        !self.token.is_cancelled()
            && lock(&self.entries)
                .get(&self.mailbox)
                .is_some_and(|entry| entry.id == self.id)
    }
}

fn lock(entries: &Mutex<HashMap<String, Entry>>) -> MutexGuard<'_, HashMap<String, Entry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}
