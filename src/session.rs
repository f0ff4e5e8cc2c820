//! The single logical connection to the mail server
//!
//! [`Session`] owns at most one live connection handle and moves
//! through [`ConnectionState`] strictly forward
//! (`Disconnected → Connecting → Connected → Authenticated`), falling
//! back to `Disconnected` on disconnect or dial failure.
//!
//! All state lives behind one async read/write lock. Operations that
//! change state or talk to the server take the write half and keep it
//! for the whole network exchange, so at most one of them is ever in
//! flight; concurrent callers queue up behind it.

use crate::config::ImapConfig;
use crate::envelope::{Envelope, Page};
use crate::error::{Error, Result};
use crate::flag::{Flag, StoreOp};
use crate::reconnect::ReconnectPolicy;
use crate::transport::{Connector, IdSet, MailConnection};
use async_trait::async_trait;
use std::fmt;
use tokio::sync::{Mutex, RwLock, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
        })
    }
}

struct Inner<T> {
    state: ConnectionState,
    // Only ever reached through `get_mut` under the write lock; the
    // mutex makes `Inner` Sync for connections that are only Send.
    conn: Option<Mutex<T>>,
    selected: Option<String>,
}

/// Connection lifecycle plus the mailbox operations the UI issues.
pub struct Session<C: Connector> {
    connector: C,
    config: ImapConfig,
    policy: ReconnectPolicy,
    inner: RwLock<Inner<C::Connection>>,
}

impl<C: Connector> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Session<C> {
    /// Create a disconnected session.
    #[must_use]
    pub fn new(connector: C, config: ImapConfig, policy: ReconnectPolicy) -> Self {
        Self {
            connector,
            config,
            policy,
            inner: RwLock::new(Inner {
                state: ConnectionState::Disconnected,
                conn: None,
                selected: None,
            }),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ImapConfig {
        &self.config
    }

    #[must_use]
    pub const fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.read().await.state
    }

    pub async fn is_connected(&self) -> bool {
        matches!(
            self.state().await,
            ConnectionState::Connected | ConnectionState::Authenticated
        )
    }

    /// Dial the server.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyConnected`] unless the session is disconnected;
    /// [`Error::Connection`] if the dial fails, in which case the
    /// session is disconnected again.
    pub async fn connect(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state != ConnectionState::Disconnected {
            return Err(Error::AlreadyConnected);
        }

        inner.state = ConnectionState::Connecting;
        let address = self.config.address();

        match self.connector.dial(&address, self.config.tls).await {
            Ok(conn) => {
                inner.conn = Some(Mutex::new(conn));
                inner.state = ConnectionState::Connected;
                debug!(%address, "connected");
                Ok(())
            }
            Err(e) => {
                inner.state = ConnectionState::Disconnected;
                Err(Error::Connection {
                    operation: "dial",
                    source: Box::new(e),
                })
            }
        }
    }

    /// Log in with the configured credentials.
    ///
    /// A rejected login leaves the session `Connected`.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] unless the session is exactly
    /// `Connected`; [`Error::Authentication`] if the server refuses
    /// the credentials.
    pub async fn authenticate(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }
        let Some(conn) = inner.conn.as_mut().map(Mutex::get_mut) else {
            return Err(Error::NotConnected);
        };

        if let Err(e) = conn.login(&self.config.username, &self.config.password).await {
            return Err(Error::Authentication {
                identity: self.config.username.clone(),
                source: Box::new(e),
            });
        }

        inner.state = ConnectionState::Authenticated;
        info!(user = %self.config.username, "authenticated");
        Ok(())
    }

    /// Log out and drop the connection. Does nothing when already
    /// disconnected; a failed logout still closes the connection.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.write().await;
        if inner.state == ConnectionState::Disconnected {
            return;
        }

        if let Some(conn) = inner.conn.take() {
            let mut conn = conn.into_inner();
            if let Err(e) = conn.logout().await {
                debug!(error = %e, "logout failed, closing anyway");
            }
            conn.close().await;
        }

        inner.selected = None;
        inner.state = ConnectionState::Disconnected;
        debug!("disconnected");
    }

    /// Tear down the connection and try to re-establish an
    /// authenticated one, waiting `policy.backoff(attempt)` after each
    /// failed attempt.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] if `cancel` fires while waiting between
    /// attempts; [`Error::ReconnectExhausted`] once every attempt has
    /// failed.
    pub async fn reconnect(&self, cancel: &CancellationToken) -> Result<()> {
        self.disconnect().await;

        let attempts = self.policy.max_attempts();
        for attempt in 0..attempts {
            let failure = match self.connect().await {
                Ok(()) => match self.authenticate().await {
                    Ok(()) => {
                        info!(attempt, "reconnected");
                        return Ok(());
                    }
                    Err(e) => {
                        self.disconnect().await;
                        e
                    }
                },
                Err(e) => e,
            };

            warn!(attempt, error = %failure, "reconnect attempt failed");
            if attempt + 1 == attempts {
                break;
            }

            let delay = self.policy.backoff(attempt);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }

        Err(Error::ReconnectExhausted { attempts })
    }

    /// Names of every mailbox on the server.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] or [`Error::NotAuthenticated`] unless the
    /// session is logged in; otherwise returns an error if the LIST command
    /// fails.
    pub async fn list_mailboxes(&self) -> Result<Vec<String>> {
        let mut inner = self.authenticated().await?;
        inner.conn_mut()?.list_mailboxes().await
    }

    /// Current message count of `mailbox`, without selecting it.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] or [`Error::NotAuthenticated`] unless the
    /// session is logged in; otherwise returns an error if the STATUS
    /// command fails.
    pub async fn message_count(&self, mailbox: &str) -> Result<u32> {
        let mut inner = self.authenticated().await?;
        inner.conn_mut()?.mailbox_status(mailbox).await
    }

    /// Select `mailbox` and fetch the envelopes of its newest
    /// `page_size` messages, newest first.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] or [`Error::NotAuthenticated`] unless the
    /// session is logged in; otherwise returns an error if the SELECT or
    /// FETCH fails.
    pub async fn fetch_page(&self, mailbox: &str, page_size: u32) -> Result<Page> {
        let mut inner = self.authenticated().await?;
        let total = inner.select(mailbox).await?;
        if total == 0 || page_size == 0 {
            return Ok(Page {
                envelopes: vec![],
                total,
            });
        }

        let start = total.saturating_sub(page_size) + 1;
        let mut envelopes = inner
            .conn_mut()?
            .fetch_envelopes(&IdSet::Sequence(start..=total))
            .await?;
        envelopes.sort_by(|a, b| b.uid.cmp(&a.uid));
        debug!(mailbox, total, fetched = envelopes.len(), "page loaded");
        Ok(Page { envelopes, total })
    }

    /// Raw bytes of message `uid` in `mailbox`.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] or [`Error::NotAuthenticated`] unless the
    /// session is logged in; otherwise returns an error if the SELECT or
    /// FETCH fails or the message does not exist.
    pub async fn fetch_body(&self, mailbox: &str, uid: u32) -> Result<Vec<u8>> {
        let mut inner = self.authenticated().await?;
        inner.ensure_selected(mailbox).await?;
        inner.conn_mut()?.fetch_body(uid).await
    }

    /// Full-text search in `mailbox`, newest first.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] or [`Error::NotAuthenticated`] unless the
    /// session is logged in; otherwise returns an error if the SELECT,
    /// SEARCH, or FETCH fails.
    pub async fn search(&self, mailbox: &str, query: &str) -> Result<Vec<Envelope>> {
        let mut inner = self.authenticated().await?;
        inner.select(mailbox).await?;

        let criteria = format!("TEXT {}", quote(query));
        let conn = inner.conn_mut()?;
        let uids = conn.search(&criteria).await?;
        if uids.is_empty() {
            return Ok(vec![]);
        }

        info!("Found {} messages matching '{}'", uids.len(), query);
        let mut envelopes = conn.fetch_envelopes(&IdSet::Uids(uids)).await?;
        envelopes.sort_by(|a, b| b.uid.cmp(&a.uid));
        Ok(envelopes)
    }

    /// Set or clear `\Seen` on message `uid`.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] or [`Error::NotAuthenticated`] unless the
    /// session is logged in; otherwise returns an error if the SELECT or
    /// STORE fails.
    pub async fn mark_read(&self, mailbox: &str, uid: u32, read: bool) -> Result<()> {
        let mut inner = self.authenticated().await?;
        inner.ensure_selected(mailbox).await?;
        let op = if read { StoreOp::Add } else { StoreOp::Remove };
        inner.conn_mut()?.store_flags(&[uid], op, &[Flag::Seen]).await
    }

    /// Flag message `uid` as deleted and expunge the mailbox.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] or [`Error::NotAuthenticated`] unless the
    /// session is logged in; otherwise returns an error if the SELECT,
    /// STORE, or EXPUNGE fails.
    pub async fn delete(&self, mailbox: &str, uid: u32) -> Result<()> {
        let mut inner = self.authenticated().await?;
        inner.ensure_selected(mailbox).await?;
        let conn = inner.conn_mut()?;
        conn.store_flags(&[uid], StoreOp::Add, &[Flag::Deleted]).await?;
        conn.expunge().await
    }

    async fn authenticated(&self) -> Result<RwLockWriteGuard<'_, Inner<C::Connection>>> {
        let inner = self.inner.write().await;
        match inner.state {
            ConnectionState::Authenticated => Ok(inner),
            ConnectionState::Connected => Err(Error::NotAuthenticated),
            ConnectionState::Disconnected | ConnectionState::Connecting => Err(Error::NotConnected),
        }
    }
}

impl<T: MailConnection> Inner<T> {
    fn conn_mut(&mut self) -> Result<&mut T> {
        self.conn
            .as_mut()
            .map(Mutex::get_mut)
            .ok_or(Error::NotConnected)
    }

    async fn select(&mut self, mailbox: &str) -> Result<u32> {
        self.selected = None;
        let count = self.conn_mut()?.select_mailbox(mailbox).await?;
        self.selected = Some(mailbox.to_string());
        Ok(count)
    }

    async fn ensure_selected(&mut self, mailbox: &str) -> Result<()> {
        if self.selected.as_deref() != Some(mailbox) {
            self.select(mailbox).await?;
        }
        Ok(())
    }
}

fn quote(text: &str) -> String {
    let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Anything that can report how many messages a mailbox holds.
#[async_trait]
pub trait MessageCounter: Send + Sync + 'static {
    async fn message_count(&self, mailbox: &str) -> Result<u32>;
}

#[async_trait]
impl<C: Connector> MessageCounter for Session<C> {
    async fn message_count(&self, mailbox: &str) -> Result<u32> {
        Self::message_count(self, mailbox).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::transport::TlsMode;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Scripted outcomes shared between a connector and the
    /// connections it hands out.
    #[derive(Default)]
    struct Script {
        dials: Mutex<VecDeque<bool>>,
        logins: Mutex<VecDeque<bool>>,
        dial_count: AtomicUsize,
        logouts: AtomicUsize,
        closes: AtomicUsize,
        fail_logout: bool,
    }

    impl Script {
        fn next(queue: &Mutex<VecDeque<bool>>) -> bool {
            queue.lock().unwrap().pop_front().unwrap_or(true)
        }
    }

    struct ScriptedConnector(Arc<Script>);

    struct ScriptedConnection(Arc<Script>);

    #[async_trait]
    impl Connector for ScriptedConnector {
        type Connection = ScriptedConnection;

        async fn dial(&self, _address: &str, _tls: TlsMode) -> Result<ScriptedConnection> {
            self.0.dial_count.fetch_add(1, Ordering::SeqCst);
            if Script::next(&self.0.dials) {
                Ok(ScriptedConnection(Arc::clone(&self.0)))
            } else {
                Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )))
            }
        }
    }

    #[async_trait]
    impl MailConnection for ScriptedConnection {
        async fn login(&mut self, _username: &str, _password: &str) -> Result<()> {
            if Script::next(&self.0.logins) {
                Ok(())
            } else {
                Err(Error::Imap("NO invalid credentials".into()))
            }
        }

        async fn logout(&mut self) -> Result<()> {
            self.0.logouts.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_logout {
                Err(Error::Imap("BYE".into()))
            } else {
                Ok(())
            }
        }

        async fn close(&mut self) {
            self.0.closes.fetch_add(1, Ordering::SeqCst);
        }

        async fn list_mailboxes(&mut self) -> Result<Vec<String>> {
            Ok(vec!["INBOX".into()])
        }

        async fn select_mailbox(&mut self, _name: &str) -> Result<u32> {
            Ok(0)
        }

        async fn mailbox_status(&mut self, _name: &str) -> Result<u32> {
            Ok(3)
        }

        async fn fetch_envelopes(&mut self, _ids: &IdSet) -> Result<Vec<Envelope>> {
            Ok(vec![])
        }

        async fn fetch_body(&mut self, _uid: u32) -> Result<Vec<u8>> {
            Ok(vec![])
        }

        async fn search(&mut self, _query: &str) -> Result<Vec<u32>> {
            Ok(vec![])
        }

        async fn store_flags(&mut self, _uids: &[u32], _op: StoreOp, _flags: &[Flag]) -> Result<()> {
            Ok(())
        }

        async fn expunge(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn config() -> ImapConfig {
        ImapConfig {
            host: "127.0.0.1".into(),
            port: 1143,
            tls: TlsMode::Plain,
            username: "testuser".into(),
            password: "testpass".into(),
            accept_invalid_certs: false,
        }
    }

    fn session_with(script: Script, attempts: u32) -> (Session<ScriptedConnector>, Arc<Script>) {
        let script = Arc::new(script);
        let policy =
            ReconnectPolicy::new(Duration::from_secs(1), Duration::from_secs(10), attempts).unwrap();
        let session = Session::new(ScriptedConnector(Arc::clone(&script)), config(), policy);
        (session, script)
    }

    fn outcomes(values: &[bool]) -> Mutex<VecDeque<bool>> {
        Mutex::new(values.iter().copied().collect())
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let (session, _) = session_with(Script::default(), 3);
        assert_eq!(session.state().await, ConnectionState::Disconnected);
        assert!(!session.is_connected().await);
    }

    #[tokio::test]
    async fn connect_then_authenticate() {
        let (session, _) = session_with(Script::default(), 3);
        session.connect().await.unwrap();
        assert_eq!(session.state().await, ConnectionState::Connected);
        assert!(session.is_connected().await);

        session.authenticate().await.unwrap();
        assert_eq!(session.state().await, ConnectionState::Authenticated);
        assert!(session.is_connected().await);
    }

    #[tokio::test]
    async fn connect_twice_is_rejected() {
        let (session, _) = session_with(Script::default(), 3);
        session.connect().await.unwrap();
        assert!(matches!(session.connect().await, Err(Error::AlreadyConnected)));
        session.authenticate().await.unwrap();
        assert!(matches!(session.connect().await, Err(Error::AlreadyConnected)));
    }

    #[tokio::test]
    async fn authenticate_requires_connected() {
        let (session, _) = session_with(Script::default(), 3);
        assert!(matches!(session.authenticate().await, Err(Error::NotConnected)));

        session.connect().await.unwrap();
        session.authenticate().await.unwrap();
        // Already authenticated: the preceding transition was not a connect.
        assert!(matches!(session.authenticate().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn dial_failure_resets_to_disconnected() {
        let script = Script {
            dials: outcomes(&[false]),
            ..Script::default()
        };
        let (session, _) = session_with(script, 3);

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, Error::Connection { operation: "dial", .. }));
        assert_eq!(session.state().await, ConnectionState::Disconnected);

        session.connect().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_login_stays_connected() {
        let script = Script {
            logins: outcomes(&[false]),
            ..Script::default()
        };
        let (session, _) = session_with(script, 3);
        session.connect().await.unwrap();

        match session.authenticate().await {
            Err(Error::Authentication { identity, .. }) => assert_eq!(identity, "testuser"),
            other => panic!("expected authentication error, got {other:?}"),
        }
        assert_eq!(session.state().await, ConnectionState::Connected);

        session.authenticate().await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_always_closes() {
        let script = Script {
            fail_logout: true,
            ..Script::default()
        };
        let (session, script) = session_with(script, 3);
        session.disconnect().await;
        assert_eq!(script.logouts.load(Ordering::SeqCst), 0);

        session.connect().await.unwrap();
        session.authenticate().await.unwrap();
        session.disconnect().await;
        session.disconnect().await;

        assert_eq!(session.state().await, ConnectionState::Disconnected);
        assert_eq!(script.logouts.load(Ordering::SeqCst), 1);
        assert_eq!(script.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn operations_need_authentication() {
        let (session, _) = session_with(Script::default(), 3);
        assert!(matches!(session.list_mailboxes().await, Err(Error::NotConnected)));

        session.connect().await.unwrap();
        assert!(matches!(session.list_mailboxes().await, Err(Error::NotAuthenticated)));

        session.authenticate().await.unwrap();
        assert_eq!(session.list_mailboxes().await.unwrap(), vec!["INBOX"]);
        assert_eq!(MessageCounter::message_count(&session, "INBOX").await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_retries_with_backoff() {
        let script = Script {
            dials: outcomes(&[false, false, true]),
            ..Script::default()
        };
        let (session, script) = session_with(script, 5);
        let started = tokio::time::Instant::now();

        session.reconnect(&CancellationToken::new()).await.unwrap();

        assert_eq!(session.state().await, ConnectionState::Authenticated);
        assert_eq!(script.dial_count.load(Ordering::SeqCst), 3);
        // backoff(0) + backoff(1)
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_disconnects_after_rejected_login() {
        let script = Script {
            logins: outcomes(&[false, true]),
            ..Script::default()
        };
        let (session, script) = session_with(script, 5);
        session.reconnect(&CancellationToken::new()).await.unwrap();

        assert_eq!(script.dial_count.load(Ordering::SeqCst), 2);
        assert_eq!(script.closes.load(Ordering::SeqCst), 1);
        assert_eq!(session.state().await, ConnectionState::Authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_gives_up_after_max_attempts() {
        let script = Script {
            dials: outcomes(&[false; 10]),
            ..Script::default()
        };
        let (session, script) = session_with(script, 3);
        let started = tokio::time::Instant::now();

        let err = session.reconnect(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, Error::ReconnectExhausted { attempts: 3 }));
        assert_eq!(script.dial_count.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(1 + 2));
        assert_eq!(session.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_stops_when_cancelled() {
        let script = Script {
            dials: outcomes(&[false; 10]),
            ..Script::default()
        };
        let (session, script) = session_with(script, 5);
        let session = Arc::new(session);
        let cancel = CancellationToken::new();

        let task = {
            let session = Arc::clone(&session);
            let cancel = cancel.clone();
            tokio::spawn(async move { session.reconnect(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(1500)).await;
        cancel.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(script.dial_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reconnect_replaces_live_connection() {
        let (session, script) = session_with(Script::default(), 3);
        session.connect().await.unwrap();
        session.authenticate().await.unwrap();

        session.reconnect(&CancellationToken::new()).await.unwrap();

        assert_eq!(script.logouts.load(Ordering::SeqCst), 1);
        assert_eq!(script.dial_count.load(Ordering::SeqCst), 2);
        assert_eq!(session.state().await, ConnectionState::Authenticated);
    }

    #[test]
    fn search_text_is_quoted() {
        assert_eq!(quote("hello"), "\"hello\"");
        assert_eq!(quote(r#"say "hi"\"#), r#""say \"hi\"\\""#);
    }
}
