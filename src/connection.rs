//! IMAP transport over `async-imap`
//!
//! Implements [`Connector`] and [`MailConnection`] on top of a TCP
//! stream that is optionally wrapped in TLS, either from the first
//! byte or after STARTTLS.

use crate::config::ImapConfig;
use crate::envelope::{Address, Envelope, parse_date};
use crate::error::{Error, Result};
use crate::flag::{Flag, StoreOp};
use crate::transport::{Connector, IdSet, MailConnection, TlsMode};
use async_imap::imap_proto::types::Address as WireAddress;
use async_imap::types::{Fetch, Flag as WireFlag};
use async_imap::{Client, Session};
use async_trait::async_trait;
use futures::TryStreamExt;
use rustls::pki_types::ServerName;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info, warn};

/// Any byte stream an IMAP client can run over.
pub trait ImapStream: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

impl<T> ImapStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

type Stream = Compat<Box<dyn ImapStream>>;

const ENVELOPE_QUERY: &str = "(UID ENVELOPE FLAGS)";

/// Opens [`ImapConnection`]s.
#[derive(Debug, Clone, Default)]
pub struct ImapConnector {
    accept_invalid_certs: bool,
}

impl ImapConnector {
    #[must_use]
    pub const fn new(config: &ImapConfig) -> Self {
        Self {
            accept_invalid_certs: config.accept_invalid_certs,
        }
    }

    fn tls_connector(&self) -> Result<TlsConnector> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(e.to_string()))?;

        let config = if self.accept_invalid_certs {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
                .with_no_client_auth()
        } else {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        };
        Ok(TlsConnector::from(Arc::new(config)))
    }

    async fn handshake<S>(&self, host: &str, stream: S) -> Result<tokio_rustls::client::TlsStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;
        self.tls_connector()?
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::Tls(e.to_string()))
    }
}

#[async_trait]
impl Connector for ImapConnector {
    type Connection = ImapConnection;

    async fn dial(&self, address: &str, tls: TlsMode) -> Result<ImapConnection> {
        let host = address.rsplit_once(':').map_or(address, |(host, _)| host);
        debug!("Connecting to IMAP server at {} ({:?})", address, tls);

        let tcp_stream = TcpStream::connect(address).await?;

        let stream: Box<dyn ImapStream> = match tls {
            TlsMode::Plain => {
                warn!("Connecting to {} without TLS", address);
                Box::new(tcp_stream)
            }
            TlsMode::Tls => Box::new(self.handshake(host, tcp_stream).await?),
            TlsMode::StartTls => {
                let mut client = Client::new(tcp_stream.compat());
                client
                    .run_command_and_check_ok("STARTTLS", None)
                    .await
                    .map_err(|e| Error::Tls(format!("STARTTLS failed: {e}")))?;
                let inner = client.into_inner().into_inner();
                Box::new(self.handshake(host, inner).await?)
            }
        };

        info!("Connected to IMAP server");
        Ok(ImapConnection {
            stage: Stage::Greeted(Client::new(stream.compat())),
        })
    }
}

enum Stage {
    Greeted(Client<Stream>),
    LoggedIn(Session<Stream>),
    Closed,
}

/// A live IMAP connection, before or after LOGIN.
pub struct ImapConnection {
    stage: Stage,
}

impl fmt::Debug for ImapConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self.stage {
            Stage::Greeted(_) => "greeted",
            Stage::LoggedIn(_) => "logged-in",
            Stage::Closed => "closed",
        };
        f.debug_struct("ImapConnection").field("stage", &stage).finish()
    }
}

impl ImapConnection {
    fn session(&mut self) -> Result<&mut Session<Stream>> {
        match &mut self.stage {
            Stage::LoggedIn(session) => Ok(session),
            Stage::Greeted(_) => Err(Error::NotAuthenticated),
            Stage::Closed => Err(Error::NotConnected),
        }
    }

    async fn fetch(&mut self, ids: &IdSet, query: &str) -> Result<Vec<Fetch>> {
        let set = ids.to_string();
        let session = self.session()?;
        let fetches = if ids.is_uid() {
            session
                .uid_fetch(&set, query)
                .await
                .map_err(|e| Error::Imap(format!("Fetch failed: {e}")))?
                .try_collect::<Vec<_>>()
                .await
        } else {
            session
                .fetch(&set, query)
                .await
                .map_err(|e| Error::Imap(format!("Fetch failed: {e}")))?
                .try_collect::<Vec<_>>()
                .await
        }
        .map_err(|e| Error::Imap(format!("Fetch error: {e}")))?;
        drain_unsolicited(session);
        Ok(fetches)
    }
}

#[async_trait]
impl MailConnection for ImapConnection {
    async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        match std::mem::replace(&mut self.stage, Stage::Closed) {
            Stage::Greeted(client) => match client.login(username, password).await {
                Ok(session) => {
                    self.stage = Stage::LoggedIn(session);
                    Ok(())
                }
                Err((e, client)) => {
                    self.stage = Stage::Greeted(client);
                    Err(Error::Imap(format!("Login failed: {e}")))
                }
            },
            logged_in @ Stage::LoggedIn(_) => {
                self.stage = logged_in;
                Ok(())
            }
            Stage::Closed => Err(Error::NotConnected),
        }
    }

    async fn logout(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.stage, Stage::Closed) {
            Stage::LoggedIn(mut session) => session
                .logout()
                .await
                .map_err(|e| Error::Imap(format!("Logout failed: {e}"))),
            Stage::Greeted(_) | Stage::Closed => Ok(()),
        }
    }

    async fn close(&mut self) {
        self.stage = Stage::Closed;
    }

    async fn list_mailboxes(&mut self) -> Result<Vec<String>> {
        let session = self.session()?;
        let names = session
            .list(Some(""), Some("*"))
            .await
            .map_err(|e| Error::Imap(format!("List folders failed: {e}")))?
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| Error::Imap(format!("List folders failed: {e}")))?
            .iter()
            .map(|name| name.name().to_string())
            .collect();
        drain_unsolicited(session);
        Ok(names)
    }

    async fn select_mailbox(&mut self, name: &str) -> Result<u32> {
        let session = self.session()?;
        let mailbox = session
            .select(name)
            .await
            .map_err(|e| Error::Imap(format!("Failed to select {name}: {e}")))?;
        drain_unsolicited(session);
        Ok(mailbox.exists)
    }

    async fn mailbox_status(&mut self, name: &str) -> Result<u32> {
        let session = self.session()?;
        let mailbox = session
            .status(name, "(MESSAGES)")
            .await
            .map_err(|e| Error::Imap(format!("Status of {name} failed: {e}")))?;
        drain_unsolicited(session);
        Ok(mailbox.exists)
    }

    async fn fetch_envelopes(&mut self, ids: &IdSet) -> Result<Vec<Envelope>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let fetches = self.fetch(ids, ENVELOPE_QUERY).await?;
        Ok(fetches.iter().filter_map(envelope_from_fetch).collect())
    }

    async fn fetch_body(&mut self, uid: u32) -> Result<Vec<u8>> {
        let fetches = self.fetch(&IdSet::Uids(vec![uid]), "(BODY.PEEK[])").await?;
        fetches
            .iter()
            .find_map(|fetch| fetch.body().map(<[u8]>::to_vec))
            .ok_or_else(|| Error::Imap(format!("No body found for UID {uid}")))
    }

    async fn search(&mut self, query: &str) -> Result<Vec<u32>> {
        let session = self.session()?;
        let uids = session
            .uid_search(query)
            .await
            .map_err(|e| Error::Imap(format!("Search failed: {e}")))?;
        drain_unsolicited(session);
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn store_flags(&mut self, uids: &[u32], op: StoreOp, flags: &[Flag]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let set = IdSet::Uids(uids.to_vec()).to_string();
        let session = self.session()?;
        session
            .uid_store(&set, op.query(flags))
            .await
            .map_err(|e| Error::Imap(format!("Store failed: {e}")))?
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| Error::Imap(format!("Store failed: {e}")))?;
        drain_unsolicited(session);
        Ok(())
    }

    async fn expunge(&mut self) -> Result<()> {
        let session = self.session()?;
        session
            .expunge()
            .await
            .map_err(|e| Error::Imap(format!("Expunge failed: {e}")))?
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| Error::Imap(format!("Expunge failed: {e}")))?;
        drain_unsolicited(session);
        Ok(())
    }
}

/// Discard queued unsolicited responses so the bounded channel
/// async-imap feeds them into never fills up.
fn drain_unsolicited(session: &Session<Stream>) {
    while let Ok(response) = session.unsolicited_responses.try_recv() {
        debug!("Ignoring unsolicited response: {:?}", response);
    }
}

fn envelope_from_fetch(fetch: &Fetch) -> Option<Envelope> {
    let uid = fetch.uid?;
    let envelope = fetch.envelope()?;
    let text = |raw: &[u8]| String::from_utf8_lossy(raw).into_owned();

    Some(Envelope {
        uid,
        subject: envelope.subject.as_deref().map(text).unwrap_or_default(),
        from: convert_addresses(envelope.from.as_deref()),
        to: convert_addresses(envelope.to.as_deref()),
        date: envelope.date.as_deref().and_then(|raw| parse_date(&text(raw))),
        flags: fetch.flags().map(convert_flag).collect(),
    })
}

fn convert_addresses(addresses: Option<&[WireAddress<'_>]>) -> Vec<Address> {
    let text = |raw: &[u8]| String::from_utf8_lossy(raw).into_owned();
    addresses
        .unwrap_or_default()
        .iter()
        .map(|addr| {
            let mailbox = addr.mailbox.as_deref().map(text).unwrap_or_default();
            let email = match addr.host.as_deref().map(text) {
                Some(host) if !host.is_empty() => format!("{mailbox}@{host}"),
                _ => mailbox,
            };
            Address {
                name: addr.name.as_deref().map(text).filter(|n| !n.is_empty()),
                email,
            }
        })
        .collect()
}

fn convert_flag(flag: WireFlag<'_>) -> Flag {
    match flag {
        WireFlag::Seen => Flag::Seen,
        WireFlag::Answered => Flag::Answered,
        WireFlag::Flagged => Flag::Flagged,
        WireFlag::Deleted => Flag::Deleted,
        WireFlag::Draft => Flag::Draft,
        WireFlag::Custom(name) => Flag::parse(&name),
        other => Flag::Keyword(format!("{other:?}")),
    }
}

/// Certificate verifier that accepts all certificates
/// (for local bridges with self-signed certs).
#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
