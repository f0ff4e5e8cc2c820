//! Cache-aside message body retrieval
//!
//! [`BodyLoader::load`] answers from the [`Cache`] when it can and
//! only goes to the server on a miss, rendering the raw message to
//! display text before storing it.

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::transport::Connector;
use email_extract::parse_email;
use std::sync::Arc;
use tracing::debug;

/// Turns raw RFC 5322 bytes into display text.
pub trait Renderer: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns an error if the message cannot be parsed.
    fn render(&self, uid: u32, raw: &[u8]) -> Result<String>;
}

/// Default renderer: the best text part of the parsed message, or the
/// raw bytes decoded lossily when the message has no usable text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextRenderer;

impl Renderer for TextRenderer {
    fn render(&self, uid: u32, raw: &[u8]) -> Result<String> {
        let email = parse_email(uid, raw).map_err(|e| Error::Parse(e.to_string()))?;
        Ok(or_raw_text(email.body.best_text().to_string(), raw))
    }
}

fn or_raw_text(rendered: String, raw: &[u8]) -> String {
    if rendered.trim().is_empty() {
        String::from_utf8_lossy(raw).into_owned()
    } else {
        rendered
    }
}

pub struct BodyLoader<C: Connector, R = TextRenderer> {
    session: Arc<Session<C>>,
    cache: Cache<String>,
    renderer: R,
}

impl<C: Connector> BodyLoader<C> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(session: Arc<Session<C>>, capacity: usize) -> Self {
        Self::with_renderer(session, capacity, TextRenderer)
    }
}

impl<C: Connector, R: Renderer> BodyLoader<C, R> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_renderer(session: Arc<Session<C>>, capacity: usize, renderer: R) -> Self {
        Self {
            session,
            cache: Cache::new(capacity),
            renderer,
        }
    }

    /// Cache key of a message. UIDs are only unique within a mailbox.
    #[must_use]
    pub fn cache_key(mailbox: &str, uid: u32) -> String {
        format!("{mailbox}/{uid}")
    }

    /// Rendered body of message `uid` in `mailbox`.
    ///
    /// # Errors
    ///
    /// Returns an error on a cache miss if the fetch fails or the
    /// message cannot be rendered.
    pub async fn load(&self, mailbox: &str, uid: u32) -> Result<String> {
        let key = Self::cache_key(mailbox, uid);
        if let Some(body) = self.cache.get(&key) {
            debug!(mailbox, uid, "body cache hit");
            return Ok(body);
        }

        let raw = self.session.fetch_body(mailbox, uid).await?;
        let body = self.renderer.render(uid, &raw)?;
        self.cache.set(key, body.clone());
        debug!(mailbox, uid, bytes = raw.len(), "body fetched");
        Ok(body)
    }

    /// Drop the cached body of a message, e.g. after deleting it.
    pub fn forget(&self, mailbox: &str, uid: u32) {
        self.cache.delete(&Self::cache_key(mailbox, uid));
    }

    #[must_use]
    pub const fn cache(&self) -> &Cache<String> {
        &self.cache
    }
}
