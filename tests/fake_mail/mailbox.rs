//! Test data model for the fake mail server
//!
//! Provides a builder-style API for constructing server state:
//!
//! ```ignore
//! let mailbox = MailboxBuilder::new()
//!     .folder("INBOX")
//!         .email(1, false, raw_rfc5322_bytes)
//!         .email(2, true, raw_rfc5322_bytes)
//!     .folder("Sent")
//!         .email(10, true, raw_rfc5322_bytes)
//!     .build();
//! ```

use budge::{Address, Envelope, Flag, parse_date};

/// All folders on the fake server.
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    pub folders: Vec<Folder>,
}

impl Mailbox {
    /// Look up a folder by name (case-sensitive, like most servers).
    pub fn folder(&self, name: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.name == name)
    }

    pub fn folder_mut(&mut self, name: &str) -> Option<&mut Folder> {
        self.folders.iter_mut().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct Folder {
    pub name: String,
    /// Ordered by UID; a message's sequence number is its position + 1.
    pub emails: Vec<TestEmail>,
}

/// A stored message.
///
/// - `uid`: unique within its folder, never reused.
/// - `seen` / `deleted`: the `\Seen` and `\Deleted` flags.
/// - `raw`: the complete message as returned for `BODY[]`.
#[derive(Debug, Clone)]
pub struct TestEmail {
    pub uid: u32,
    pub seen: bool,
    pub deleted: bool,
    pub raw: Vec<u8>,
}

impl TestEmail {
    pub fn flags(&self) -> Vec<Flag> {
        let mut flags = Vec::new();
        if self.seen {
            flags.push(Flag::Seen);
        }
        if self.deleted {
            flags.push(Flag::Deleted);
        }
        flags
    }

    /// Envelope built from the message's own headers.
    pub fn envelope(&self) -> Envelope {
        let text = String::from_utf8_lossy(&self.raw);
        Envelope {
            uid: self.uid,
            subject: header(&text, "Subject").unwrap_or_default(),
            from: header(&text, "From").map(|v| parse_address(&v)).into_iter().collect(),
            to: header(&text, "To").map(|v| parse_address(&v)).into_iter().collect(),
            date: header(&text, "Date").and_then(|v| parse_date(&v)),
            flags: self.flags(),
        }
    }
}

fn header(text: &str, name: &str) -> Option<String> {
    text.split("\r\n")
        .take_while(|line| !line.is_empty())
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim().to_string())
        })
}

fn parse_address(value: &str) -> Address {
    match value.split_once('<') {
        Some((name, rest)) => Address {
            name: Some(name.trim().trim_matches('"').to_string()).filter(|n| !n.is_empty()),
            email: rest.trim_end_matches('>').trim().to_string(),
        },
        None => Address {
            name: None,
            email: value.trim().to_string(),
        },
    }
}

/// Builder for a `Mailbox`.
///
/// Call `.folder(name)` to start a new folder, then chain
/// `.email(uid, seen, raw)` calls to add messages to it.
pub struct MailboxBuilder {
    folders: Vec<Folder>,
}

impl MailboxBuilder {
    pub fn new() -> Self {
        Self {
            folders: Vec::new(),
        }
    }

    /// Add a new folder. Subsequent `.email()` calls add to this folder.
    pub fn folder(mut self, name: &str) -> Self {
        self.folders.push(Folder {
            name: name.to_string(),
            emails: Vec::new(),
        });
        self
    }

    /// Add a message to the most recently added folder.
    ///
    /// # Panics
    ///
    /// Panics if called before any `.folder()` call.
    pub fn email(mut self, uid: u32, seen: bool, raw: &[u8]) -> Self {
        let folder = self
            .folders
            .last_mut()
            .expect("call .folder() before .email()");
        folder.emails.push(TestEmail {
            uid,
            seen,
            deleted: false,
            raw: raw.to_vec(),
        });
        folder.emails.sort_by_key(|e| e.uid);
        self
    }

    pub fn build(self) -> Mailbox {
        Mailbox {
            folders: self.folders,
        }
    }
}

/// Build a minimal RFC 5322 message.
pub fn make_raw_email(from: &str, subject: &str, body: &str, date: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\n\
         To: bob@example.com\r\n\
         Subject: {subject}\r\n\
         Date: {date}\r\n\
         Message-ID: <test-{subject}@fake.test>\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {body}"
    )
    .into_bytes()
}
