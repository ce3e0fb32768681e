//! Inbound record model.
//!
//! A [`Record`] is one accepted submission: an optional payload plus a little
//! metadata. Records are built once by the ingestion endpoint, persisted, and
//! then shared read-only (behind an `Arc`) with every plugin.
//!
//! # On-disk form
//!
//! Records serialize to a flat JSON object. Printable payloads are stored as
//! text; anything else is base64-encoded and flagged with `"base64": true` so
//! readers can reverse the transform:
//!
//! ```json
//! {"time":"2024-05-01T10:00:00Z","id":"…","from":"a@b.com","subject":"hi","payload":"hello"}
//! ```

use std::borrow::Cow;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum sender length in characters.
pub const MAX_SENDER_LEN: usize = 50;

/// Maximum subject length in characters.
pub const MAX_SUBJECT_LEN: usize = 80;

/// Filenames shorter than this are treated as placeholders and dropped.
pub const MIN_FILENAME_LEN: usize = 2;

/// Shared handle passed from the dispatcher to plugins.
pub type SharedRecord = std::sync::Arc<Record>;

/// One ingested unit of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "StoredRecord", try_from = "StoredRecord")]
pub struct Record {
    id: Uuid,
    created_at: DateTime<Utc>,
    sender: Option<String>,
    subject: Option<String>,
    filename: Option<String>,
    payload: Vec<u8>,
}

impl Record {
    /// Create a record with a fresh random identifier, stamped now.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            sender: None,
            subject: None,
            filename: None,
            payload: payload.into(),
        }
    }

    /// Set the sender, truncated to [`MAX_SENDER_LEN`] characters.
    pub fn with_sender(mut self, sender: impl AsRef<str>) -> Self {
        self.sender = non_empty(truncate_chars(sender.as_ref(), MAX_SENDER_LEN));
        self
    }

    /// Set the subject, truncated to [`MAX_SUBJECT_LEN`] characters.
    pub fn with_subject(mut self, subject: impl AsRef<str>) -> Self {
        self.subject = non_empty(truncate_chars(subject.as_ref(), MAX_SUBJECT_LEN));
        self
    }

    /// Set the original filename. Names under [`MIN_FILENAME_LEN`] characters are discarded.
    pub fn with_filename(mut self, filename: impl AsRef<str>) -> Self {
        let filename = filename.as_ref();
        self.filename = (filename.chars().count() >= MIN_FILENAME_LEN).then(|| filename.to_owned());
        self
    }

    /// Override the creation timestamp (imports and tests).
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// A submission with neither payload nor subject carries nothing worth storing.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty() && self.subject.is_none()
    }

    /// Whether the payload is printable ASCII or tab/CR/LF.
    pub fn is_printable(&self) -> bool {
        is_printable(&self.payload)
    }

    /// Payload as text: verbatim when printable, base64 otherwise.
    pub fn payload_text(&self) -> Cow<'_, str> {
        if self.is_printable() {
            String::from_utf8_lossy(&self.payload)
        } else {
            Cow::Owned(STANDARD.encode(&self.payload))
        }
    }
}

/// Check that every byte is printable ASCII, tab, LF or CR.
pub fn is_printable(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|&c| (32..=126).contains(&c) || matches!(c, b'\t' | b'\n' | b'\r'))
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_owned())
}

// =============================================================================
// Serialized form
// =============================================================================

/// JSON layout of a persisted record. Optional fields may be absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    time: DateTime<Utc>,
    id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    base64: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
}

impl From<Record> for StoredRecord {
    fn from(record: Record) -> Self {
        let base64 = !is_printable(&record.payload);
        let payload = if record.payload.is_empty() {
            None
        } else if base64 {
            Some(STANDARD.encode(&record.payload))
        } else {
            // Printable bytes are ASCII, so this never allocates a replacement.
            Some(String::from_utf8_lossy(&record.payload).into_owned())
        };

        Self {
            time: record.created_at,
            id: record.id,
            from: record.sender,
            subject: record.subject,
            filename: record.filename,
            base64,
            payload,
        }
    }
}

impl TryFrom<StoredRecord> for Record {
    type Error = String;

    fn try_from(stored: StoredRecord) -> Result<Self, Self::Error> {
        let payload = match stored.payload {
            None => Vec::new(),
            Some(text) if stored.base64 => STANDARD
                .decode(text.as_bytes())
                .map_err(|e| format!("invalid base64 payload: {e}"))?,
            Some(text) => text.into_bytes(),
        };

        Ok(Self {
            id: stored.id,
            created_at: stored.time,
            sender: stored.from,
            subject: stored.subject,
            filename: stored.filename,
            payload,
        })
    }
}

/// Bytes of a record file that always cover the leading `time` field.
pub(crate) const STAMP_PREFIX_LEN: u64 = 128;

/// Read the creation time from the start of a serialized record.
///
/// `time` is the first key [`StoredRecord`] writes, so a short prefix is
/// enough and the payload is never touched. Returns `None` when the prefix
/// does not start with it.
pub(crate) fn stamp_from_prefix(prefix: &[u8]) -> Option<DateTime<Utc>> {
    static STAMP_REGEX: std::sync::OnceLock<Option<regex::bytes::Regex>> =
        std::sync::OnceLock::new();

    let regex = STAMP_REGEX
        .get_or_init(|| regex::bytes::Regex::new(r#"^\s*\{\s*"time"\s*:\s*"([^"]{1,64})""#).ok())
        .as_ref()?;
    let caps = regex.captures(prefix)?;
    let text = std::str::from_utf8(caps.get(1)?.as_bytes()).ok()?;
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
