//! URL query-string codec for inbox filters.
//!
//! Recognized keys: `q`, `mailbox`, `tags` (repeatable), `start`, `end`.
//! Decoding never fails; anything malformed falls back to the field default.
//! Encoding omits every field that equals its default, so the default state
//! encodes to an empty query.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

pub const KEY_QUERY: &str = "q";
pub const KEY_MAILBOX: &str = "mailbox";
pub const KEY_TAGS: &str = "tags";
pub const KEY_START: &str = "start";
pub const KEY_END: &str = "end";

const RECOGNIZED_KEYS: [&str; 5] = [KEY_QUERY, KEY_MAILBOX, KEY_TAGS, KEY_START, KEY_END];

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Ordered `(key, value)` pairs, before percent-encoding.
pub type QueryParams = Vec<(String, String)>;

/// Typed representation of the inbox list filters.
///
/// Empty strings are not representable: text fields hold `None` instead,
/// and `tags` drops empty entries. This keeps `decode(encode(s)) == s`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    pub query: Option<String>,
    pub mailbox_id: Option<String>,
    pub tags: Vec<String>,
    pub range_start: Option<NaiveDate>,
    pub range_end: Option<NaiveDate>,
}

impl FilterState {
    /// Decode a raw query string, with or without the leading `?`.
    ///
    /// For scalar keys the first well-formed occurrence wins. Unknown keys
    /// are ignored.
    pub fn decode(raw: &str) -> Self {
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        let mut state = Self::default();

        for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
            match &*key {
                KEY_QUERY if state.query.is_none() => state.query = non_empty(&value),
                KEY_MAILBOX if state.mailbox_id.is_none() => {
                    state.mailbox_id = non_empty(&value)
                }
                KEY_TAGS => {
                    if let Some(tag) = non_empty(&value) {
                        state.tags.push(tag);
                    }
                }
                KEY_START if state.range_start.is_none() => state.range_start = parse_date(&value),
                KEY_END if state.range_end.is_none() => state.range_end = parse_date(&value),
                _ => {}
            }
        }

        state
    }

    /// Encode to ordered params, omitting defaults. Tags repeat the key.
    pub fn encode(&self) -> QueryParams {
        let mut params = QueryParams::new();
        if let Some(query) = self.query.as_deref().filter(|q| !q.is_empty()) {
            params.push((KEY_QUERY.to_string(), query.to_string()));
        }
        if let Some(mailbox) = self.mailbox_id.as_deref().filter(|m| !m.is_empty()) {
            params.push((KEY_MAILBOX.to_string(), mailbox.to_string()));
        }
        for tag in self.tags.iter().filter(|t| !t.is_empty()) {
            params.push((KEY_TAGS.to_string(), tag.clone()));
        }
        if let Some(start) = self.range_start {
            params.push((KEY_START.to_string(), start.format(DATE_FORMAT).to_string()));
        }
        if let Some(end) = self.range_end {
            params.push((KEY_END.to_string(), end.format(DATE_FORMAT).to_string()));
        }
        params
    }

    /// Encode to a percent-encoded query string without the leading `?`.
    pub fn to_query_string(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.encode())
            .finish()
    }

    /// Write this state back into an existing query string.
    ///
    /// Recognized keys are replaced. Every other key keeps its value and
    /// relative order and comes before the filter keys.
    pub fn apply_to_query(&self, existing: &str) -> String {
        let existing = existing.strip_prefix('?').unwrap_or(existing);
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in form_urlencoded::parse(existing.as_bytes()) {
            if !is_recognized_key(&key) {
                serializer.append_pair(&key, &value);
            }
        }
        serializer.extend_pairs(self.encode());
        serializer.finish()
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = non_empty(&query.into());
        self
    }

    pub fn with_mailbox(mut self, mailbox_id: impl Into<String>) -> Self {
        self.mailbox_id = non_empty(&mailbox_id.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags
            .into_iter()
            .map(Into::into)
            .filter(|t: &String| !t.is_empty())
            .collect();
        self
    }

    pub fn with_range(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.range_start = start;
        self.range_end = end;
        self
    }

    /// Reset every field to its default.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

pub fn is_recognized_key(key: &str) -> bool {
    RECOGNIZED_KEYS.contains(&key)
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Strict `YYYY-MM-DD`. chrono alone accepts unpadded fields and signs.
fn parse_date(value: &str) -> Option<NaiveDate> {
    let bytes = value.as_bytes();
    let shape_ok = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !shape_ok {
        return None;
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT).ok()
}
