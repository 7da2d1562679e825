//! Parsing of user-supplied conversation references.
//!
//! A reference is whatever a person (or an agent acting for one) typed to
//! point at a conversation or member: a raw ID, `#channel`, `@handle`, or a
//! message permalink.  Parsing is purely syntactic; turning names into IDs
//! is the [`Directory`](crate::directory::Directory)'s job.

use std::fmt;

use reqwest::Url;
use thiserror::Error;

/// Longest channel name or handle accepted.  Slack caps both at 80.
pub const MAX_NAME_LEN: usize = 80;

const MIN_ID_LEN: usize = 9;
const MAX_ID_LEN: usize = 20;

/// A syntactically valid reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationRef {
    /// Canonical channel or user ID, returned unchanged by resolution.
    Id(String),
    /// `#name` (stored without the `#`), or a bare non-ID word.
    ChannelName(String),
    /// `@handle` (stored without the `@`).
    UserHandle(String),
    /// Link to a specific message.
    Permalink {
        channel_id: String,
        message_ts: String,
        thread_ts: Option<String>,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("reference is empty")]
    Empty,
    #[error("reference '{0}' contains whitespace")]
    Whitespace(String),
    #[error("'{0}' has no name after its prefix")]
    MissingName(String),
    #[error("name '{name}' is longer than {max} characters", max = MAX_NAME_LEN)]
    TooLong { name: String },
    #[error("'{0}' is not a channel or user ID")]
    BadId(String),
    #[error("invalid permalink '{url}': {reason}")]
    BadPermalink { url: String, reason: String },
}

/// What kind of entity an ID names, judged by its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    /// `C…` public/private channel, `G…` legacy private channel or group DM.
    Channel,
    /// `D…` direct message.
    DirectMessage,
    /// `U…` / `W…` (enterprise) member.
    User,
}

impl IdKind {
    pub fn is_conversation(self) -> bool {
        matches!(self, IdKind::Channel | IdKind::DirectMessage)
    }
}

/// Classify `s` by shape: prefix letter, then upper-case alphanumerics.
pub fn id_kind(s: &str) -> Option<IdKind> {
    if !(MIN_ID_LEN..=MAX_ID_LEN).contains(&s.len()) {
        return None;
    }
    if !s
        .bytes()
        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
    {
        return None;
    }
    match s.as_bytes()[0] {
        b'C' | b'G' => Some(IdKind::Channel),
        b'D' => Some(IdKind::DirectMessage),
        b'U' | b'W' => Some(IdKind::User),
        _ => None,
    }
}

impl ConversationRef {
    /// Parse a raw token.
    ///
    /// Leading/trailing whitespace is ignored; inner whitespace is an
    /// error.  Anything starting with `http://` or `https://` must be a
    /// well-formed permalink.
    pub fn parse(raw: &str) -> Result<Self, ReferenceError> {
        let token = raw.trim();
        if token.is_empty() {
            return Err(ReferenceError::Empty);
        }
        if token.chars().any(char::is_whitespace) {
            return Err(ReferenceError::Whitespace(token.to_string()));
        }

        if token.starts_with("https://") || token.starts_with("http://") {
            return parse_permalink(token);
        }
        if let Some(name) = token.strip_prefix('#') {
            return Ok(ConversationRef::ChannelName(checked_name(token, name)?));
        }
        if let Some(handle) = token.strip_prefix('@') {
            return Ok(ConversationRef::UserHandle(checked_name(token, handle)?));
        }
        if id_kind(token).is_some() {
            return Ok(ConversationRef::Id(token.to_string()));
        }
        // Looks like an ID but isn't one: reject rather than treating it as
        // a channel name nobody will ever match.
        if token.len() >= MIN_ID_LEN
            && token
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        {
            return Err(ReferenceError::BadId(token.to_string()));
        }
        Ok(ConversationRef::ChannelName(checked_name(token, token)?))
    }

    /// The channel ID carried by the reference itself, if any.
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            ConversationRef::Id(id) if id_kind(id).is_some_and(IdKind::is_conversation) => {
                Some(id)
            }
            ConversationRef::Permalink { channel_id, .. } => Some(channel_id),
            _ => None,
        }
    }
}

impl fmt::Display for ConversationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationRef::Id(id) => f.write_str(id),
            ConversationRef::ChannelName(name) => write!(f, "#{name}"),
            ConversationRef::UserHandle(handle) => write!(f, "@{handle}"),
            ConversationRef::Permalink {
                channel_id,
                message_ts,
                ..
            } => write!(f, "{channel_id}/{message_ts}"),
        }
    }
}

fn checked_name(token: &str, name: &str) -> Result<String, ReferenceError> {
    if name.is_empty() {
        return Err(ReferenceError::MissingName(token.to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ReferenceError::TooLong {
            name: name.to_string(),
        });
    }
    Ok(name.to_string())
}

fn parse_permalink(token: &str) -> Result<ConversationRef, ReferenceError> {
    let bad = |reason: &str| ReferenceError::BadPermalink {
        url: token.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(token).map_err(|e| bad(&e.to_string()))?;
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let [archives, channel_id, message] = segments.as_slice() else {
        return Err(bad("expected /archives/<channel>/p<timestamp>"));
    };
    if *archives != "archives" {
        return Err(bad("expected /archives/<channel>/p<timestamp>"));
    }
    if !id_kind(channel_id).is_some_and(IdKind::is_conversation) {
        return Err(bad("path does not contain a channel ID"));
    }

    let digits = message
        .strip_prefix('p')
        .filter(|d| d.len() > 6 && d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| bad("message segment must be 'p' followed by digits"))?;
    let message_ts = digits_to_ts(digits);

    let thread_ts = url
        .query_pairs()
        .find(|(k, _)| k == "thread_ts")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty());
    if let Some(ts) = &thread_ts {
        if !is_ts(ts) {
            return Err(bad("thread_ts is not a message timestamp"));
        }
    }

    Ok(ConversationRef::Permalink {
        channel_id: channel_id.to_string(),
        message_ts,
        thread_ts,
    })
}

/// `1700000000123456` → `1700000000.123456`.
fn digits_to_ts(digits: &str) -> String {
    let (secs, micros) = digits.split_at(digits.len() - 6);
    format!("{secs}.{micros}")
}

fn is_ts(s: &str) -> bool {
    match s.split_once('.') {
        Some((secs, micros)) => {
            !secs.is_empty()
                && !micros.is_empty()
                && secs.bytes().all(|b| b.is_ascii_digit())
                && micros.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}
