//! Request/response types for the Slack Web API.
//!
//! The `Wire*` structs mirror raw JSON bodies and are only used inside
//! [`SlackApiClient`](super::SlackApiClient).  Everything else is the
//! vocabulary of the [`SlackApi`](super::SlackApi) trait.

use serde::{Deserialize, Serialize};

use crate::directory::{Channel, ChannelType, User};

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `None` once the listing is complete.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }

    pub fn with_cursor(items: Vec<T>, cursor: impl Into<String>) -> Self {
        Self {
            items,
            next_cursor: Some(cursor.into()),
        }
    }
}

/// Read state of one conversation, as reported by the counts call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    pub channel_id: String,
    pub unread_count: u32,
    pub mention_count: u32,
    /// Read marker (message timestamp).  Empty when never read.
    #[serde(default)]
    pub last_read: String,
    /// Timestamp of the newest message, if known.
    #[serde(default)]
    pub latest: Option<String>,
}

/// A single message from `conversations.history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Filled in locally from the directory; never sent by the API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
}

/// Parameters for a history page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryRequest {
    pub channel_id: String,
    pub limit: usize,
    pub cursor: Option<String>,
    /// Only messages after this timestamp.
    pub oldest: Option<String>,
    /// Only messages before this timestamp.
    pub latest: Option<String>,
    /// Include messages exactly at `oldest` / `latest`.
    pub inclusive: bool,
}

/// Canvas edit operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanvasOperation {
    InsertAtStart,
    InsertAtEnd,
    InsertBefore,
    InsertAfter,
    Replace,
    Delete,
}

impl CanvasOperation {
    pub const NAMES: &'static [&'static str] = &[
        "insert_at_start",
        "insert_at_end",
        "insert_before",
        "insert_after",
        "replace",
        "delete",
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "insert_at_start" => Some(Self::InsertAtStart),
            "insert_at_end" => Some(Self::InsertAtEnd),
            "insert_before" => Some(Self::InsertBefore),
            "insert_after" => Some(Self::InsertAfter),
            "replace" => Some(Self::Replace),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsertAtStart => "insert_at_start",
            Self::InsertAtEnd => "insert_at_end",
            Self::InsertBefore => "insert_before",
            Self::InsertAfter => "insert_after",
            Self::Replace => "replace",
            Self::Delete => "delete",
        }
    }

    /// Operations that address an existing section.
    pub fn requires_section(self) -> bool {
        matches!(self, Self::InsertBefore | Self::InsertAfter | Self::Delete)
    }
}

/// A single change applied by `canvases.edit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanvasChange {
    pub operation: CanvasOperation,
    pub markdown: String,
    pub section_id: Option<String>,
}

/// Filter for `canvases.sections.lookup`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionCriteria {
    pub contains_text: Option<String>,
    pub section_types: Vec<String>,
}

/// Subset of `files.info` used by the canvas tools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub mimetype: String,
    #[serde(default)]
    pub filetype: String,
    #[serde(default)]
    pub pretty_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub url_private: String,
    #[serde(default)]
    pub url_private_download: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub is_external: bool,
    #[serde(default)]
    pub editable: bool,
    #[serde(default)]
    pub preview: String,
    #[serde(default)]
    pub preview_highlight: String,
}

// ── Wire formats ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct WireEnvelope {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireMetadata {
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl WireMetadata {
    pub fn cursor(self) -> Option<String> {
        self.next_cursor.filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireUsersList {
    pub members: Option<Vec<WireUser>>,
    #[serde(default)]
    pub response_metadata: WireMetadata,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub profile: Option<WireProfile>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireProfile {
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl From<WireUser> for User {
    fn from(w: WireUser) -> Self {
        let profile = w.profile.unwrap_or_default();
        User {
            id: w.id,
            name: w.name,
            real_name: w.real_name.or(profile.real_name).unwrap_or_default(),
            display_name: profile.display_name.unwrap_or_default(),
            deleted: w.deleted,
            is_bot: w.is_bot,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireConversationsList {
    pub channels: Option<Vec<WireChannel>>,
    #[serde(default)]
    pub response_metadata: WireMetadata,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireChannel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub topic: Option<WireText>,
    #[serde(default)]
    pub purpose: Option<WireText>,
    #[serde(default)]
    pub num_members: Option<u32>,
    #[serde(default)]
    pub is_ext_shared: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireText {
    #[serde(default)]
    pub value: String,
}

impl WireChannel {
    pub fn into_channel(self, kind: ChannelType) -> Channel {
        Channel {
            id: self.id,
            name: self.name.unwrap_or_default(),
            topic: self.topic.unwrap_or_default().value,
            purpose: self.purpose.unwrap_or_default().value,
            member_count: self.num_members.unwrap_or(0),
            kind,
            is_ext_shared: self.is_ext_shared,
            is_archived: self.is_archived,
            user: self.user,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireCounts {
    #[serde(default)]
    pub channels: Vec<WireCount>,
    #[serde(default)]
    pub mpims: Vec<WireCount>,
    #[serde(default)]
    pub ims: Vec<WireCount>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireCount {
    pub id: String,
    #[serde(default)]
    pub last_read: Option<String>,
    #[serde(default)]
    pub latest: Option<String>,
    #[serde(default)]
    pub mention_count: u32,
    #[serde(default)]
    pub has_unreads: bool,
    #[serde(default)]
    pub unread_count: Option<u32>,
    #[serde(default)]
    pub unread_count_display: Option<u32>,
}

impl From<WireCount> for UnreadCount {
    fn from(w: WireCount) -> Self {
        // Counts may only carry `has_unreads`; treat that as at least one
        // unread (or as many as the pending mentions).
        let unread_count = w
            .unread_count_display
            .or(w.unread_count)
            .unwrap_or(if w.has_unreads {
                w.mention_count.max(1)
            } else {
                0
            });
        UnreadCount {
            channel_id: w.id,
            unread_count,
            mention_count: w.mention_count,
            last_read: w.last_read.unwrap_or_default(),
            latest: w.latest.filter(|l| !l.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireHistory {
    pub messages: Option<Vec<Message>>,
    #[serde(default)]
    pub response_metadata: WireMetadata,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireCanvasCreate {
    pub canvas_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireSections {
    #[serde(default)]
    pub sections: Vec<WireSection>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireSection {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireFileInfo {
    pub file: Option<FileInfo>,
}
