//! Directory records and the immutable [`Snapshot`] that pairs them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A workspace member.
///
/// Records are replaced wholesale on every refresh; nothing mutates a
/// `User` after it has been placed in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Immutable member ID (`U…` / `W…`).
    pub id: String,
    /// Handle, i.e. the `@name` people type.
    pub name: String,
    #[serde(default)]
    pub real_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub is_bot: bool,
}

/// Conversation type tag, spelled the way the Slack API spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    PublicChannel,
    PrivateChannel,
    Im,
    Mpim,
}

impl ChannelType {
    pub const ALL: [ChannelType; 4] = [
        ChannelType::PublicChannel,
        ChannelType::PrivateChannel,
        ChannelType::Im,
        ChannelType::Mpim,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelType::PublicChannel => "public_channel",
            ChannelType::PrivateChannel => "private_channel",
            ChannelType::Im => "im",
            ChannelType::Mpim => "mpim",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public_channel" => Ok(ChannelType::PublicChannel),
            "private_channel" => Ok(ChannelType::PrivateChannel),
            "im" => Ok(ChannelType::Im),
            "mpim" => Ok(ChannelType::Mpim),
            other => Err(format!(
                "unknown channel type '{other}' (expected public_channel, private_channel, im or mpim)"
            )),
        }
    }
}

/// A conversation: public/private channel, DM or group DM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    /// Channel name without the leading `#`.  Empty for DMs.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub member_count: u32,
    pub kind: ChannelType,
    /// Shared with an external organization (a partner channel).
    #[serde(default)]
    pub is_ext_shared: bool,
    #[serde(default)]
    pub is_archived: bool,
    /// DM partner for `im` conversations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Point-in-time copy of the whole directory.
///
/// Users and channels always come from the same fetch; `fetched_at` is
/// the moment that fetch started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub users: Vec<User>,
    pub channels: Vec<Channel>,
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(users: Vec<User>, channels: Vec<Channel>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            users,
            channels,
            fetched_at,
        }
    }

    /// Age relative to `now`, clamped at zero for clocks that moved backwards.
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.fetched_at).max(chrono::Duration::zero())
    }
}
