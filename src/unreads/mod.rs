//! Prioritized view of unread conversations.
//!
//! One counts call tells us where unread messages are.  Conversations are
//! classified against the directory, filtered, ranked (DMs first, then
//! group DMs, partner channels, internal channels) and cut down to the
//! requested size.  Only the survivors get their history fetched.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::directory::{ChannelType, Directory, DirectoryService};
use crate::slack::{ApiError, HistoryRequest, Message, RetryPolicy, SlackApi, UnreadCount};

/// Conversation category, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Dm,
    GroupDm,
    Partner,
    Internal,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Dm => "dm",
            Category::GroupDm => "group_dm",
            Category::Partner => "partner",
            Category::Internal => "internal",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which categories a query wants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelFilter {
    #[default]
    All,
    Dm,
    GroupDm,
    Partner,
    Internal,
}

impl ChannelFilter {
    pub fn matches(self, category: Category) -> bool {
        match self {
            ChannelFilter::All => true,
            ChannelFilter::Dm => category == Category::Dm,
            ChannelFilter::GroupDm => category == Category::GroupDm,
            ChannelFilter::Partner => category == Category::Partner,
            ChannelFilter::Internal => category == Category::Internal,
        }
    }
}

impl FromStr for ChannelFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(ChannelFilter::All),
            "dm" => Ok(ChannelFilter::Dm),
            "group_dm" => Ok(ChannelFilter::GroupDm),
            "partner" => Ok(ChannelFilter::Partner),
            "internal" => Ok(ChannelFilter::Internal),
            other => Err(format!(
                "unknown channel filter '{other}' (expected all, dm, group_dm, partner or internal)"
            )),
        }
    }
}

/// Parameters of one aggregation.
#[derive(Debug, Clone, Default)]
pub struct UnreadQuery {
    pub include_messages: bool,
    pub channel_types: ChannelFilter,
    /// `None` uses the configured default.
    pub max_channels: Option<usize>,
    /// `None` uses the configured default.
    pub max_messages_per_channel: Option<usize>,
    pub mentions_only: bool,
}

/// One conversation with unread messages.
#[derive(Debug, Clone, Serialize)]
pub struct UnreadConversation {
    pub channel_id: String,
    /// `#name` / `@handle` when the directory knows the conversation,
    /// otherwise the ID.
    pub name: String,
    pub category: Category,
    pub unread_count: u32,
    pub mention_count: u32,
    pub has_mention: bool,
    pub last_read: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnreadReport {
    pub conversations: Vec<UnreadConversation>,
    /// Unread messages over every qualifying conversation, before truncation.
    pub total_unread: u64,
    /// Conversations that passed the filters, before truncation.
    pub qualifying: usize,
    pub truncated: bool,
    /// Conversations whose history could not be fetched.
    pub partial_failures: usize,
    /// `None` when no directory was available for classification.
    pub directory_age_secs: Option<i64>,
}

#[derive(Debug, Clone, Error)]
pub enum UnreadError {
    #[error("failed to fetch unread counts: {0}")]
    Counts(#[source] ApiError),
}

#[derive(Debug, Clone)]
pub struct UnreadSettings {
    pub max_concurrency: usize,
    pub history_timeout: Duration,
    pub default_max_channels: usize,
    pub default_max_messages: usize,
    pub retry: RetryPolicy,
}

impl Default for UnreadSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            history_timeout: Duration::from_secs(15),
            default_max_channels: 50,
            default_max_messages: 10,
            retry: RetryPolicy::default(),
        }
    }
}

impl UnreadSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_concurrency: cfg.unreads.max_concurrency,
            history_timeout: Duration::from_secs(cfg.unreads.history_timeout_secs),
            default_max_channels: cfg.unreads.max_channels,
            default_max_messages: cfg.unreads.max_messages_per_channel,
            retry: RetryPolicy::from(&cfg.retry),
        }
    }
}

pub struct UnreadAggregator {
    api: Arc<dyn SlackApi>,
    directory: DirectoryService,
    settings: UnreadSettings,
}

impl UnreadAggregator {
    pub fn new(api: Arc<dyn SlackApi>, directory: DirectoryService, settings: UnreadSettings) -> Self {
        Self {
            api,
            directory,
            settings,
        }
    }

    pub fn settings(&self) -> &UnreadSettings {
        &self.settings
    }

    pub async fn aggregate(&self, query: &UnreadQuery) -> Result<UnreadReport, UnreadError> {
        let counts = self
            .settings
            .retry
            .run("client.counts", || self.api.unread_counts())
            .await
            .map_err(UnreadError::Counts)?;

        let directory = match self.directory.current().await {
            Ok(dir) => Some(dir),
            Err(e) => {
                warn!(error = %e, "no directory, classifying unreads by ID");
                None
            }
        };
        let dir = directory.as_deref();

        let mut conversations: Vec<UnreadConversation> = counts
            .into_iter()
            .filter(|c| c.unread_count > 0)
            .map(|c| describe(c, dir))
            .filter(|c| query.channel_types.matches(c.category))
            .filter(|c| !query.mentions_only || c.has_mention)
            .collect();

        let qualifying = conversations.len();
        let total_unread = conversations.iter().map(|c| u64::from(c.unread_count)).sum();

        conversations.sort_by(priority);
        let max_channels = query
            .max_channels
            .unwrap_or(self.settings.default_max_channels);
        let truncated = conversations.len() > max_channels;
        conversations.truncate(max_channels);

        // A zero message budget fetches no history at all.
        let limit = query
            .max_messages_per_channel
            .unwrap_or(self.settings.default_max_messages);
        let partial_failures = if query.include_messages && limit > 0 {
            self.fetch_messages(&mut conversations, limit, dir).await
        } else {
            0
        };

        info!(
            qualifying,
            returned = conversations.len(),
            total_unread,
            partial_failures,
            "unread conversations aggregated"
        );

        Ok(UnreadReport {
            conversations,
            total_unread,
            qualifying,
            truncated,
            partial_failures,
            directory_age_secs: dir.map(|d| d.snapshot().age_at(Utc::now()).num_seconds()),
        })
    }

    /// Fetch unread messages for every conversation, at most
    /// `max_concurrency` at a time.  Returns the number of failures; each
    /// failure is recorded on its conversation.
    async fn fetch_messages(
        &self,
        conversations: &mut [UnreadConversation],
        limit: usize,
        dir: Option<&Directory>,
    ) -> usize {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let timeout = self.settings.history_timeout;
        let mut tasks = JoinSet::new();

        for (idx, conv) in conversations.iter().enumerate() {
            let api = Arc::clone(&self.api);
            let semaphore = Arc::clone(&semaphore);
            let retry = self.settings.retry;
            let req = HistoryRequest {
                channel_id: conv.channel_id.clone(),
                limit,
                oldest: (!conv.last_read.is_empty()).then(|| conv.last_read.clone()),
                ..HistoryRequest::default()
            };
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (idx, Err("fetch pool closed".to_string())),
                };
                let fetch = retry.run("conversations.history", || api.conversation_history(&req));
                let result = match tokio::time::timeout(timeout, fetch).await {
                    Ok(Ok(page)) => Ok(page.items),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
                };
                (idx, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, Ok(mut messages))) => {
                    messages.truncate(limit);
                    for msg in &mut messages {
                        msg.user_handle = msg
                            .user
                            .as_deref()
                            .and_then(|u| dir?.user_handle(u))
                            .map(str::to_string);
                    }
                    debug!(channel = %conversations[idx].channel_id, count = messages.len(), "unread history fetched");
                    conversations[idx].messages = Some(messages);
                }
                Ok((idx, Err(e))) => {
                    warn!(channel = %conversations[idx].channel_id, error = %e, "history fetch failed");
                    conversations[idx].history_error = Some(e);
                }
                Err(e) => warn!(error = %e, "history task failed"),
            }
        }

        // A task that panicked never reported its index.
        let mut failures = 0;
        for conv in conversations.iter_mut() {
            if conv.messages.is_none() {
                conv.history_error
                    .get_or_insert_with(|| "history fetch did not complete".to_string());
                failures += 1;
            }
        }
        failures
    }
}

fn classify(channel_id: &str, dir: Option<&Directory>) -> Category {
    match dir.and_then(|d| d.channel(channel_id)) {
        Some(ch) => match ch.kind {
            ChannelType::Im => Category::Dm,
            ChannelType::Mpim => Category::GroupDm,
            _ if ch.is_ext_shared => Category::Partner,
            _ => Category::Internal,
        },
        None if channel_id.starts_with('D') => Category::Dm,
        None => Category::Internal,
    }
}

fn describe(count: UnreadCount, dir: Option<&Directory>) -> UnreadConversation {
    let category = classify(&count.channel_id, dir);
    let name = dir
        .and_then(|d| d.channel_name(&count.channel_id))
        .unwrap_or_else(|| count.channel_id.clone());
    UnreadConversation {
        name,
        category,
        unread_count: count.unread_count,
        mention_count: count.mention_count,
        has_mention: count.mention_count > 0,
        last_read: count.last_read,
        latest: count.latest,
        messages: None,
        history_error: None,
        channel_id: count.channel_id,
    }
}

/// Category, then unread count (desc), then latest activity (desc), then ID.
fn priority(a: &UnreadConversation, b: &UnreadConversation) -> Ordering {
    a.category
        .cmp(&b.category)
        .then_with(|| b.unread_count.cmp(&a.unread_count))
        .then_with(|| ts_key(b.latest.as_deref()).cmp(&ts_key(a.latest.as_deref())))
        .then_with(|| a.channel_id.cmp(&b.channel_id))
}

/// Numeric sort key for a `secs.micros` timestamp; unparseable sorts oldest.
fn ts_key(ts: Option<&str>) -> (u64, u64) {
    let Some(ts) = ts else { return (0, 0) };
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, ""));
    let Ok(secs) = secs.parse::<u64>() else {
        return (0, 0);
    };
    let mut frac: String = frac.chars().take(6).collect();
    while frac.len() < 6 {
        frac.push('0');
    }
    (secs, frac.parse().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(id: &str, category: Category, unread: u32, latest: Option<&str>) -> UnreadConversation {
        UnreadConversation {
            channel_id: id.into(),
            name: id.into(),
            category,
            unread_count: unread,
            mention_count: 0,
            has_mention: false,
            last_read: String::new(),
            latest: latest.map(String::from),
            messages: None,
            history_error: None,
        }
    }

    #[test]
    fn timestamps_compare_numerically() {
        assert!(ts_key(Some("1700000000.000200")) > ts_key(Some("1700000000.000100")));
        assert!(ts_key(Some("999999999.999999")) < ts_key(Some("1000000000.000000")));
        assert_eq!(ts_key(Some("12.5")), (12, 500_000));
        assert_eq!(ts_key(Some("garbage")), (0, 0));
        assert_eq!(ts_key(None), (0, 0));
    }

    #[test]
    fn priority_order() {
        let mut v = vec![
            conv("C3", Category::Internal, 5, None),
            conv("D1", Category::Dm, 1, None),
            conv("C2", Category::Partner, 2, None),
            conv("C4", Category::Internal, 5, Some("1700000000.000002")),
            conv("C5", Category::Internal, 5, Some("1700000000.000002")),
        ];
        v.sort_by(priority);
        let ids: Vec<_> = v.iter().map(|c| c.channel_id.as_str()).collect();
        assert_eq!(ids, ["D1", "C2", "C4", "C5", "C3"]);
    }

    #[test]
    fn unknown_conversations_classified_by_prefix() {
        assert_eq!(classify("D0123456789", None), Category::Dm);
        assert_eq!(classify("C0123456789", None), Category::Internal);
        assert_eq!(classify("G0123456789", None), Category::Internal);
    }

    #[test]
    fn filter_parsing() {
        assert_eq!("group_dm".parse::<ChannelFilter>(), Ok(ChannelFilter::GroupDm));
        assert!("everything".parse::<ChannelFilter>().is_err());
        assert!(ChannelFilter::All.matches(Category::Partner));
        assert!(!ChannelFilter::Dm.matches(Category::GroupDm));
    }
}
