//! Shared fixtures: an in-memory workspace behind `SlackApi`.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use slackwire::directory::{
    CacheStore, Channel, ChannelType, DirectoryService, DirectorySettings, User,
};
use slackwire::slack::{ApiError, HistoryRequest, Message, Page, RetryPolicy, SlackApi, UnreadCount};

pub const ALICE: &str = "U0000000001";
pub const BOB: &str = "U0000000002";
pub const CAROL: &str = "U0000000003";
pub const GENERAL: &str = "C0000000001";
pub const ACME: &str = "C0000000002";
pub const SECRET: &str = "G0000000001";
pub const DM_ALICE: &str = "D0000000001";
pub const GROUP: &str = "G0000000002";

pub fn user(id: &str, name: &str) -> User {
    User {
        id: id.into(),
        name: name.into(),
        real_name: String::new(),
        display_name: String::new(),
        deleted: false,
        is_bot: false,
    }
}

pub fn channel(id: &str, name: &str, kind: ChannelType) -> Channel {
    Channel {
        id: id.into(),
        name: name.into(),
        topic: String::new(),
        purpose: String::new(),
        member_count: 0,
        kind,
        is_ext_shared: false,
        is_archived: false,
        user: None,
    }
}

pub fn dm(id: &str, user_id: &str) -> Channel {
    Channel {
        user: Some(user_id.into()),
        ..channel(id, "", ChannelType::Im)
    }
}

pub fn message(ts: &str, user: &str, text: &str) -> Message {
    Message {
        ts: ts.into(),
        user: Some(user.into()),
        user_handle: None,
        text: text.into(),
        thread_ts: None,
        reply_count: None,
        subtype: None,
    }
}

pub fn count(id: &str, unread: u32, mentions: u32, latest: &str) -> UnreadCount {
    UnreadCount {
        channel_id: id.into(),
        unread_count: unread,
        mention_count: mentions,
        last_read: "1700000000.000000".into(),
        latest: Some(latest.into()),
    }
}

/// alice, bob and a deleted carol; a public, a partner, a private channel,
/// a DM with alice and a group DM.
pub fn workspace() -> (Vec<User>, Vec<Channel>) {
    let users = vec![
        user(ALICE, "alice"),
        user(BOB, "bob"),
        User {
            deleted: true,
            ..user(CAROL, "carol")
        },
    ];
    let channels = vec![
        channel(GENERAL, "general", ChannelType::PublicChannel),
        Channel {
            is_ext_shared: true,
            ..channel(ACME, "acme-partners", ChannelType::PublicChannel)
        },
        channel(SECRET, "secret", ChannelType::PrivateChannel),
        dm(DM_ALICE, ALICE),
        channel(GROUP, "mpdm-alice--bob-1", ChannelType::Mpim),
    ];
    (users, channels)
}

/// Scriptable in-memory workspace with call counters.
#[derive(Default)]
pub struct MockSlack {
    users: Vec<User>,
    channels: Vec<Channel>,
    page_size: usize,
    counts: Vec<UnreadCount>,
    history: HashMap<String, Vec<Message>>,
    failing_history: HashSet<String>,
    slow_history: HashSet<String>,
    delay: Duration,
    pub fail_listing: AtomicBool,
    /// Listing calls beyond this many fail; 0 disables.
    fail_listing_after: AtomicUsize,
    pub fail_counts: AtomicBool,
    pub user_calls: AtomicUsize,
    pub channel_calls: AtomicUsize,
    pub counts_calls: AtomicUsize,
    pub history_calls: AtomicUsize,
    pub history_requests: Mutex<Vec<HistoryRequest>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockSlack {
    pub fn new(users: Vec<User>, channels: Vec<Channel>) -> Self {
        Self {
            users,
            channels,
            page_size: 2,
            ..Self::default()
        }
    }

    pub fn standard() -> Self {
        let (users, channels) = workspace();
        Self::new(users, channels)
    }

    pub fn with_counts(mut self, counts: Vec<UnreadCount>) -> Self {
        self.counts = counts;
        self
    }

    pub fn with_history(mut self, channel_id: &str, messages: Vec<Message>) -> Self {
        self.history.insert(channel_id.into(), messages);
        self
    }

    pub fn failing_history(mut self, channel_id: &str) -> Self {
        self.failing_history.insert(channel_id.into());
        self
    }

    /// History for `channel_id` never answers.
    pub fn hanging_history(mut self, channel_id: &str) -> Self {
        self.slow_history.insert(channel_id.into());
        self
    }

    /// Delay applied to every listing page and history call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Let the next `n` listing calls succeed and fail every one after.
    pub fn fail_listing_after(&self, n: usize) {
        self.fail_listing_after
            .store(self.listing_calls() + n, Ordering::SeqCst);
    }

    /// Listing calls (users and channels), all pages included.
    pub fn listing_calls(&self) -> usize {
        self.user_calls.load(Ordering::SeqCst) + self.channel_calls.load(Ordering::SeqCst)
    }

    fn page<T: Clone>(&self, items: &[T], cursor: Option<&str>) -> Page<T> {
        let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(items.len());
        let slice = items.get(start..end).unwrap_or_default().to_vec();
        if end < items.len() {
            Page::with_cursor(slice, end.to_string())
        } else {
            Page::last(slice)
        }
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    fn listing_error(&self, method: &str) -> Option<ApiError> {
        let after = self.fail_listing_after.load(Ordering::SeqCst);
        let cut_off = after > 0 && self.listing_calls() > after;
        (cut_off || self.fail_listing.load(Ordering::SeqCst)).then(|| ApiError::Slack {
            method: method.into(),
            code: "invalid_auth".into(),
        })
    }
}

#[async_trait]
impl SlackApi for MockSlack {
    async fn list_users(&self, cursor: Option<&str>) -> Result<Page<User>, ApiError> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(e) = self.listing_error("users.list") {
            return Err(e);
        }
        Ok(self.page(&self.users, cursor))
    }

    async fn list_channels(
        &self,
        kind: ChannelType,
        cursor: Option<&str>,
    ) -> Result<Page<Channel>, ApiError> {
        self.channel_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(e) = self.listing_error("conversations.list") {
            return Err(e);
        }
        let of_kind: Vec<Channel> = self
            .channels
            .iter()
            .filter(|c| c.kind == kind)
            .cloned()
            .collect();
        Ok(self.page(&of_kind, cursor))
    }

    async fn unread_counts(&self) -> Result<Vec<UnreadCount>, ApiError> {
        self.counts_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_counts.load(Ordering::SeqCst) {
            return Err(ApiError::Slack {
                method: "client.counts".into(),
                code: "not_allowed_token_type".into(),
            });
        }
        Ok(self.counts.clone())
    }

    async fn conversation_history(&self, req: &HistoryRequest) -> Result<Page<Message>, ApiError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        self.history_requests
            .lock()
            .expect("history requests poisoned")
            .push(req.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.pause().await;
        if self.slow_history.contains(&req.channel_id) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_history.contains(&req.channel_id) {
            return Err(ApiError::Slack {
                method: "conversations.history".into(),
                code: "channel_not_found".into(),
            });
        }
        let messages = self.history.get(&req.channel_id).cloned().unwrap_or_default();
        Ok(Page::last(messages.into_iter().take(req.limit).collect()))
    }
}

/// Settings that never retry and treat snapshots as fresh for an hour.
pub fn settings() -> DirectorySettings {
    DirectorySettings {
        max_age: Some(Duration::from_secs(3600)),
        retry: RetryPolicy::none(),
        ..DirectorySettings::default()
    }
}

pub fn service(api: Arc<MockSlack>, cache_dir: &std::path::Path) -> DirectoryService {
    DirectoryService::new(api, CacheStore::new(cache_dir), settings())
}
