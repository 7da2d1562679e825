//! Workspace directory: cached users and channels plus name resolution.
//!
//! [`DirectoryService`] owns the current [`Directory`] and keeps it fresh:
//!
//! * the snapshot is loaded from the [`CacheStore`] at startup when present,
//! * a refresh pages through every user and every configured channel type,
//! * concurrent refresh triggers share one fetch (single-flight),
//! * readers always see a whole snapshot; a new one is swapped in atomically,
//! * each adopted remote snapshot is persisted in the background.

pub mod index;
pub mod model;
pub mod store;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::reference::ReferenceError;
use crate::slack::{ApiError, RetryPolicy, SlackApi};

pub use index::Directory;
pub use model::{Channel, ChannelType, Snapshot, User};
pub use store::{CacheLoad, CacheStore};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("no match for {0}")]
    NotFound(String),
    #[error("{reference} is ambiguous, candidates: {}", .candidates.join(", "))]
    Ambiguous {
        reference: String,
        candidates: Vec<String>,
    },
    /// No snapshot could be obtained.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    InvalidReference(#[from] ReferenceError),
}

/// Refresh behaviour of a [`DirectoryService`].
#[derive(Debug, Clone)]
pub struct DirectorySettings {
    /// Channel type categories enumerated on refresh.
    pub channel_types: Vec<ChannelType>,
    /// Freshness bound; `None` means a snapshot never goes stale by age.
    pub max_age: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            channel_types: ChannelType::ALL.to_vec(),
            max_age: Some(Duration::from_secs(24 * 60 * 60)),
            retry: RetryPolicy::default(),
        }
    }
}

impl DirectorySettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            channel_types: cfg.directory.channel_types.clone(),
            max_age: cfg.cache.max_age(),
            retry: RetryPolicy::from(&cfg.retry),
        }
    }
}

/// Where the current snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    Cache,
    Remote,
}

/// Observable state of the directory, for operators and tools.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryStatus {
    pub loaded: bool,
    pub source: Option<SnapshotSource>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub age_secs: Option<i64>,
    pub stale: bool,
    pub max_age_secs: Option<u64>,
    pub users: usize,
    pub channels: usize,
    pub refresh_in_flight: bool,
    /// Error of the most recent failed refresh, cleared on success.
    pub last_error: Option<String>,
    pub cache_dir: String,
}

type Outcome = Result<Arc<Directory>, DirectoryError>;

/// The refresh currently running.
struct Flight {
    id: u64,
    /// Whether it goes remote regardless of the cache.
    force: bool,
    rx: watch::Receiver<Option<Outcome>>,
}

/// Owner of the current directory snapshot.
///
/// Cheap to clone; clones share the same snapshot and refresh state.
#[derive(Clone)]
pub struct DirectoryService {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn SlackApi>,
    store: Arc<CacheStore>,
    settings: DirectorySettings,
    current: ArcSwapOption<Directory>,
    source: Mutex<Option<SnapshotSource>>,
    in_flight: Mutex<Option<Flight>>,
    next_flight: AtomicU64,
    pending_save: Mutex<Option<JoinHandle<()>>>,
    last_error: Mutex<Option<String>>,
    cache_checked: AtomicBool,
}

impl DirectoryService {
    pub fn new(api: Arc<dyn SlackApi>, store: CacheStore, settings: DirectorySettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                store: Arc::new(store),
                settings,
                current: ArcSwapOption::empty(),
                source: Mutex::new(None),
                in_flight: Mutex::new(None),
                next_flight: AtomicU64::new(0),
                pending_save: Mutex::new(None),
                last_error: Mutex::new(None),
                cache_checked: AtomicBool::new(false),
            }),
        }
    }

    pub fn settings(&self) -> &DirectorySettings {
        &self.inner.settings
    }

    /// Snapshot currently held, without triggering anything.
    pub fn peek(&self) -> Option<Arc<Directory>> {
        self.inner.current.load_full()
    }

    /// Adopt the on-disk cache without any remote call.  Returns whatever
    /// snapshot is held afterwards.
    pub async fn load_cached(&self) -> Option<Arc<Directory>> {
        self.inner.load_cached().await;
        self.peek()
    }

    /// Startup load: adopt the on-disk cache if there is one, refresh it if
    /// stale or missing.
    ///
    /// A stale cache still counts as success when the refresh fails.
    pub async fn warm_up(&self) -> Result<Arc<Directory>, DirectoryError> {
        match self.refresh(false).await {
            Ok(dir) => Ok(dir),
            Err(e) => match self.peek() {
                Some(dir) => {
                    warn!(error = %e, fetched_at = %dir.fetched_at(), "refresh failed, serving cached directory");
                    Ok(dir)
                }
                None => Err(e),
            },
        }
    }

    /// The directory to answer lookups from.
    ///
    /// A fresh snapshot is returned as is.  A stale one is returned
    /// immediately while a background refresh runs.  With no snapshot at
    /// all, waits for one.
    pub async fn current(&self) -> Result<Arc<Directory>, DirectoryError> {
        if let Some(dir) = self.peek() {
            if self.inner.is_stale(&dir) {
                debug!(fetched_at = %dir.fetched_at(), "directory is stale, refreshing in background");
                drop(self.join_refresh());
            }
            return Ok(dir);
        }
        wait_for(self.join_refresh()).await
    }

    /// Refresh unless the snapshot is fresh and `force` is false.
    ///
    /// Joins a refresh that is already running instead of starting another.
    /// A forced refresh only joins another forced one; a plain refresh in
    /// flight may settle for the disk cache, so it is waited out first.
    pub async fn refresh(&self, force: bool) -> Result<Arc<Directory>, DirectoryError> {
        if !force {
            if let Some(dir) = self.peek() {
                if !self.inner.is_stale(&dir) {
                    debug!("directory is fresh, skipping refresh");
                    return Ok(dir);
                }
            }
        }
        loop {
            match self.start_refresh(force) {
                Ok(rx) => return wait_for(rx).await,
                Err(plain) => {
                    debug!("waiting for plain refresh before forcing one");
                    let _ = wait_for(plain).await;
                }
            }
        }
    }

    /// Wait for the most recent background cache write.
    pub async fn flush(&self) {
        let handle = self
            .inner
            .pending_save
            .lock()
            .expect("pending save poisoned")
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "directory cache save task failed");
            }
        }
    }

    pub fn status(&self) -> DirectoryStatus {
        let dir = self.peek();
        let now = Utc::now();
        DirectoryStatus {
            loaded: dir.is_some(),
            source: *self.inner.source.lock().expect("snapshot source poisoned"),
            fetched_at: dir.as_ref().map(|d| d.fetched_at()),
            age_secs: dir.as_ref().map(|d| d.snapshot().age_at(now).num_seconds()),
            stale: dir.as_ref().is_some_and(|d| self.inner.is_stale(d)),
            max_age_secs: self.inner.settings.max_age.map(|d| d.as_secs()),
            users: dir.as_ref().map_or(0, |d| d.users().len()),
            channels: dir.as_ref().map_or(0, |d| d.channels().len()),
            refresh_in_flight: self
                .inner
                .in_flight
                .lock()
                .expect("refresh slot poisoned")
                .is_some(),
            last_error: self.inner.last_error.lock().expect("last error poisoned").clone(),
            cache_dir: self.inner.store.dir().display().to_string(),
        }
    }

    pub async fn resolve_channel(&self, token: &str) -> Result<String, DirectoryError> {
        self.current().await?.resolve_channel(token)
    }

    pub async fn resolve_user(&self, token: &str) -> Result<String, DirectoryError> {
        self.current().await?.resolve_user(token)
    }

    pub async fn channel_name(&self, id: &str) -> Option<String> {
        self.current().await.ok()?.channel_name(id)
    }

    pub async fn user_handle(&self, id: &str) -> Option<String> {
        self.current().await.ok()?.user_handle(id).map(str::to_string)
    }

    fn join_refresh(&self) -> watch::Receiver<Option<Outcome>> {
        self.start_refresh(false).unwrap_or_else(|rx| rx)
    }

    /// Join the running refresh or spawn a new one.
    ///
    /// `Err` hands a forced caller the plain refresh it has to outwait.
    /// The fetch runs in its own task, so a caller that stops waiting does
    /// not cancel it for everybody else.
    fn start_refresh(
        &self,
        force: bool,
    ) -> Result<watch::Receiver<Option<Outcome>>, watch::Receiver<Option<Outcome>>> {
        let mut slot = self.inner.in_flight.lock().expect("refresh slot poisoned");
        if let Some(flight) = slot.as_ref() {
            if force && !flight.force {
                return Err(flight.rx.clone());
            }
            debug!(force = flight.force, "joining in-flight directory refresh");
            return Ok(flight.rx.clone());
        }

        let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        *slot = Some(Flight {
            id,
            force,
            rx: rx.clone(),
        });
        drop(slot);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _slot = ClearSlot { inner: Arc::clone(&inner), id };
            let outcome = inner.run_refresh(force).await;
            // Slot is free by the time waiters wake.
            inner.clear_flight(id);
            tx.send_replace(Some(outcome));
        });
        Ok(rx)
    }
}

async fn wait_for(mut rx: watch::Receiver<Option<Outcome>>) -> Outcome {
    loop {
        let seen = rx.borrow_and_update().clone();
        if let Some(outcome) = seen {
            return outcome;
        }
        if rx.changed().await.is_err() {
            // Sender gone: either it published right before closing or the
            // task died.
            return rx.borrow().clone().unwrap_or_else(|| {
                Err(DirectoryError::Unavailable(
                    "refresh task ended without a result".into(),
                ))
            });
        }
    }
}

/// Empties the in-flight slot if the refresh task unwinds.
struct ClearSlot {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for ClearSlot {
    fn drop(&mut self) {
        self.inner.clear_flight(self.id);
    }
}

impl Inner {
    /// Empty the slot if it still holds flight `id`.
    fn clear_flight(&self, id: u64) {
        if let Ok(mut slot) = self.in_flight.lock() {
            if slot.as_ref().is_some_and(|f| f.id == id) {
                slot.take();
            }
        }
    }

    fn is_stale(&self, dir: &Directory) -> bool {
        match self.settings.max_age {
            Some(max_age) => {
                let age = dir.snapshot().age_at(Utc::now()).to_std().unwrap_or_default();
                age > max_age
            }
            None => false,
        }
    }

    fn adopt(&self, dir: Arc<Directory>, source: SnapshotSource) {
        self.current.store(Some(dir));
        *self.source.lock().expect("snapshot source poisoned") = Some(source);
    }

    /// Adopt the on-disk snapshot, once per process and only while nothing
    /// else is held.
    async fn load_cached(&self) -> Option<Arc<Directory>> {
        if self.cache_checked.swap(true, Ordering::SeqCst) || self.current.load().is_some() {
            return None;
        }
        let CacheLoad::Loaded(snapshot) = self.store.load().await else {
            return None;
        };
        let dir = Arc::new(Directory::new(snapshot));
        // A remote refresh may have finished while the files were read.
        let previous = self
            .current
            .rcu(|cur| cur.clone().or_else(|| Some(Arc::clone(&dir))));
        if previous.is_some() {
            debug!("newer directory already held, ignoring cache");
            return None;
        }
        *self.source.lock().expect("snapshot source poisoned") = Some(SnapshotSource::Cache);
        info!(
            users = dir.users().len(),
            channels = dir.channels().len(),
            fetched_at = %dir.fetched_at(),
            "directory loaded from cache"
        );
        Some(dir)
    }

    async fn run_refresh(self: &Arc<Self>, force: bool) -> Outcome {
        // The first refresh of a process looks at the disk cache before
        // going remote.
        if let Some(dir) = self.load_cached().await {
            if !force && !self.is_stale(&dir) {
                return Ok(dir);
            }
        }

        let started = Utc::now();
        match self.fetch_snapshot(started).await {
            Ok(snapshot) => {
                let dir = Arc::new(Directory::new(snapshot));
                info!(
                    users = dir.users().len(),
                    channels = dir.channels().len(),
                    elapsed_ms = (Utc::now() - started).num_milliseconds(),
                    "directory refreshed"
                );
                self.adopt(Arc::clone(&dir), SnapshotSource::Remote);
                *self.last_error.lock().expect("last error poisoned") = None;
                self.schedule_save(Arc::clone(&dir));
                Ok(dir)
            }
            Err(e) => {
                warn!(error = %e, have_snapshot = self.current.load().is_some(), "directory refresh failed");
                *self.last_error.lock().expect("last error poisoned") = Some(e.to_string());
                Err(DirectoryError::Unavailable(e.to_string()))
            }
        }
    }

    /// Page through users and every configured channel type.  Any failure
    /// discards everything fetched so far.
    async fn fetch_snapshot(&self, fetched_at: DateTime<Utc>) -> Result<Snapshot, ApiError> {
        let retry = &self.settings.retry;

        let mut users = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();
        loop {
            let page = retry
                .run("users.list", || self.api.list_users(cursor.as_deref()))
                .await?;
            debug!(count = page.items.len(), more = page.next_cursor.is_some(), "users page");
            users.extend(page.items);
            match next_cursor(&mut seen, "users.list", page.next_cursor)? {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        let mut channels = Vec::new();
        for &kind in &self.settings.channel_types {
            let mut cursor: Option<String> = None;
            let mut seen = HashSet::new();
            loop {
                let page = retry
                    .run("conversations.list", || {
                        self.api.list_channels(kind, cursor.as_deref())
                    })
                    .await?;
                debug!(%kind, count = page.items.len(), more = page.next_cursor.is_some(), "channels page");
                channels.extend(page.items);
                match next_cursor(&mut seen, "conversations.list", page.next_cursor)? {
                    Some(c) => cursor = Some(c),
                    None => break,
                }
            }
        }

        Ok(Snapshot::new(users, channels, fetched_at))
    }

    fn schedule_save(&self, dir: Arc<Directory>) {
        let store = Arc::clone(&self.store);
        let handle = tokio::spawn(async move {
            if let Err(e) = store.save(dir.snapshot()).await {
                warn!(error = %format!("{e:#}"), "failed to persist directory cache");
            }
        });
        // An earlier save keeps running; the store serializes the writes.
        self.pending_save
            .lock()
            .expect("pending save poisoned")
            .replace(handle);
    }
}

/// Advance paging, rejecting a cursor the server already handed out.
fn next_cursor(
    seen: &mut HashSet<String>,
    method: &str,
    cursor: Option<String>,
) -> Result<Option<String>, ApiError> {
    match cursor.filter(|c| !c.is_empty()) {
        Some(c) if !seen.insert(c.clone()) => Err(ApiError::Malformed(format!(
            "{method}: cursor '{c}' repeated"
        ))),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_cursor_is_malformed() {
        let mut seen = HashSet::new();
        assert_eq!(
            next_cursor(&mut seen, "users.list", Some("a".into())),
            Ok(Some("a".into()))
        );
        assert_eq!(next_cursor(&mut seen, "users.list", Some(String::new())), Ok(None));
        assert!(matches!(
            next_cursor(&mut seen, "users.list", Some("a".into())),
            Err(ApiError::Malformed(_))
        ));
    }

    #[test]
    fn ambiguity_lists_candidates() {
        let e = DirectoryError::Ambiguous {
            reference: "#dup".into(),
            candidates: vec!["C1".into(), "C2".into()],
        };
        assert_eq!(e.to_string(), "#dup is ambiguous, candidates: C1, C2");
    }
}
