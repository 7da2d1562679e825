//! Durable on-disk copy of the directory snapshot.
//!
//! Two files live in the cache directory, one per entity class:
//!
//! ```text
//! <cache dir>/users_cache.json     { "version": 1, "fetched_at": …, "entries": [User…] }
//! <cache dir>/channels_cache.json  { "version": 1, "fetched_at": …, "entries": [Channel…] }
//! ```
//!
//! Both carry the same `fetched_at`; a pair that disagrees was not written
//! by the same save and is rejected as corrupt.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::model::{Channel, Snapshot, User};

/// Bumped whenever the record layout changes incompatibly.
pub const CACHE_VERSION: u32 = 1;

pub const USERS_FILE: &str = "users_cache.json";
pub const CHANNELS_FILE: &str = "channels_cache.json";

#[derive(Debug, Deserialize)]
struct CacheFile<T> {
    version: u32,
    fetched_at: DateTime<Utc>,
    entries: Vec<T>,
}

#[derive(Serialize)]
struct CacheFileRef<'a, T> {
    version: u32,
    fetched_at: DateTime<Utc>,
    entries: &'a [T],
}

/// Outcome of [`CacheStore::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLoad {
    Loaded(Snapshot),
    /// One or both files are absent.
    NotFound,
    /// Present but unusable; the reason is for logs only.
    Corrupt(String),
}

/// Reads and writes the cache file pair.
#[derive(Debug)]
pub struct CacheStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn users_path(&self) -> PathBuf {
        self.dir.join(USERS_FILE)
    }

    pub fn channels_path(&self) -> PathBuf {
        self.dir.join(CHANNELS_FILE)
    }

    /// Load the persisted snapshot.  Never fails: problems are reported
    /// through the [`CacheLoad`] variant.
    pub async fn load(&self) -> CacheLoad {
        let users = match read_file::<User>(&self.users_path()).await {
            Ok(Some(f)) => f,
            Ok(None) => return CacheLoad::NotFound,
            Err(reason) => return self.corrupt(reason),
        };
        let channels = match read_file::<Channel>(&self.channels_path()).await {
            Ok(Some(f)) => f,
            Ok(None) => return CacheLoad::NotFound,
            Err(reason) => return self.corrupt(reason),
        };

        if users.fetched_at != channels.fetched_at {
            return self.corrupt(format!(
                "users fetched at {} but channels at {}",
                users.fetched_at, channels.fetched_at
            ));
        }

        debug!(
            dir = %self.dir.display(),
            users = users.entries.len(),
            channels = channels.entries.len(),
            fetched_at = %users.fetched_at,
            "directory cache loaded"
        );
        CacheLoad::Loaded(Snapshot::new(
            users.entries,
            channels.entries,
            users.fetched_at,
        ))
    }

    fn corrupt(&self, reason: String) -> CacheLoad {
        warn!(dir = %self.dir.display(), reason = %reason, "directory cache is corrupt, ignoring it");
        CacheLoad::Corrupt(reason)
    }

    /// Persist `snapshot`, replacing any previous pair.
    ///
    /// Each file is written to a temporary sibling and renamed into place,
    /// so readers see either the old file or the new one.  Concurrent saves
    /// are serialized.
    pub async fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;

        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create cache dir {}", self.dir.display()))?;

        write_file(
            &self.users_path(),
            &CacheFileRef {
                version: CACHE_VERSION,
                fetched_at: snapshot.fetched_at,
                entries: &snapshot.users,
            },
        )
        .await?;
        write_file(
            &self.channels_path(),
            &CacheFileRef {
                version: CACHE_VERSION,
                fetched_at: snapshot.fetched_at,
                entries: &snapshot.channels,
            },
        )
        .await?;

        debug!(
            dir = %self.dir.display(),
            users = snapshot.users.len(),
            channels = snapshot.channels.len(),
            "directory cache saved"
        );
        Ok(())
    }
}

/// `Ok(None)` when the file does not exist, `Err(reason)` when unusable.
async fn read_file<T: DeserializeOwned>(path: &Path) -> Result<Option<CacheFile<T>>, String> {
    let bytes = match fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("read {}: {e}", path.display())),
    };

    // Check the version before decoding entries so a layout change is
    // reported as such rather than as a field error.
    #[derive(Deserialize)]
    struct Header {
        version: u32,
    }
    let header: Header = serde_json::from_slice(&bytes)
        .map_err(|e| format!("decode {}: {e}", path.display()))?;
    if header.version != CACHE_VERSION {
        return Err(format!(
            "{} has version {}, expected {CACHE_VERSION}",
            path.display(),
            header.version
        ));
    }

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| format!("decode {}: {e}", path.display()))
}

async fn write_file<T: Serialize>(path: &Path, file: &CacheFileRef<'_, T>) -> anyhow::Result<()> {
    let json = serde_json::to_vec(file).context("serialize cache file")?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("cache.json");
    let tmp = path.with_file_name(format!("{file_name}.{}.tmp", std::process::id()));

    fs::write(&tmp, &json)
        .await
        .with_context(|| format!("write {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e).with_context(|| format!("rename {} into place", tmp.display()));
    }
    Ok(())
}
