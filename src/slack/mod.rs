//! Remote workspace capability.
//!
//! [`SlackApi`] is the seam between the local engine and Slack: the
//! directory, unread aggregator and tools only ever talk to the trait.
//! [`SlackApiClient`] is the production implementation over the Web API;
//! tests substitute in-memory mocks.

pub mod api;
pub mod retry;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::config::{Config, SecretRef};
use crate::directory::{Channel, ChannelType, User};

pub use api::SlackApiClient;
pub use retry::RetryPolicy;
pub use types::{
    CanvasChange, CanvasOperation, FileInfo, HistoryRequest, Message, Page, SectionCriteria,
    UnreadCount,
};

/// Failure of a single remote call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// HTTP 429 or `ratelimited`.  `retry_after` comes from the header.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    /// `ok: false` with a Slack error code (`channel_not_found`, …).
    #[error("{method} failed: {code}")]
    Slack { method: String, code: String },
    /// A body that could not be decoded or lacks required fields.
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

impl ApiError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::RateLimited { .. } | ApiError::Timeout(_) | ApiError::Transport(_) => true,
            ApiError::Http { status, .. } => *status >= 500,
            ApiError::Slack { code, .. } => matches!(
                code.as_str(),
                "ratelimited" | "service_unavailable" | "request_timeout" | "internal_error"
            ),
            ApiError::Malformed(_) | ApiError::Unsupported(_) => false,
        }
    }

    /// Server-requested delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout(e.to_string())
        } else if e.is_decode() {
            ApiError::Malformed(e.to_string())
        } else if let Some(status) = e.status() {
            ApiError::Http {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

/// Everything the engine needs from the remote workspace.
///
/// Listing calls take the cursor returned by the previous page (`None`
/// for the first page) and return `next_cursor: None` when done.  Canvas
/// and file operations have default implementations that report
/// [`ApiError::Unsupported`] so read-only backends stay small.
#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn list_users(&self, cursor: Option<&str>) -> Result<Page<User>, ApiError>;

    async fn list_channels(
        &self,
        kind: ChannelType,
        cursor: Option<&str>,
    ) -> Result<Page<Channel>, ApiError>;

    /// Read state of every conversation the caller is a member of.
    async fn unread_counts(&self) -> Result<Vec<UnreadCount>, ApiError>;

    async fn conversation_history(&self, req: &HistoryRequest) -> Result<Page<Message>, ApiError>;

    async fn create_canvas(&self, _title: Option<&str>, _markdown: &str) -> Result<String, ApiError> {
        Err(ApiError::Unsupported("canvases.create"))
    }

    async fn edit_canvas(&self, _canvas_id: &str, _change: &CanvasChange) -> Result<(), ApiError> {
        Err(ApiError::Unsupported("canvases.edit"))
    }

    async fn lookup_canvas_sections(
        &self,
        _canvas_id: &str,
        _criteria: &SectionCriteria,
    ) -> Result<Vec<String>, ApiError> {
        Err(ApiError::Unsupported("canvases.sections.lookup"))
    }

    async fn file_info(&self, _file_id: &str) -> Result<FileInfo, ApiError> {
        Err(ApiError::Unsupported("files.info"))
    }

    /// Download a private file URL as text.
    async fn download_file(&self, _url: &str) -> Result<String, ApiError> {
        Err(ApiError::Unsupported("file download"))
    }
}

/// Resolve the Slack token.
///
/// Order:
/// 1. `SLACK_TOKEN` environment variable
/// 2. `slack.token` in config: `$VAR`, a literal, or a pointer with
///    `source: env` / `source: keyring`
pub fn resolve_token(cfg: &Config) -> Option<String> {
    if let Ok(tok) = std::env::var("SLACK_TOKEN") {
        if !tok.is_empty() {
            return Some(tok);
        }
    }

    match cfg.slack.token.as_ref()? {
        SecretRef::Plain(s) => {
            if let Some(var) = s.strip_prefix('$').filter(|v| !v.is_empty()) {
                return std::env::var(var).ok().filter(|v| !v.is_empty());
            }
            (!s.is_empty()).then(|| s.clone())
        }
        SecretRef::Pointer { key, source } => match source.as_str() {
            "env" => std::env::var(key).ok().filter(|v| !v.is_empty()),
            "keyring" => {
                let service = cfg.slack.keyring_service.as_deref().unwrap_or("slackwire");
                match keyring::Entry::new(service, key).and_then(|e| e.get_password()) {
                    Ok(pw) if !pw.is_empty() => Some(pw),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(service, key = %key, error = %e, "keyring lookup failed");
                        None
                    }
                }
            }
            other => {
                warn!(source = %other, "unknown token source");
                None
            }
        },
    }
}
