//! Slack Web API client.
//!
//! [`SlackApiClient`] implements [`SlackApi`] over HTTPS with a bearer
//! token.  It performs exactly one request per call; retrying is the
//! caller's business (see [`RetryPolicy`](super::RetryPolicy)).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use super::types::{
    WireCanvasCreate, WireConversationsList, WireCounts, WireEnvelope, WireFileInfo, WireHistory,
    WireSections, WireUsersList,
};
use super::{
    ApiError, CanvasChange, FileInfo, HistoryRequest, Message, Page, SectionCriteria, SlackApi,
    UnreadCount,
};
use crate::directory::{Channel, ChannelType, User};
use crate::utils::truncate_str;

/// Base URL for the Slack Web API.
pub const SLACK_API_BASE: &str = "https://slack.com/api";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error bodies are often whole HTML pages.
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for the Slack Web API.
pub struct SlackApiClient {
    http: Client,
    token: String,
    base_url: String,
    page_size: usize,
}

impl SlackApiClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, SLACK_API_BASE)
    }

    /// Point the client at a different base URL (proxies, tests).
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            token: token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size: 200,
        }
    }

    /// Items requested per listing page.
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, method: &str) -> RequestBuilder {
        self.http
            .get(format!("{}/{method}", self.base_url))
            .bearer_auth(&self.token)
    }

    fn post(&self, method: &str) -> RequestBuilder {
        self.http
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(&self.token)
    }

    /// Send a request and decode a Slack-style `{ ok, error, … }` body.
    async fn call<T: DeserializeOwned>(&self, method: &str, req: RequestBuilder) -> Result<T, ApiError> {
        debug!(method, "slack api call");
        let resp = req.send().await?;
        let body = check_status(resp).await?;

        let envelope: WireEnvelope = serde_json::from_slice(&body)
            .map_err(|e| ApiError::Malformed(format!("{method}: {e}")))?;
        if !envelope.ok {
            let code = envelope.error.unwrap_or_else(|| "unknown_error".into());
            if code == "ratelimited" {
                return Err(ApiError::RateLimited { retry_after: None });
            }
            return Err(ApiError::Slack {
                method: method.to_string(),
                code,
            });
        }

        serde_json::from_slice(&body).map_err(|e| ApiError::Malformed(format!("{method}: {e}")))
    }
}

/// Map non-2xx responses to [`ApiError`] and return the raw body otherwise.
async fn check_status(resp: Response) -> Result<Vec<u8>, ApiError> {
    let status = resp.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ApiError::RateLimited {
            retry_after: parse_retry_after(resp.headers()),
        });
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ApiError::Http {
            status: status.as_u16(),
            body: truncate_str(body.trim(), MAX_ERROR_BODY),
        });
    }
    Ok(resp.bytes().await?.to_vec())
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn required<T>(value: Option<T>, method: &str, field: &str) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::Malformed(format!("{method}: missing `{field}`")))
}

#[async_trait]
impl SlackApi for SlackApiClient {
    async fn list_users(&self, cursor: Option<&str>) -> Result<Page<User>, ApiError> {
        let mut query = vec![("limit", self.page_size.to_string())];
        if let Some(c) = cursor {
            query.push(("cursor", c.to_string()));
        }
        let body: WireUsersList = self
            .call("users.list", self.get("users.list").query(&query))
            .await?;
        let members = required(body.members, "users.list", "members")?;
        Ok(Page {
            items: members.into_iter().map(User::from).collect(),
            next_cursor: body.response_metadata.cursor(),
        })
    }

    async fn list_channels(
        &self,
        kind: ChannelType,
        cursor: Option<&str>,
    ) -> Result<Page<Channel>, ApiError> {
        let mut query = vec![
            ("types", kind.as_str().to_string()),
            ("limit", self.page_size.to_string()),
            ("exclude_archived", "false".to_string()),
        ];
        if let Some(c) = cursor {
            query.push(("cursor", c.to_string()));
        }
        let body: WireConversationsList = self
            .call(
                "conversations.list",
                self.get("conversations.list").query(&query),
            )
            .await?;
        let channels = required(body.channels, "conversations.list", "channels")?;
        Ok(Page {
            items: channels.into_iter().map(|c| c.into_channel(kind)).collect(),
            next_cursor: body.response_metadata.cursor(),
        })
    }

    async fn unread_counts(&self) -> Result<Vec<UnreadCount>, ApiError> {
        let body: WireCounts = self
            .call("client.counts", self.post("client.counts").form(&[("thread_counts_by_channel", "false")]))
            .await?;
        Ok(body
            .channels
            .into_iter()
            .chain(body.mpims)
            .chain(body.ims)
            .map(UnreadCount::from)
            .collect())
    }

    async fn conversation_history(&self, req: &HistoryRequest) -> Result<Page<Message>, ApiError> {
        let mut query = vec![
            ("channel", req.channel_id.clone()),
            ("limit", req.limit.max(1).to_string()),
            ("inclusive", req.inclusive.to_string()),
        ];
        if let Some(c) = &req.cursor {
            query.push(("cursor", c.clone()));
        }
        if let Some(o) = &req.oldest {
            query.push(("oldest", o.clone()));
        }
        if let Some(l) = &req.latest {
            query.push(("latest", l.clone()));
        }
        let body: WireHistory = self
            .call(
                "conversations.history",
                self.get("conversations.history").query(&query),
            )
            .await?;
        Ok(Page {
            items: required(body.messages, "conversations.history", "messages")?,
            next_cursor: body.response_metadata.cursor(),
        })
    }

    async fn create_canvas(&self, title: Option<&str>, markdown: &str) -> Result<String, ApiError> {
        let mut body = json!({
            "document_content": { "type": "markdown", "markdown": markdown },
        });
        if let Some(t) = title.filter(|t| !t.is_empty()) {
            body["title"] = Value::String(t.to_string());
        }
        let resp: WireCanvasCreate = self
            .call("canvases.create", self.post("canvases.create").json(&body))
            .await?;
        required(resp.canvas_id, "canvases.create", "canvas_id")
    }

    async fn edit_canvas(&self, canvas_id: &str, change: &CanvasChange) -> Result<(), ApiError> {
        let mut change_json = json!({
            "operation": change.operation.as_str(),
        });
        if change.operation != super::CanvasOperation::Delete {
            change_json["document_content"] =
                json!({ "type": "markdown", "markdown": change.markdown });
        }
        if let Some(section) = &change.section_id {
            change_json["section_id"] = Value::String(section.clone());
        }
        let body = json!({ "canvas_id": canvas_id, "changes": [change_json] });
        let _: WireEnvelope = self
            .call("canvases.edit", self.post("canvases.edit").json(&body))
            .await?;
        Ok(())
    }

    async fn lookup_canvas_sections(
        &self,
        canvas_id: &str,
        criteria: &SectionCriteria,
    ) -> Result<Vec<String>, ApiError> {
        let mut crit = serde_json::Map::new();
        if let Some(text) = &criteria.contains_text {
            crit.insert("contains_text".into(), Value::String(text.clone()));
        }
        if !criteria.section_types.is_empty() {
            crit.insert("section_types".into(), json!(criteria.section_types));
        }
        let body = json!({ "canvas_id": canvas_id, "criteria": crit });
        let resp: WireSections = self
            .call(
                "canvases.sections.lookup",
                self.post("canvases.sections.lookup").json(&body),
            )
            .await?;
        Ok(resp.sections.into_iter().map(|s| s.id).collect())
    }

    async fn file_info(&self, file_id: &str) -> Result<FileInfo, ApiError> {
        let resp: WireFileInfo = self
            .call("files.info", self.get("files.info").query(&[("file", file_id)]))
            .await?;
        required(resp.file, "files.info", "file")
    }

    async fn download_file(&self, url: &str) -> Result<String, ApiError> {
        debug!(url, "downloading private file");
        let resp = self.http.get(url).bearer_auth(&self.token).send().await?;
        let body = check_status(resp).await?;
        String::from_utf8(body).map_err(|e| ApiError::Malformed(format!("download: {e}")))
    }
}
