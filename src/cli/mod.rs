//! CLI subcommand handlers extracted from `main.rs`.
//!
//! Keeps `main.rs` slim: clap parsing stays there, the work lives here.
//! Every handler returns JSON; printing is left to the caller.

use std::sync::Arc;

use anyhow::Context;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::directory::{CacheStore, DirectoryService, DirectorySettings};
use crate::slack::{RetryPolicy, SlackApi, SlackApiClient};
use crate::tools::{ToolContext, ToolRegistry};
use crate::unreads::{UnreadAggregator, UnreadQuery, UnreadSettings};
use crate::utils::human_age;

/// Long-lived services for one process.
pub struct Runtime {
    pub directory: DirectoryService,
    pub tools: ToolRegistry,
}

impl Runtime {
    /// Wire everything against the Slack Web API.
    pub fn new(cfg: &Config, token: String) -> Self {
        let client = match &cfg.slack.base_url {
            Some(url) => SlackApiClient::with_base_url(token, url),
            None => SlackApiClient::new(token),
        }
        .page_size(cfg.directory.page_size);
        debug!(base_url = client.base_url(), "slack client ready");
        Self::with_api(cfg, Arc::new(client))
    }

    /// Wire everything against an arbitrary [`SlackApi`].
    pub fn with_api(cfg: &Config, api: Arc<dyn SlackApi>) -> Self {
        let store = CacheStore::new(cfg.cache.resolved_dir());
        let directory = DirectoryService::new(
            Arc::clone(&api),
            store,
            DirectorySettings::from_config(cfg),
        );
        let unreads = UnreadAggregator::new(
            Arc::clone(&api),
            directory.clone(),
            UnreadSettings::from_config(cfg),
        );
        let ctx = Arc::new(ToolContext {
            directory: directory.clone(),
            unreads,
            api,
            retry: RetryPolicy::from(&cfg.retry),
        });
        Self {
            directory,
            tools: ToolRegistry::with_builtins(ctx),
        }
    }
}

/// Directory status from the local cache only; never calls the API.
pub async fn status(rt: &Runtime) -> anyhow::Result<Value> {
    rt.directory.load_cached().await;
    status_json(rt)
}

/// Refresh the directory (a fresh one is kept unless `force`).
pub async fn refresh(rt: &Runtime, force: bool) -> anyhow::Result<Value> {
    rt.directory
        .refresh(force)
        .await
        .context("directory refresh failed")?;
    status_json(rt)
}

fn status_json(rt: &Runtime) -> anyhow::Result<Value> {
    let status = rt.directory.status();
    let age = status.age_secs.map(human_age);
    let mut v = serde_json::to_value(status).context("serialize directory status")?;
    v["age"] = json!(age);
    Ok(v)
}

/// Resolve a channel reference, or a user reference with `user`.
pub async fn resolve(rt: &Runtime, token: &str, user: bool) -> anyhow::Result<Value> {
    rt.directory.warm_up().await?;
    let tool = if user { "users_resolve" } else { "channels_resolve" };
    rt.tools.call(tool, json!({ "token": token })).await
}

/// Unread report.  Works without a directory, with IDs instead of names.
pub async fn unreads(rt: &Runtime, query: UnreadQuery) -> anyhow::Result<Value> {
    let report = rt.tools.context().unreads.aggregate(&query).await?;
    serde_json::to_value(report).context("serialize unread report")
}

pub fn list_tools(rt: &Runtime) -> anyhow::Result<Value> {
    serde_json::to_value(rt.tools.list()).context("serialize tool list")
}

/// Invoke a tool with JSON arguments (`{}` when omitted).
pub async fn call_tool(rt: &Runtime, name: &str, args: Option<&str>) -> anyhow::Result<Value> {
    let args: Value = match args {
        Some(raw) => serde_json::from_str(raw).context("--args is not valid JSON")?,
        None => json!({}),
    };
    rt.tools.call(name, args).await
}

pub fn print_json(value: &Value) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{out}");
    Ok(())
}
