//! Tool surface for the outer dispatch layer.
//!
//! A [`ToolRegistry`] tracks every tool's name, description and JSON-Schema
//! for its arguments together with an async handler.  Handlers take the
//! JSON arguments plus the shared [`ToolContext`] and return JSON.  Use
//! [`ToolRegistry::with_builtins`] to get the full catalogue.

pub mod builtins;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::directory::DirectoryService;
use crate::slack::{RetryPolicy, SlackApi};
use crate::unreads::UnreadAggregator;

/// Metadata describing a tool.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolMeta {
    /// Short machine-friendly name (e.g. `"channels_resolve"`).
    pub name: String,
    /// Human-readable one-liner describing what the tool does.
    pub description: String,
    /// JSON Schema object describing the expected `args` value.
    pub args_schema: Value,
}

/// Everything a tool handler may touch.
pub struct ToolContext {
    pub directory: DirectoryService,
    pub unreads: UnreadAggregator,
    pub api: Arc<dyn SlackApi>,
    /// Applied to remote calls made directly by tools.
    pub retry: RetryPolicy,
}

pub type ToolFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// Async handler function that tools register for dispatch.
pub type ToolHandler = Arc<dyn Fn(Value, Arc<ToolContext>) -> ToolFuture + Send + Sync>;

/// Wrap an `async fn(args, ctx)` as a [`ToolHandler`].
pub fn handler<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(Value, Arc<ToolContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |args, ctx| -> ToolFuture { Box::pin(f(args, ctx)) })
}

struct ToolEntry {
    meta: ToolMeta,
    handler: ToolHandler,
}

/// Catalogue of callable tools bound to one [`ToolContext`].
pub struct ToolRegistry {
    ctx: Arc<ToolContext>,
    tools: Vec<ToolEntry>,
}

impl ToolRegistry {
    /// Empty registry.
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self {
            ctx,
            tools: Vec::new(),
        }
    }

    /// Registry with every built-in tool.
    pub fn with_builtins(ctx: Arc<ToolContext>) -> Self {
        let mut reg = Self::new(ctx);
        builtins::register_all(&mut reg);
        info!(count = reg.tools.len(), "tools registered");
        reg
    }

    /// Register a tool.  Duplicate names are ignored (first registration wins).
    pub fn register(&mut self, meta: ToolMeta, handler: ToolHandler) {
        if self.tools.iter().any(|e| e.meta.name == meta.name) {
            debug!(tool = %meta.name, "duplicate tool registration ignored");
            return;
        }
        self.tools.push(ToolEntry { meta, handler });
    }

    /// Metadata for every registered tool, in registration order.
    pub fn list(&self) -> Vec<ToolMeta> {
        self.tools.iter().map(|e| e.meta.clone()).collect()
    }

    pub fn meta(&self, name: &str) -> Option<&ToolMeta> {
        self.tools.iter().find(|e| e.meta.name == name).map(|e| &e.meta)
    }

    pub fn context(&self) -> &Arc<ToolContext> {
        &self.ctx
    }

    /// Dispatch `name` with `args`.  `null` arguments are treated as `{}`.
    pub async fn call(&self, name: &str, args: Value) -> anyhow::Result<Value> {
        let handler = self
            .tools
            .iter()
            .find(|e| e.meta.name == name)
            .map(|e| Arc::clone(&e.handler))
            .ok_or_else(|| anyhow::anyhow!("unknown tool: {name}"))?;

        let args = match args {
            Value::Null => Value::Object(Default::default()),
            Value::Object(_) => args,
            other => anyhow::bail!("{name}: arguments must be a JSON object, got {other}"),
        };

        debug!(tool = name, "calling tool");
        handler(args, Arc::clone(&self.ctx)).await
    }
}

// ── Argument helpers ────────────────────────────────────────

/// A required, non-empty string argument.
pub fn required_str<'a>(args: &'a Value, tool: &str, key: &str) -> anyhow::Result<&'a str> {
    match args.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            anyhow::bail!("{tool}: missing `{key}` argument")
        }
        Some(other) => anyhow::bail!("{tool}: `{key}` must be a string, got {other}"),
    }
}

/// An optional string argument; empty strings count as absent.
pub fn optional_str<'a>(args: &'a Value, tool: &str, key: &str) -> anyhow::Result<Option<&'a str>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => anyhow::bail!("{tool}: `{key}` must be a string, got {other}"),
    }
}

pub fn optional_bool(args: &Value, tool: &str, key: &str) -> anyhow::Result<Option<bool>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => anyhow::bail!("{tool}: `{key}` must be a boolean, got {other}"),
    }
}

/// An optional non-negative integer argument.
pub fn optional_usize(args: &Value, tool: &str, key: &str) -> anyhow::Result<Option<usize>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| anyhow::anyhow!("{tool}: `{key}` must be a non-negative integer, got {v}")),
    }
}
