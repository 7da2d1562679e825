//! `conversations_history`: read messages from any conversation reference.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::reference::ConversationRef;
use crate::slack::HistoryRequest;
use crate::tools::{handler, optional_str, optional_usize, required_str, ToolContext, ToolMeta, ToolRegistry};

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 200;

/// Args: `{ "channel": "…", "limit?": N, "cursor?": "…", "oldest?": ts, "latest?": ts }`
///
/// A permalink returns just the linked message.
pub async fn conversations_history(args: Value, ctx: Arc<ToolContext>) -> anyhow::Result<Value> {
    const TOOL: &str = "conversations_history";
    let channel = required_str(&args, TOOL, "channel")?;
    let reference = ConversationRef::parse(channel)?;
    // Permalinks and conversation IDs carry their channel ID; the directory
    // only adds names for them.
    let (req, dir) = match &reference {
        ConversationRef::Permalink {
            channel_id,
            message_ts,
            ..
        } => {
            let req = HistoryRequest {
                channel_id: channel_id.clone(),
                limit: 1,
                oldest: Some(message_ts.clone()),
                latest: Some(message_ts.clone()),
                inclusive: true,
                ..HistoryRequest::default()
            };
            (req, ctx.directory.current().await.ok())
        }
        _ => {
            let limit = optional_usize(&args, TOOL, "limit")?.unwrap_or(DEFAULT_LIMIT);
            if limit == 0 || limit > MAX_LIMIT {
                anyhow::bail!("{TOOL}: `limit` must be between 1 and {MAX_LIMIT}");
            }
            let (channel_id, dir) = match reference.channel_id() {
                Some(id) => (id.to_string(), ctx.directory.current().await.ok()),
                None => {
                    let dir = ctx.directory.current().await?;
                    (dir.resolve_channel_ref(&reference)?, Some(dir))
                }
            };
            let req = HistoryRequest {
                channel_id,
                limit,
                cursor: optional_str(&args, TOOL, "cursor")?.map(str::to_string),
                oldest: optional_str(&args, TOOL, "oldest")?.map(str::to_string),
                latest: optional_str(&args, TOOL, "latest")?.map(str::to_string),
                inclusive: false,
            };
            (req, dir)
        }
    };

    let api = Arc::clone(&ctx.api);
    let page = ctx
        .retry
        .run("conversations.history", || api.conversation_history(&req))
        .await?;

    let mut messages = page.items;
    for msg in &mut messages {
        msg.user_handle = msg
            .user
            .as_deref()
            .and_then(|u| dir.as_ref()?.user_handle(u))
            .map(str::to_string);
    }

    Ok(json!({
        "channel_id": req.channel_id,
        "channel": dir.as_ref().and_then(|d| d.channel_name(&req.channel_id)),
        "messages": messages,
        "next_cursor": page.next_cursor,
    }))
}

pub fn register(reg: &mut ToolRegistry) {
    reg.register(
        ToolMeta {
            name: "conversations_history".into(),
            description: "Read messages from a channel, DM or group DM. The channel may be given as #name, @handle, ID or a message permalink (which returns just that message).".into(),
            args_schema: json!({
                "type": "object",
                "properties": {
                    "channel": {
                        "type": "string",
                        "description": "Conversation reference: '#general', '@alice', 'C0123456789' or a permalink URL."
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Messages per page (1-200, default 20)."
                    },
                    "cursor": {
                        "type": "string",
                        "description": "next_cursor from a previous call."
                    },
                    "oldest": {
                        "type": "string",
                        "description": "Only messages after this timestamp."
                    },
                    "latest": {
                        "type": "string",
                        "description": "Only messages before this timestamp."
                    }
                },
                "required": ["channel"],
                "additionalProperties": false
            }),
        },
        handler(conversations_history),
    );
}
