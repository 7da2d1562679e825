//! `conversations_unreads`: prioritized unread conversations.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::tools::{handler, optional_bool, optional_str, optional_usize, ToolContext, ToolMeta, ToolRegistry};
use crate::unreads::{ChannelFilter, UnreadQuery};

/// Args: `{ "include_messages?", "channel_types?", "max_channels?",
/// "max_messages_per_channel?", "mentions_only?" }`
pub async fn conversations_unreads(args: Value, ctx: Arc<ToolContext>) -> anyhow::Result<Value> {
    let query = parse_query(&args)?;
    let report = ctx.unreads.aggregate(&query).await?;
    Ok(serde_json::to_value(report)?)
}

fn parse_query(args: &Value) -> anyhow::Result<UnreadQuery> {
    const TOOL: &str = "conversations_unreads";
    let channel_types = match optional_str(args, TOOL, "channel_types")? {
        Some(s) => s
            .parse::<ChannelFilter>()
            .map_err(|e| anyhow::anyhow!("{TOOL}: {e}"))?,
        None => ChannelFilter::All,
    };
    let max_messages_per_channel = optional_usize(args, TOOL, "max_messages_per_channel")?;
    if max_messages_per_channel == Some(0) {
        anyhow::bail!("{TOOL}: `max_messages_per_channel` must be at least 1");
    }
    Ok(UnreadQuery {
        include_messages: optional_bool(args, TOOL, "include_messages")?.unwrap_or(false),
        channel_types,
        max_channels: optional_usize(args, TOOL, "max_channels")?,
        max_messages_per_channel,
        mentions_only: optional_bool(args, TOOL, "mentions_only")?.unwrap_or(false),
    })
}

pub fn register(reg: &mut ToolRegistry) {
    reg.register(
        ToolMeta {
            name: "conversations_unreads".into(),
            description: "List conversations with unread messages, DMs first, then group DMs, partner channels and internal channels. Optionally includes the unread messages themselves.".into(),
            args_schema: json!({
                "type": "object",
                "properties": {
                    "include_messages": {
                        "type": "boolean",
                        "description": "Fetch the unread messages of each returned conversation."
                    },
                    "channel_types": {
                        "type": "string",
                        "enum": ["all", "dm", "group_dm", "partner", "internal"],
                        "description": "Restrict to one category (default all)."
                    },
                    "max_channels": {
                        "type": "integer",
                        "description": "Maximum conversations returned."
                    },
                    "max_messages_per_channel": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Maximum messages fetched per conversation."
                    },
                    "mentions_only": {
                        "type": "boolean",
                        "description": "Only conversations where you were mentioned."
                    }
                },
                "additionalProperties": false
            }),
        },
        handler(conversations_unreads),
    );
}
