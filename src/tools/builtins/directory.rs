//! Directory tools: `channels_resolve`, `users_resolve`,
//! `directory_status`, `directory_refresh`.
//!
//! Resolution outcomes are data, not errors: a miss or an ambiguous name
//! comes back as `{ "status": "not_found" | "ambiguous", … }` so the caller
//! can ask a follow-up question.  Malformed tokens and an unavailable
//! directory are errors.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::directory::{Directory, DirectoryError};
use crate::tools::{handler, optional_bool, required_str, ToolContext, ToolMeta, ToolRegistry};

/// Args: `{ "token": "#general" | "@alice" | "C…" | permalink }`
/// Returns: `{ "status": "ok", "id", "name", … }` or a non-ok status.
pub async fn channels_resolve(args: Value, ctx: Arc<ToolContext>) -> anyhow::Result<Value> {
    let token = required_str(&args, "channels_resolve", "token")?;
    let dir = ctx.directory.current().await?;

    Ok(match dir.resolve_channel(token) {
        Ok(id) => {
            let channel = dir.channel(&id);
            json!({
                "status": "ok",
                "token": token,
                "id": id,
                "name": dir.channel_name(&id),
                "type": channel.map(|c| c.kind.as_str()),
                "topic": channel.map(|c| c.topic.as_str()),
                "purpose": channel.map(|c| c.purpose.as_str()),
                "member_count": channel.map(|c| c.member_count),
                "is_ext_shared": channel.map(|c| c.is_ext_shared),
                "is_archived": channel.map(|c| c.is_archived),
            })
        }
        Err(e) => miss(token, e, |id| dir.channel_name(id))?,
    })
}

/// Args: `{ "token": "@alice" | "alice" | "U…" }`
pub async fn users_resolve(args: Value, ctx: Arc<ToolContext>) -> anyhow::Result<Value> {
    let token = required_str(&args, "users_resolve", "token")?;
    let dir = ctx.directory.current().await?;

    Ok(match dir.resolve_user(token) {
        Ok(id) => {
            let user = dir.user(&id);
            json!({
                "status": "ok",
                "token": token,
                "id": id,
                "handle": user.map(|u| u.name.as_str()),
                "real_name": user.map(|u| u.real_name.as_str()),
                "display_name": user.map(|u| u.display_name.as_str()),
                "deleted": user.map(|u| u.deleted),
                "is_bot": user.map(|u| u.is_bot),
                "dm_channel": dm_of(&dir, &id),
            })
        }
        Err(e) => miss(token, e, |id| dir.user_handle(id).map(|h| format!("@{h}")))?,
    })
}

fn dm_of(dir: &Directory, user_id: &str) -> Option<String> {
    dir.dm_channel(user_id).map(|c| c.id.clone())
}

/// Turn a lookup miss into a structured result; other failures stay errors.
fn miss(
    token: &str,
    err: DirectoryError,
    name_of: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Value> {
    match err {
        DirectoryError::NotFound(what) => Ok(json!({
            "status": "not_found",
            "token": token,
            "message": format!("no match for {what}"),
        })),
        DirectoryError::Ambiguous { candidates, .. } => Ok(json!({
            "status": "ambiguous",
            "token": token,
            "candidates": candidates
                .iter()
                .map(|id| json!({ "id": id, "name": name_of(id) }))
                .collect::<Vec<_>>(),
        })),
        other => Err(other.into()),
    }
}

pub async fn directory_status(_args: Value, ctx: Arc<ToolContext>) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(ctx.directory.status())?)
}

/// Args: `{ "force?": bool }`
pub async fn directory_refresh(args: Value, ctx: Arc<ToolContext>) -> anyhow::Result<Value> {
    let force = optional_bool(&args, "directory_refresh", "force")?.unwrap_or(false);
    ctx.directory.refresh(force).await?;
    Ok(serde_json::to_value(ctx.directory.status())?)
}

pub fn register(reg: &mut ToolRegistry) {
    reg.register(
        ToolMeta {
            name: "channels_resolve".into(),
            description: "Resolve a channel reference (#name, @handle for a DM, channel ID or message permalink) to its channel ID. Returns status ok, not_found or ambiguous with candidates.".into(),
            args_schema: json!({
                "type": "object",
                "properties": {
                    "token": {
                        "type": "string",
                        "description": "Channel reference, e.g. '#general', '@alice', 'C0123456789' or a permalink URL."
                    }
                },
                "required": ["token"],
                "additionalProperties": false
            }),
        },
        handler(channels_resolve),
    );
    reg.register(
        ToolMeta {
            name: "users_resolve".into(),
            description: "Resolve a user reference (@handle, bare handle, user ID or DM channel ID) to a user ID with profile names. Returns status ok, not_found or ambiguous with candidates.".into(),
            args_schema: json!({
                "type": "object",
                "properties": {
                    "token": {
                        "type": "string",
                        "description": "User reference, e.g. '@alice' or 'U0123456789'."
                    }
                },
                "required": ["token"],
                "additionalProperties": false
            }),
        },
        handler(users_resolve),
    );
    reg.register(
        ToolMeta {
            name: "directory_status".into(),
            description: "Report the cached workspace directory: source, fetch time, age, staleness, counts and whether a refresh is running.".into(),
            args_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        },
        handler(directory_status),
    );
    reg.register(
        ToolMeta {
            name: "directory_refresh".into(),
            description: "Refresh the workspace directory from the remote API. Without force, a fresh directory is left alone.".into(),
            args_schema: json!({
                "type": "object",
                "properties": {
                    "force": {
                        "type": "boolean",
                        "description": "Refresh even when the cached directory is fresh."
                    }
                },
                "additionalProperties": false
            }),
        },
        handler(directory_refresh),
    );
}
