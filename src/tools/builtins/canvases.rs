//! Canvas tools: `canvases_create`, `canvases_edit`,
//! `canvases_sections_lookup`, `canvases_read`.
//!
//! Canvases are markdown documents.  Edits address sections by ID; use
//! `canvases_sections_lookup` to find them first.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::slack::{CanvasChange, CanvasOperation, SectionCriteria};
use crate::tools::{handler, optional_str, required_str, ToolContext, ToolMeta, ToolRegistry};

/// Args: `{ "title?": "…", "content": "markdown" }`
/// Returns: `{ "canvas_id", "title", "message" }`
pub async fn canvases_create(args: Value, ctx: Arc<ToolContext>) -> anyhow::Result<Value> {
    const TOOL: &str = "canvases_create";
    let content = required_str(&args, TOOL, "content")?;
    let title = optional_str(&args, TOOL, "title")?;

    let api = Arc::clone(&ctx.api);
    let canvas_id = ctx
        .retry
        .run("canvases.create", || api.create_canvas(title, content))
        .await
        .map_err(|e| anyhow::anyhow!("{TOOL}: failed to create canvas: {e}"))?;

    info!(canvas_id = %canvas_id, title = title.unwrap_or(""), "canvas created");
    Ok(json!({
        "canvas_id": canvas_id,
        "title": title.unwrap_or(""),
        "message": "Canvas created successfully",
    }))
}

/// Args: `{ "canvas_id", "operation?", "content", "section_id?" }`
///
/// `operation` defaults to `insert_at_end`.  `section_id` is required for
/// `insert_before`, `insert_after` and `delete`; `content` for everything
/// but `delete`.
pub async fn canvases_edit(args: Value, ctx: Arc<ToolContext>) -> anyhow::Result<Value> {
    const TOOL: &str = "canvases_edit";
    let canvas_id = required_str(&args, TOOL, "canvas_id")?;
    let operation = match optional_str(&args, TOOL, "operation")? {
        Some(op) => CanvasOperation::parse(op).ok_or_else(|| {
            anyhow::anyhow!(
                "{TOOL}: invalid operation '{op}', must be one of: {}",
                CanvasOperation::NAMES.join(", ")
            )
        })?,
        None => CanvasOperation::InsertAtEnd,
    };
    let section_id = optional_str(&args, TOOL, "section_id")?;
    if operation.requires_section() && section_id.is_none() {
        anyhow::bail!("{TOOL}: `section_id` is required for operation {}", operation.as_str());
    }
    let markdown = if operation == CanvasOperation::Delete {
        optional_str(&args, TOOL, "content")?.unwrap_or_default()
    } else {
        required_str(&args, TOOL, "content")?
    };

    let change = CanvasChange {
        operation,
        markdown: markdown.to_string(),
        section_id: section_id.map(str::to_string),
    };
    let api = Arc::clone(&ctx.api);
    ctx.retry
        .run("canvases.edit", || api.edit_canvas(canvas_id, &change))
        .await
        .map_err(|e| anyhow::anyhow!("{TOOL}: failed to edit canvas: {e}"))?;

    info!(canvas_id, operation = operation.as_str(), "canvas edited");
    Ok(json!({
        "canvas_id": canvas_id,
        "operation": operation.as_str(),
        "message": "Canvas edited successfully",
    }))
}

/// Args: `{ "canvas_id", "contains_text?", "section_types?": ["h1", …] }`
/// Returns: `{ "canvas_id", "sections": [{ "id" }], "count" }`
pub async fn canvases_sections_lookup(args: Value, ctx: Arc<ToolContext>) -> anyhow::Result<Value> {
    const TOOL: &str = "canvases_sections_lookup";
    let canvas_id = required_str(&args, TOOL, "canvas_id")?;
    let section_types = match args.get("section_types") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("{TOOL}: `section_types` must be an array of strings"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?,
        Some(_) => anyhow::bail!("{TOOL}: `section_types` must be an array of strings"),
    };
    let criteria = SectionCriteria {
        contains_text: optional_str(&args, TOOL, "contains_text")?.map(str::to_string),
        section_types,
    };

    let api = Arc::clone(&ctx.api);
    let sections = ctx
        .retry
        .run("canvases.sections.lookup", || {
            api.lookup_canvas_sections(canvas_id, &criteria)
        })
        .await
        .map_err(|e| anyhow::anyhow!("{TOOL}: failed to look up canvas sections: {e}"))?;

    debug!(canvas_id, found = sections.len(), "canvas sections looked up");
    Ok(json!({
        "canvas_id": canvas_id,
        "count": sections.len(),
        "sections": sections.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>(),
    }))
}

/// Args: `{ "canvas_id" }`
///
/// Returns file metadata plus the downloaded markdown under `content`.  A
/// failed download is reported in `content_error` rather than failing the
/// whole call.
pub async fn canvases_read(args: Value, ctx: Arc<ToolContext>) -> anyhow::Result<Value> {
    const TOOL: &str = "canvases_read";
    let canvas_id = required_str(&args, TOOL, "canvas_id")?;

    let api = Arc::clone(&ctx.api);
    let file = ctx
        .retry
        .run("files.info", || api.file_info(canvas_id))
        .await
        .map_err(|e| anyhow::anyhow!("{TOOL}: failed to read canvas: {e}"))?;

    let mut result = json!({
        "canvas_id": canvas_id,
        "title": file.title,
        "name": file.name,
        "created": file.created,
        "timestamp": file.timestamp,
        "mimetype": file.mimetype,
        "filetype": file.filetype,
        "pretty_type": file.pretty_type,
        "size": file.size,
        "url": file.url_private,
        "permalink": file.permalink,
        "user": file.user,
        "is_public": file.is_public,
        "is_external": file.is_external,
        "editable": file.editable,
    });
    if !file.preview.is_empty() {
        result["preview"] = json!(file.preview);
    }
    if !file.preview_highlight.is_empty() {
        result["preview_highlight"] = json!(file.preview_highlight);
    }

    if !file.url_private_download.is_empty() {
        let url = file.url_private_download.as_str();
        match ctx.retry.run("canvas download", || api.download_file(url)).await {
            Ok(content) => {
                debug!(canvas_id, bytes = content.len(), "canvas content downloaded");
                result["content"] = Value::String(content);
            }
            Err(e) => {
                warn!(canvas_id, error = %e, "canvas content download failed");
                result["content_error"] = json!(format!("failed to download content: {e}"));
            }
        }
    }

    Ok(result)
}

pub fn register(reg: &mut ToolRegistry) {
    reg.register(
        ToolMeta {
            name: "canvases_create".into(),
            description: "Create a canvas document from markdown content.".into(),
            args_schema: json!({
                "type": "object",
                "properties": {
                    "title": {
                        "type": "string",
                        "description": "Optional canvas title."
                    },
                    "content": {
                        "type": "string",
                        "description": "Canvas body as markdown."
                    }
                },
                "required": ["content"],
                "additionalProperties": false
            }),
        },
        handler(canvases_create),
    );
    reg.register(
        ToolMeta {
            name: "canvases_edit".into(),
            description: "Edit a canvas: insert markdown at the start or end, before or after a section, replace content, or delete a section.".into(),
            args_schema: json!({
                "type": "object",
                "properties": {
                    "canvas_id": {
                        "type": "string",
                        "description": "Canvas (file) ID."
                    },
                    "operation": {
                        "type": "string",
                        "enum": CanvasOperation::NAMES,
                        "description": "Edit operation (default insert_at_end)."
                    },
                    "content": {
                        "type": "string",
                        "description": "Markdown to insert or replace with. Not needed for delete."
                    },
                    "section_id": {
                        "type": "string",
                        "description": "Target section; required for insert_before, insert_after and delete."
                    }
                },
                "required": ["canvas_id"],
                "additionalProperties": false
            }),
        },
        handler(canvases_edit),
    );
    reg.register(
        ToolMeta {
            name: "canvases_sections_lookup".into(),
            description: "Find section IDs in a canvas, optionally filtered by contained text or section type.".into(),
            args_schema: json!({
                "type": "object",
                "properties": {
                    "canvas_id": {
                        "type": "string",
                        "description": "Canvas (file) ID."
                    },
                    "contains_text": {
                        "type": "string",
                        "description": "Only sections containing this text."
                    },
                    "section_types": {
                        "type": "array",
                        "items": { "type": "string", "enum": ["any_header", "h1", "h2", "h3"] },
                        "description": "Only sections of these types."
                    }
                },
                "required": ["canvas_id"],
                "additionalProperties": false
            }),
        },
        handler(canvases_sections_lookup),
    );
    reg.register(
        ToolMeta {
            name: "canvases_read".into(),
            description: "Read a canvas: file metadata plus its full markdown content.".into(),
            args_schema: json!({
                "type": "object",
                "properties": {
                    "canvas_id": {
                        "type": "string",
                        "description": "Canvas (file) ID."
                    }
                },
                "required": ["canvas_id"],
                "additionalProperties": false
            }),
        },
        handler(canvases_read),
    );
}
