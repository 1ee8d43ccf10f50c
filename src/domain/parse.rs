use crate::domain::{ContentBlock, Message, Role, Usage};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct RecordHeader {
    #[serde(rename = "type", default)]
    record_type: String,
}

#[derive(Debug, Deserialize)]
struct LogRecord {
    #[serde(default)]
    uuid: Option<String>,

    #[serde(rename = "parentUuid", default)]
    parent_uuid: Option<String>,

    #[serde(default)]
    timestamp: Option<String>,

    #[serde(rename = "sessionId", default)]
    session_id: Option<String>,

    #[serde(rename = "agentId", default)]
    agent_id: Option<String>,

    #[serde(rename = "isSidechain", default)]
    is_sidechain: bool,

    #[serde(default)]
    message: Option<RecordMessage>,

    #[serde(rename = "thinkingMetadata", default)]
    thinking_metadata: Option<ThinkingMetadata>,
}

#[derive(Debug, Deserialize)]
struct RecordMessage {
    #[serde(default)]
    content: Value,

    #[serde(default)]
    model: Option<String>,

    #[serde(default)]
    stop_reason: Option<String>,

    #[serde(default)]
    usage: Option<RecordUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct RecordUsage {
    #[serde(default)]
    input_tokens: u64,

    #[serde(default)]
    output_tokens: u64,

    #[serde(default)]
    cache_read_input_tokens: u64,

    #[serde(default)]
    cache_creation_input_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ThinkingMetadata {
    #[serde(default)]
    level: Option<String>,
}

/// Decodes one log line. `Ok(None)` means the record is valid JSON but not a
/// conversational turn (snapshots, summaries, progress markers).
pub fn parse_message_line(line: &[u8]) -> Result<Option<Message>, ParseError> {
    let header: RecordHeader = serde_json::from_slice(line)?;
    let Some(role) = Role::from_record_type(&header.record_type) else {
        return Ok(None);
    };

    let record: LogRecord = serde_json::from_slice(line)?;
    let (blocks, model, stop_reason, usage) = match record.message {
        Some(message) => (
            parse_content_blocks(&message.content),
            non_empty(message.model),
            non_empty(message.stop_reason),
            message.usage.map(Usage::from).unwrap_or_default(),
        ),
        None => (Vec::new(), None, None, Usage::default()),
    };

    Ok(Some(Message {
        uuid: record.uuid.unwrap_or_default(),
        parent_uuid: record.parent_uuid,
        role,
        timestamp: record
            .timestamp
            .as_deref()
            .and_then(|value| OffsetDateTime::parse(value, &Rfc3339).ok()),
        session_id: record.session_id,
        agent_id: record.agent_id,
        is_sidechain: record.is_sidechain,
        model,
        stop_reason,
        usage,
        thinking_level: record
            .thinking_metadata
            .and_then(|metadata| non_empty(metadata.level)),
        blocks,
    }))
}

impl From<RecordUsage> for Usage {
    fn from(value: RecordUsage) -> Self {
        Self {
            input_tokens: value.input_tokens,
            output_tokens: value.output_tokens,
            cache_read_input_tokens: value.cache_read_input_tokens,
            cache_creation_input_tokens: value.cache_creation_input_tokens,
        }
    }
}

fn parse_content_blocks(content: &Value) -> Vec<ContentBlock> {
    match content {
        Value::String(text) => vec![ContentBlock::Text { text: text.clone() }],
        Value::Array(items) => items.iter().filter_map(parse_content_block).collect(),
        _ => Vec::new(),
    }
}

fn parse_content_block(block: &Value) -> Option<ContentBlock> {
    let block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match block_type {
        "text" => Some(ContentBlock::Text {
            text: string_field(block, "text"),
        }),
        "thinking" => Some(ContentBlock::Thinking {
            thinking: string_field(block, "thinking"),
        }),
        "tool_use" => Some(ContentBlock::ToolUse {
            id: block
                .get("id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            name: string_field(block, "name"),
            input: block.get("input").map(format_json).unwrap_or_default(),
        }),
        "tool_result" => Some(ContentBlock::ToolResult {
            tool_use_id: block
                .get("tool_use_id")
                .or_else(|| block.get("id"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            output: format_tool_result(block.get("content").unwrap_or(&Value::Null)),
        }),
        _ => None,
    }
}

fn string_field(block: &Value, key: &str) -> String {
    block
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn format_json(value: &Value) -> String {
    if value.is_null() {
        return String::new();
    }
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn format_tool_result(content: &Value) -> String {
    // Plain string results read better unquoted; structured results are pretty-printed.
    if let Some(text) = content.as_str() {
        return text.trim_end().to_string();
    }
    format_json(content)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}
