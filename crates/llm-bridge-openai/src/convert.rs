//! Translation between the core's neutral shapes and the Responses API.

use llm_bridge::{
    ChatRequest, ChatTurn, ContextRole, HistoryItem, LlmError, OutputItem, ReasoningLevel,
    TokenUsage, ToolCallRecord,
};
use serde_json::{json, Map, Value};

use crate::types::ResponsesApiResponse;

/// Neutral role → Responses API role. Unknown roles never reach this
/// point (the neutral set is closed), so the mapping is total.
pub(crate) fn wire_role(role: ContextRole) -> &'static str {
    match role {
        ContextRole::System => "system",
        ContextRole::Human => "user",
        ContextRole::Assistant => "assistant",
    }
}

fn reasoning_effort(level: ReasoningLevel) -> &'static str {
    level.as_str()
}

fn tool_call_to_wire(record: &ToolCallRecord) -> Value {
    if let Some(raw) = &record.raw {
        return raw.clone();
    }
    let arguments = match &record.arguments {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    json!({
        "type": "function_call",
        "call_id": record.call_id,
        "name": record.name,
        "arguments": arguments,
    })
}

fn history_item_to_wire(item: &HistoryItem) -> Value {
    match item {
        HistoryItem::Message { role, content } => json!({
            "type": "message",
            "role": wire_role(*role),
            "content": content,
        }),
        HistoryItem::ToolCall(record) => tool_call_to_wire(record),
        HistoryItem::ToolOutput { call_id, output } => json!({
            "type": "function_call_output",
            "call_id": call_id,
            "output": output,
        }),
        HistoryItem::Opaque(value) => value.clone(),
    }
}

/// Builds the Responses API request body for one round.
///
/// `store: false` keeps the deployment zero-data-retention friendly;
/// the loop resends the whole conversation anyway.
pub(crate) fn build_request(request: &ChatRequest, model: &str) -> Value {
    let input: Vec<Value> = request.items.iter().map(history_item_to_wire).collect();

    let mut body = Map::new();
    body.insert("model".into(), json!(model));
    body.insert("input".into(), json!(input));
    body.insert("store".into(), json!(false));

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                let mut entry = Map::new();
                entry.insert("type".into(), json!("function"));
                entry.insert("name".into(), json!(tool.name));
                entry.insert("parameters".into(), tool.input_schema.clone());
                entry.insert("strict".into(), json!(true));
                if let Some(description) = &tool.description {
                    entry.insert("description".into(), json!(description));
                }
                Value::Object(entry)
            })
            .collect();
        body.insert("tools".into(), json!(tools));
    }

    if let Some(temperature) = request.temperature {
        body.insert("temperature".into(), json!(temperature));
    }
    if let Some(max_tokens) = request.max_tokens {
        body.insert("max_output_tokens".into(), json!(max_tokens));
    }
    if let Some(level) = request.reasoning_level {
        body.insert("reasoning".into(), json!({"effort": reasoning_effort(level)}));
    }
    if let Some(schema) = &request.response_schema {
        body.insert(
            "text".into(),
            json!({
                "format": {
                    "type": "json_schema",
                    "name": "structured_output",
                    "schema": schema,
                    "strict": true,
                }
            }),
        );
    }
    if request.include_reasoning_state {
        body.insert("include".into(), json!(["reasoning.encrypted_content"]));
    }

    Value::Object(body)
}

fn message_text(item: &Value) -> String {
    let mut text = String::new();
    for part in item.get("content").and_then(Value::as_array).into_iter().flatten() {
        if part.get("type").and_then(Value::as_str) == Some("output_text") {
            if let Some(chunk) = part.get("text").and_then(Value::as_str) {
                text.push_str(chunk);
            }
        }
    }
    text
}

/// Maps one Responses API output item into the neutral shape.
fn output_item(item: Value) -> OutputItem {
    match item.get("type").and_then(Value::as_str) {
        Some("message") => OutputItem::Message {
            text: message_text(&item),
            raw: Some(item),
        },
        Some("function_call") => {
            let call_id = item
                .get("call_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let name = item
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let arguments = item.get("arguments").cloned().unwrap_or(Value::Null);
            OutputItem::ToolCall(ToolCallRecord {
                call_id,
                name,
                arguments,
                raw: Some(item),
            })
        }
        _ => OutputItem::Opaque(item),
    }
}

/// Converts an API response into a neutral [`ChatTurn`].
///
/// Function-call items missing a call id or a name are dropped (the
/// orchestrator could neither execute nor answer them).
pub(crate) fn convert_response(response: ResponsesApiResponse) -> ChatTurn {
    let items = response
        .output
        .into_iter()
        .map(output_item)
        .filter(|item| match item {
            OutputItem::ToolCall(record) => !record.call_id.is_empty() && !record.name.is_empty(),
            _ => true,
        })
        .collect();

    ChatTurn {
        items,
        usage: TokenUsage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            total_tokens: response.usage.total_tokens,
            cached_input_tokens: response.usage.input_tokens_details.cached_tokens,
            reasoning_tokens: response.usage.output_tokens_details.reasoning_tokens,
        },
        response_id: response.id,
        response_status: response.status,
    }
}

/// Maps a non-success HTTP response into [`LlmError::ProviderCallFailed`],
/// preserving the provider's error text when the body carries one.
pub(crate) fn convert_error(status: http::StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string());
    LlmError::ProviderCallFailed {
        status: Some(status),
        message: if message.is_empty() {
            "provider returned an error".to_string()
        } else {
            message
        },
    }
}
