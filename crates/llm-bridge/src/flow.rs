//! The stateless tool-call orchestration loop.
//!
//! Each round submits the **entire** conversation — no provider-side
//! response id is ever relied upon, so the loop works against
//! zero-data-retention deployments. A round runs: submit → inspect the
//! response → execute any tool calls → append their outputs → resubmit.
//! The loop ends when a response carries no tool calls, when the round
//! limit is hit, or when an error or cancellation interrupts it.
//!
//! Handler errors never fail a round: they are serialized as an
//! `{"error": "<message>"}` tool output so the model can recover.
//! A tool call with no matching handler is fatal.

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::chat::{ChatBackend, ChatRequest, ChatTurn, HistoryItem};
use crate::error::LlmError;
use crate::metadata::UsageTotals;
use crate::tool::{canonical_arguments, normalize_call_name, ToolSet};

/// Upper bound on tool rounds per generation.
pub const MAX_TOOL_ROUNDS: usize = 12;

/// Drives `backend` until the model stops calling tools.
///
/// `request.items` seeds the history; tool specs and knobs on `request`
/// are resent unchanged every round. Usage is folded into `totals` as
/// each response arrives, so the caller keeps partial accounting even
/// when the loop fails midway.
///
/// The generators drive this internally; it is public for callers that
/// assemble their own requests and tool sets.
pub async fn run_chat_flow(
    backend: &dyn ChatBackend,
    request: &ChatRequest,
    tools: &ToolSet,
    cancel: &CancellationToken,
    totals: &mut UsageTotals,
) -> Result<ChatTurn, LlmError> {
    let mut history = request.items.clone();

    for round in 0..MAX_TOOL_ROUNDS {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }

        let round_request = ChatRequest {
            items: history.clone(),
            ..request.clone()
        };
        let turn = backend.submit(&round_request, cancel).await?;
        totals.record(&turn.usage);

        for item in &turn.items {
            history.push(item.to_history());
        }

        let calls: Vec<_> = turn.tool_calls().into_iter().cloned().collect();
        if calls.is_empty() {
            debug!(rounds = round, api_calls = totals.api_calls, "flow complete");
            return Ok(turn);
        }
        totals.tool_rounds = u32::try_from(round + 1).unwrap_or(u32::MAX);

        info!(
            round = round + 1,
            calls = calls.len(),
            history_items = history.len(),
            "executing tool round"
        );

        for call in calls {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            let handler = tools.handler(&call.name).ok_or_else(|| {
                LlmError::ToolMissingHandler {
                    name: normalize_call_name(&call.name).to_string(),
                }
            })?;

            let arguments = canonical_arguments(&call.arguments);
            let output = match handler.call(cancel, arguments).await {
                Ok(value) => value,
                Err(e) => {
                    debug!(tool = %call.name, error = %e.message, "tool handler errored");
                    json!({"error": e.message})
                }
            };
            let output_text =
                serde_json::to_string(&output).map_err(|e| LlmError::ProviderCallFailed {
                    status: None,
                    message: format!("encoding output of tool {:?}: {e}", call.name),
                })?;

            history.push(HistoryItem::ToolOutput {
                call_id: call.call_id,
                output: output_text,
            });
        }
    }

    Err(LlmError::ToolLoopLimitExceeded {
        limit: MAX_TOOL_ROUNDS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ContextRole, OutputItem, ToolCallRecord};
    use crate::mock::{text_turn, tool_call_turn, usage, MockBackend};
    use crate::tool::{tool_fn, Tool};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn prompt_request(prompt: &str) -> ChatRequest {
        ChatRequest {
            items: vec![HistoryItem::Message {
                role: ContextRole::Human,
                content: prompt.into(),
            }],
            ..Default::default()
        }
    }

    fn secret_tool(counter: Arc<AtomicUsize>) -> Tool {
        Tool {
            name: "get_secret".into(),
            description: None,
            input_schema: None,
            handler: tool_fn(move |_cancel, _args| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"secret": "abc"}))
                }
            }),
        }
    }

    #[tokio::test]
    async fn test_no_tools_single_round() {
        let backend = MockBackend::new();
        backend.queue_turn(text_turn("I'm well, thank you."));
        let mut totals = UsageTotals::default();

        let turn = run_chat_flow(
            &backend,
            &prompt_request("How are you today?"),
            &ToolSet::empty(),
            &CancellationToken::new(),
            &mut totals,
        )
        .await
        .unwrap();

        assert_eq!(turn.text(), "I'm well, thank you.");
        assert_eq!(totals.api_calls, 1);
        assert_eq!(totals.tool_rounds, 0);
    }

    #[tokio::test]
    async fn test_single_tool_round() {
        let backend = MockBackend::new();
        backend.queue_turn(tool_call_turn("call_1", "get_secret", json!({})));
        backend.queue_turn(text_turn("abc"));

        let counter = Arc::new(AtomicUsize::new(0));
        let tools = ToolSet::assemble(&[secret_tool(Arc::clone(&counter))], &[]).unwrap();
        let mut totals = UsageTotals::default();

        let turn = run_chat_flow(
            &backend,
            &prompt_request("Use the get_secret tool and echo its result."),
            &tools,
            &CancellationToken::new(),
            &mut totals,
        )
        .await
        .unwrap();

        assert_eq!(turn.text(), "abc");
        assert_eq!(totals.api_calls, 2);
        assert_eq!(totals.tool_rounds, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tool_output_round_trips_exact_json() {
        let backend = MockBackend::new();
        backend.queue_turn(tool_call_turn("call_1", "get_secret", json!({})));
        backend.queue_turn(text_turn("done"));

        let counter = Arc::new(AtomicUsize::new(0));
        let tools = ToolSet::assemble(&[secret_tool(counter)], &[]).unwrap();
        let mut totals = UsageTotals::default();

        run_chat_flow(
            &backend,
            &prompt_request("go"),
            &tools,
            &CancellationToken::new(),
            &mut totals,
        )
        .await
        .unwrap();

        let second = &backend.recorded_requests()[1];
        let output = second
            .items
            .iter()
            .find_map(|item| match item {
                HistoryItem::ToolOutput { call_id, output } if call_id == "call_1" => {
                    Some(output.clone())
                }
                _ => None,
            })
            .expect("tool output present in follow-up history");
        let decoded: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(decoded, json!({"secret": "abc"}));
    }

    #[tokio::test]
    async fn test_history_replays_assistant_and_calls() {
        let backend = MockBackend::new();
        backend.queue_turn(ChatTurn {
            items: vec![
                OutputItem::Message {
                    text: "let me check".into(),
                    raw: None,
                },
                OutputItem::ToolCall(ToolCallRecord {
                    call_id: "c1".into(),
                    name: "get_secret".into(),
                    arguments: json!({}),
                    raw: None,
                }),
            ],
            usage: usage(10, 5),
            ..Default::default()
        });
        backend.queue_turn(text_turn("done"));

        let counter = Arc::new(AtomicUsize::new(0));
        let tools = ToolSet::assemble(&[secret_tool(counter)], &[]).unwrap();
        let mut totals = UsageTotals::default();

        run_chat_flow(
            &backend,
            &prompt_request("go"),
            &tools,
            &CancellationToken::new(),
            &mut totals,
        )
        .await
        .unwrap();

        let second = &backend.recorded_requests()[1];
        // prompt, assistant text, tool call, tool output
        assert_eq!(second.items.len(), 4);
        assert!(matches!(
            second.items[1],
            HistoryItem::Message {
                role: ContextRole::Assistant,
                ..
            }
        ));
        assert!(matches!(second.items[2], HistoryItem::ToolCall(_)));
        assert!(matches!(second.items[3], HistoryItem::ToolOutput { .. }));
    }

    #[tokio::test]
    async fn test_opaque_items_survive_into_history() {
        let reasoning = json!({"type": "reasoning", "encrypted_content": "opaque-bytes"});
        let backend = MockBackend::new();
        backend.queue_turn(ChatTurn {
            items: vec![
                OutputItem::Opaque(reasoning.clone()),
                OutputItem::ToolCall(ToolCallRecord {
                    call_id: "c1".into(),
                    name: "get_secret".into(),
                    arguments: json!({}),
                    raw: None,
                }),
            ],
            usage: usage(10, 5),
            ..Default::default()
        });
        backend.queue_turn(text_turn("done"));

        let counter = Arc::new(AtomicUsize::new(0));
        let tools = ToolSet::assemble(&[secret_tool(counter)], &[]).unwrap();
        let mut totals = UsageTotals::default();

        run_chat_flow(
            &backend,
            &prompt_request("go"),
            &tools,
            &CancellationToken::new(),
            &mut totals,
        )
        .await
        .unwrap();

        let second = &backend.recorded_requests()[1];
        assert!(second
            .items
            .iter()
            .any(|item| *item == HistoryItem::Opaque(reasoning.clone())));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_payload() {
        let backend = MockBackend::new();
        backend.queue_turn(tool_call_turn("call_1", "flaky", json!({})));
        backend.queue_turn(text_turn("recovered"));

        let flaky = Tool {
            name: "flaky".into(),
            description: None,
            input_schema: None,
            handler: tool_fn(|_cancel, _args| async {
                Err(crate::tool::ToolError::new("downstream unavailable"))
            }),
        };
        let tools = ToolSet::assemble(&[flaky], &[]).unwrap();
        let mut totals = UsageTotals::default();

        let turn = run_chat_flow(
            &backend,
            &prompt_request("go"),
            &tools,
            &CancellationToken::new(),
            &mut totals,
        )
        .await
        .unwrap();

        assert_eq!(turn.text(), "recovered");
        let second = &backend.recorded_requests()[1];
        let output = second
            .items
            .iter()
            .find_map(|item| match item {
                HistoryItem::ToolOutput { output, .. } => Some(output.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&output).unwrap(),
            json!({"error": "downstream unavailable"})
        );
    }

    #[tokio::test]
    async fn test_missing_handler_is_fatal() {
        let backend = MockBackend::new();
        backend.queue_turn(tool_call_turn("call_1", "nonexistent", json!({})));
        let mut totals = UsageTotals::default();

        let err = run_chat_flow(
            &backend,
            &prompt_request("go"),
            &ToolSet::empty(),
            &CancellationToken::new(),
            &mut totals,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            LlmError::ToolMissingHandler { ref name } if name == "nonexistent"
        ));
        assert_eq!(totals.api_calls, 1);
    }

    #[tokio::test]
    async fn test_prefixed_call_names_resolve() {
        let backend = MockBackend::new();
        backend.queue_turn(tool_call_turn("call_1", "functions.get_secret", json!({})));
        backend.queue_turn(text_turn("done"));

        let counter = Arc::new(AtomicUsize::new(0));
        let tools = ToolSet::assemble(&[secret_tool(Arc::clone(&counter))], &[]).unwrap();
        let mut totals = UsageTotals::default();

        run_chat_flow(
            &backend,
            &prompt_request("go"),
            &tools,
            &CancellationToken::new(),
            &mut totals,
        )
        .await
        .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_string_arguments_are_canonicalized() {
        let backend = MockBackend::new();
        backend.queue_turn(tool_call_turn(
            "call_1",
            "echo",
            Value::String(r#"{"patient": "42"}"#.into()),
        ));
        backend.queue_turn(text_turn("done"));

        let seen = Arc::new(std::sync::Mutex::new(Value::Null));
        let seen_clone = Arc::clone(&seen);
        let echo = Tool {
            name: "echo".into(),
            description: None,
            input_schema: None,
            handler: tool_fn(move |_cancel, args| {
                let seen = Arc::clone(&seen_clone);
                async move {
                    *seen.lock().unwrap() = args.clone();
                    Ok(args)
                }
            }),
        };
        let tools = ToolSet::assemble(&[echo], &[]).unwrap();
        let mut totals = UsageTotals::default();

        run_chat_flow(
            &backend,
            &prompt_request("go"),
            &tools,
            &CancellationToken::new(),
            &mut totals,
        )
        .await
        .unwrap();
        assert_eq!(*seen.lock().unwrap(), json!({"patient": "42"}));
    }

    #[tokio::test]
    async fn test_loop_limit_exceeded_after_twelve_rounds() {
        let backend = MockBackend::new();
        backend.set_default_turn(tool_call_turn("call_n", "get_secret", json!({})));

        let counter = Arc::new(AtomicUsize::new(0));
        let tools = ToolSet::assemble(&[secret_tool(Arc::clone(&counter))], &[]).unwrap();
        let mut totals = UsageTotals::default();

        let err = run_chat_flow(
            &backend,
            &prompt_request("go"),
            &tools,
            &CancellationToken::new(),
            &mut totals,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, LlmError::ToolLoopLimitExceeded { limit: 12 }));
        assert_eq!(totals.tool_rounds, 12);
        assert_eq!(totals.api_calls, 12);
        assert_eq!(counter.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_submit() {
        let backend = MockBackend::new();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        backend.queue_turn(tool_call_turn("call_1", "trip", json!({})));
        backend.queue_turn(text_turn("never reached"));

        let trip = Tool {
            name: "trip".into(),
            description: None,
            input_schema: None,
            handler: tool_fn(move |_cancel, _args| {
                let cancel = cancel_clone.clone();
                async move {
                    cancel.cancel();
                    Ok(json!({}))
                }
            }),
        };
        let tools = ToolSet::assemble(&[trip], &[]).unwrap();
        let mut totals = UsageTotals::default();

        let err = run_chat_flow(
            &backend,
            &prompt_request("go"),
            &tools,
            &cancel,
            &mut totals,
        )
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(totals.api_calls, 1);
        assert_eq!(backend.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_usage_accumulates_across_rounds() {
        let backend = MockBackend::new();
        backend.queue_turn(ChatTurn {
            usage: usage(100, 20),
            ..tool_call_turn("c1", "get_secret", json!({}))
        });
        backend.queue_turn(ChatTurn {
            usage: usage(150, 30),
            ..text_turn("done")
        });

        let counter = Arc::new(AtomicUsize::new(0));
        let tools = ToolSet::assemble(&[secret_tool(counter)], &[]).unwrap();
        let mut totals = UsageTotals::default();

        run_chat_flow(
            &backend,
            &prompt_request("go"),
            &tools,
            &CancellationToken::new(),
            &mut totals,
        )
        .await
        .unwrap();

        assert_eq!(totals.input_tokens, 250);
        assert_eq!(totals.output_tokens, 50);
        assert_eq!(totals.api_calls, 2);
    }

    #[tokio::test]
    async fn test_tool_outputs_follow_call_order() {
        let backend = MockBackend::new();
        backend.queue_turn(ChatTurn {
            items: vec![
                OutputItem::ToolCall(ToolCallRecord {
                    call_id: "c-first".into(),
                    name: "first".into(),
                    arguments: json!({}),
                    raw: None,
                }),
                OutputItem::ToolCall(ToolCallRecord {
                    call_id: "c-second".into(),
                    name: "second".into(),
                    arguments: json!({}),
                    raw: None,
                }),
            ],
            usage: usage(1, 1),
            ..Default::default()
        });
        backend.queue_turn(text_turn("done"));

        let make = |name: &str| Tool {
            name: name.into(),
            description: None,
            input_schema: None,
            handler: tool_fn(|_c, _a| async { Ok(json!("ok")) }),
        };
        let tools = ToolSet::assemble(&[make("first"), make("second")], &[]).unwrap();
        let mut totals = UsageTotals::default();

        run_chat_flow(
            &backend,
            &prompt_request("go"),
            &tools,
            &CancellationToken::new(),
            &mut totals,
        )
        .await
        .unwrap();

        let second = &backend.recorded_requests()[1];
        let ids: Vec<&str> = second
            .items
            .iter()
            .filter_map(|item| match item {
                HistoryItem::ToolOutput { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["c-first", "c-second"]);
    }
}
