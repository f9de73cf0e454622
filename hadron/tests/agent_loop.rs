//! Agent tool-use loop tests against a scripted provider: rounds, tool
//! feedback, nudges, rate-limit retry, and three-phase execution.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use hadron::agent::mock::MockChatApi;
use hadron::agent::{
    AgentBackend, AgentEvent, AgentTask, ContentBlock, Role, ToolUseAgent,
};
use hadron::config::{model_cost, DEFAULT_MODEL_COST};
use hadron::error::HadronError;

fn agent(api: Arc<MockChatApi>) -> ToolUseAgent {
    ToolUseAgent::new(api).with_rate_limit_base(Duration::ZERO)
}

fn task() -> AgentTask {
    AgentTask::new("code_writer", "system", "do the thing").with_model("test-model")
}

/// Event recorder wired into a task's on_event callback.
fn record_events(task: AgentTask) -> (AgentTask, Arc<Mutex<Vec<AgentEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let task = task.with_on_event(Arc::new(move |event| {
        let sink = sink.clone();
        Box::pin(async move {
            sink.lock().unwrap().push(event);
        })
    }));
    (task, events)
}

/// **Scenario**: a text-only reply ends the loop after one round with
/// bookkept usage and default-rate cost.
#[tokio::test]
async fn single_round_text_reply() {
    let api = Arc::new(MockChatApi::new("anthropic"));
    api.push_turn(MockChatApi::text_turn("all done"));

    let result = agent(api.clone()).execute(task()).await.unwrap();
    assert_eq!(result.output, "all done");
    assert_eq!(result.round_count, 1);
    assert_eq!(result.input_tokens, 100);
    assert_eq!(result.output_tokens, 50);
    let (rate_in, rate_out) = DEFAULT_MODEL_COST;
    let expected = (100.0 * rate_in + 50.0 * rate_out) / 1e6;
    assert!((result.cost_usd - expected).abs() < 1e-12);
    assert_eq!(api.requests().len(), 1);
}

/// **Scenario**: a tool round executes the tool and feeds its result back
/// into the next request.
#[tokio::test]
async fn tool_round_feeds_result_back() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "remember the milk").unwrap();

    let api = Arc::new(MockChatApi::new("anthropic"));
    api.push_turn(MockChatApi::tool_turn("read_file", json!({"path": "notes.txt"})));
    api.push_turn(MockChatApi::text_turn("read it"));

    let task = task().with_working_directory(dir.path());
    let result = agent(api.clone()).execute(task).await.unwrap();

    assert_eq!(result.output, "read it");
    assert_eq!(result.round_count, 2);
    assert_eq!(result.tool_calls.len(), 1);
    assert_eq!(result.tool_calls[0].name, "read_file");

    // Second request carries assistant turn + tool result.
    let requests = api.requests();
    assert_eq!(requests.len(), 2);
    let messages = &requests[1].messages;
    assert_eq!(messages[1].role, Role::Assistant);
    let has_result = messages[2].content.iter().any(|block| {
        matches!(block, ContentBlock::ToolResult { content, .. } if content == "remember the milk")
    });
    assert!(has_result, "tool result should be fed back: {messages:?}");

    // The serialized conversation records the full exchange.
    assert_eq!(result.conversation.len(), 3);
}

/// **Scenario**: a tool outside the allowed set is refused with an error
/// string, not executed.
#[tokio::test]
async fn disallowed_tool_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(MockChatApi::new("anthropic"));
    api.push_turn(MockChatApi::tool_turn("run_command", json!({"command": "id"})));
    api.push_turn(MockChatApi::text_turn("fine"));

    let task = task()
        .with_working_directory(dir.path())
        .with_allowed_tools(vec!["read_file".to_string()]);
    let result = agent(api.clone()).execute(task).await.unwrap();

    let messages = &api.requests()[1].messages;
    let refused = messages[2].content.iter().any(|block| {
        matches!(block, ContentBlock::ToolResult { content, .. }
            if content == "Error: tool not allowed: run_command")
    });
    assert!(refused);
    assert_eq!(result.round_count, 2);
}

/// **Scenario**: a nudge polled between rounds is appended as a user
/// message and surfaced as an event.
#[tokio::test]
async fn nudge_is_injected_between_rounds() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(MockChatApi::new("anthropic"));
    // Tool round with stop_reason ToolUse keeps the loop going.
    api.push_turn(MockChatApi::tool_turn("list_directory", json!({})));
    api.push_turn(MockChatApi::text_turn("done"));

    let nudges = Arc::new(Mutex::new(vec!["focus on the API module".to_string()]));
    let source = nudges.clone();
    let (task, events) = record_events(
        task()
            .with_working_directory(dir.path())
            .with_nudge_poll(Arc::new(move || {
                let source = source.clone();
                Box::pin(async move { source.lock().unwrap().pop() })
            })),
    );

    agent(api.clone()).execute(task).await.unwrap();

    let second_request = &api.requests()[1];
    let nudged = second_request.messages.iter().any(|m| {
        m.role == Role::User
            && m.content.iter().any(|block| {
                matches!(block, ContentBlock::Text { text } if text == "focus on the API module")
            })
    });
    assert!(nudged, "nudge should be appended as a user message");
    let saw_nudge_event = events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, AgentEvent::Nudge { text } if text == "focus on the API module"));
    assert!(saw_nudge_event);
}

/// **Scenario**: rate limits retry with backoff and then succeed.
#[tokio::test]
async fn rate_limit_retries_then_succeeds() {
    let api = Arc::new(MockChatApi::new("anthropic"));
    api.push_rate_limited();
    api.push_rate_limited();
    api.push_turn(MockChatApi::text_turn("eventually"));

    let result = agent(api.clone()).execute(task()).await.unwrap();
    assert_eq!(result.output, "eventually");
    assert_eq!(api.requests().len(), 3);
}

/// **Scenario**: five rate limits exhaust the retry budget and propagate.
#[tokio::test]
async fn rate_limit_exhaustion_propagates() {
    let api = Arc::new(MockChatApi::new("anthropic"));
    for _ in 0..5 {
        api.push_rate_limited();
    }
    let err = agent(api.clone()).execute(task()).await.unwrap_err();
    assert!(matches!(err, HadronError::RateLimitExhausted { .. }));
    assert_eq!(api.requests().len(), 5);
}

/// **Scenario**: non-rate-limit provider errors propagate immediately.
#[tokio::test]
async fn provider_error_propagates() {
    let api = Arc::new(MockChatApi::new("anthropic"));
    api.push_error("boom");
    let err = agent(api).execute(task()).await.unwrap_err();
    assert!(matches!(err, HadronError::Provider { .. }));
}

/// **Scenario**: three-phase execution restricts Explore to read-only
/// tools, runs Plan tool-less, composes the Act prompt, and sums per-phase
/// costs under each phase's own model.
#[tokio::test]
async fn three_phase_costs_are_additive_per_model() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(MockChatApi::new("anthropic"));
    api.push_turn(MockChatApi::text_turn("repo has one module")); // explore
    api.push_turn(MockChatApi::text_turn("1. edit lib 2. test")); // plan
    api.push_turn(MockChatApi::text_turn("implemented")); // act

    let (task, events) = record_events(
        AgentTask::new("code_writer", "system", "add the endpoint")
            .with_model("claude-3-5-sonnet-20240620")
            .with_working_directory(dir.path())
            .with_phases(
                Some("gemini-1.5-flash".to_string()),
                Some("claude-3-haiku-20240307".to_string()),
            ),
    );

    let result = agent(api.clone()).execute(task).await.unwrap();

    let requests = api.requests();
    assert_eq!(requests.len(), 3);

    // Explore: its own model, read-only tools only.
    assert_eq!(requests[0].model, "gemini-1.5-flash");
    let explore_tools: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(explore_tools, vec!["read_file", "list_directory"]);

    // Plan: tool-less under its own model.
    assert_eq!(requests[1].model, "claude-3-haiku-20240307");
    assert!(requests[1].tools.is_empty());

    // Act: original model and tool set; prompt composed from plan + summary + task.
    assert_eq!(requests[2].model, "claude-3-5-sonnet-20240620");
    assert_eq!(requests[2].tools.len(), 4);
    let act_prompt = match &requests[2].messages[0].content[0] {
        ContentBlock::Text { text } => text.clone(),
        other => panic!("expected text prompt, got {other:?}"),
    };
    assert!(act_prompt.contains("# Implementation Plan"));
    assert!(act_prompt.contains("# Exploration Summary"));
    assert!(act_prompt.contains("add the endpoint"));

    // Per-phase cost, each with its own rate table.
    let expected: f64 = [
        model_cost("gemini-1.5-flash"),
        model_cost("claude-3-haiku-20240307"),
        model_cost("claude-3-5-sonnet-20240620"),
    ]
    .iter()
    .map(|(rate_in, rate_out)| (100.0 * rate_in + 50.0 * rate_out) / 1e6)
    .sum();
    assert!((result.cost_usd - expected).abs() < 1e-12);
    assert_eq!(result.round_count, 3);
    assert_eq!(result.input_tokens, 300);

    // Phase events bracket all three phases.
    let events = events.lock().unwrap();
    let started: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::PhaseStarted { phase, .. } => Some(phase.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["explore", "plan", "act"]);
    let completed = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::PhaseCompleted { .. }))
        .count();
    assert_eq!(completed, 3);
}
