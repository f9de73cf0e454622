//! Anthropic-shaped provider backend (Messages API).
//!
//! Translates between the normalized conversation model and the Messages
//! wire format. Nothing outside this file knows that format.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::wire::{ChatApi, ChatMessage, ChatRequest, ChatTurn, ContentBlock, ProviderError, Role, StopReason};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AnthropicApi {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    /// Points the backend at a different host (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn wire_message(message: &ChatMessage) -> Value {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let content: Vec<Value> = message
            .content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => json!({"type": "text", "text": text}),
                ContentBlock::ToolUse { id, name, input } => {
                    json!({"type": "tool_use", "id": id, "name": name, "input": input})
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => json!({"type": "tool_result", "tool_use_id": tool_use_id, "content": content}),
            })
            .collect();
        json!({"role": role, "content": content})
    }

    fn parse_content(content: &[Value]) -> Result<Vec<ContentBlock>, ProviderError> {
        content
            .iter()
            .filter_map(|block| match block.get("type").and_then(Value::as_str) {
                Some("text") => Some(
                    block
                        .get("text")
                        .and_then(Value::as_str)
                        .map(|text| ContentBlock::Text {
                            text: text.to_string(),
                        })
                        .ok_or_else(|| ProviderError::Decode("text block without text".into())),
                ),
                Some("tool_use") => Some(
                    match (
                        block.get("id").and_then(Value::as_str),
                        block.get("name").and_then(Value::as_str),
                    ) {
                        (Some(id), Some(name)) => Ok(ContentBlock::ToolUse {
                            id: id.to_string(),
                            name: name.to_string(),
                            input: block.get("input").cloned().unwrap_or(json!({})),
                        }),
                        _ => Err(ProviderError::Decode("tool_use block missing id/name".into())),
                    },
                ),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatApi for AnthropicApi {
    fn provider(&self) -> &str {
        "anthropic"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatTurn, ProviderError> {
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": request.messages.iter().map(Self::wire_message).collect::<Vec<_>>(),
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "name": tool.name,
                            "description": tool.description,
                            "input_schema": tool.input_schema,
                        })
                    })
                    .collect(),
            );
        }

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        if status.as_u16() == 429 || status.as_u16() == 529 {
            return Err(ProviderError::RateLimited(
                payload["error"]["message"]
                    .as_str()
                    .unwrap_or("rate limited")
                    .to_string(),
            ));
        }
        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: payload["error"]["message"]
                    .as_str()
                    .unwrap_or("request failed")
                    .to_string(),
            });
        }

        let content = Self::parse_content(
            payload
                .get("content")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
        )?;
        let stop_reason = match payload.get("stop_reason").and_then(Value::as_str) {
            Some("end_turn") => StopReason::EndTurn,
            Some("tool_use") => StopReason::ToolUse,
            Some("max_tokens") => StopReason::MaxTokens,
            _ => StopReason::Other,
        };
        Ok(ChatTurn {
            content,
            stop_reason,
            input_tokens: payload["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: payload["usage"]["output_tokens"].as_u64().unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: message translation matches the Messages wire shape.
    #[test]
    fn wire_message_shapes() {
        let msg = ChatMessage::tool_results(vec![ContentBlock::ToolResult {
            tool_use_id: "tu_1".into(),
            name: "read_file".into(),
            content: "hello".into(),
        }]);
        let wire = AnthropicApi::wire_message(&msg);
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"][0]["type"], "tool_result");
        assert_eq!(wire["content"][0]["tool_use_id"], "tu_1");
        // The internal `name` field stays internal.
        assert!(wire["content"][0].get("name").is_none());
    }

    /// **Scenario**: response blocks parse into normalized content.
    #[test]
    fn parse_content_blocks() {
        let blocks = vec![
            json!({"type": "text", "text": "running"}),
            json!({"type": "tool_use", "id": "tu_9", "name": "run_command", "input": {"command": "pytest"}}),
        ];
        let parsed = AnthropicApi::parse_content(&blocks).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(matches!(&parsed[1], ContentBlock::ToolUse { name, .. } if name == "run_command"));
    }
}
