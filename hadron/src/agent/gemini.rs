//! Gemini-shaped provider backend (generateContent API).
//!
//! Gemini keys function responses by name rather than call id; the
//! normalized `ToolResult` block carries both, so the translation loses
//! nothing either way.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::wire::{ChatApi, ChatMessage, ChatRequest, ChatTurn, ContentBlock, ProviderError, Role, StopReason};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiApi {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn wire_content(message: &ChatMessage) -> Value {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "model",
        };
        let parts: Vec<Value> = message
            .content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => json!({"text": text}),
                ContentBlock::ToolUse { name, input, .. } => {
                    json!({"functionCall": {"name": name, "args": input}})
                }
                ContentBlock::ToolResult { name, content, .. } => {
                    json!({"functionResponse": {"name": name, "response": {"result": content}}})
                }
            })
            .collect();
        json!({"role": role, "parts": parts})
    }

    fn parse_parts(parts: &[Value]) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                blocks.push(ContentBlock::Text {
                    text: text.to_string(),
                });
            }
            if let Some(call) = part.get("functionCall") {
                let name = call
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                blocks.push(ContentBlock::ToolUse {
                    // Gemini has no call ids; the function name stands in.
                    id: name.clone(),
                    name,
                    input: call.get("args").cloned().unwrap_or(json!({})),
                });
            }
        }
        blocks
    }
}

#[async_trait]
impl ChatApi for GeminiApi {
    fn provider(&self) -> &str {
        "gemini"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatTurn, ProviderError> {
        let mut body = json!({
            "system_instruction": {"parts": [{"text": request.system}]},
            "contents": request.messages.iter().map(Self::wire_content).collect::<Vec<_>>(),
            "generationConfig": {
                "maxOutputTokens": request.max_tokens,
                "temperature": 0.0,
            },
        });
        if !request.tools.is_empty() {
            body["tools"] = json!([{
                "function_declarations": request.tools.iter().map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    })
                }).collect::<Vec<_>>()
            }]);
        }

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, request.model
        );
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited(
                payload["error"]["message"]
                    .as_str()
                    .unwrap_or("resource exhausted")
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

        let candidate = payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first());
        let parts = candidate
            .and_then(|c| c.pointer("/content/parts"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let content = Self::parse_parts(parts);

        let has_calls = content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }));
        let stop_reason = if has_calls {
            StopReason::ToolUse
        } else {
            match candidate
                .and_then(|c| c.get("finishReason"))
                .and_then(Value::as_str)
            {
                Some("STOP") => StopReason::EndTurn,
                Some("MAX_TOKENS") => StopReason::MaxTokens,
                _ => StopReason::Other,
            }
        };

        Ok(ChatTurn {
            content,
            stop_reason,
            input_tokens: payload["usageMetadata"]["promptTokenCount"]
                .as_u64()
                .unwrap_or(0),
            output_tokens: payload["usageMetadata"]["candidatesTokenCount"]
                .as_u64()
                .unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: tool results translate to functionResponse parts keyed by name.
    #[test]
    fn wire_content_uses_function_response() {
        let msg = ChatMessage::tool_results(vec![ContentBlock::ToolResult {
            tool_use_id: "read_file".into(),
            name: "read_file".into(),
            content: "data".into(),
        }]);
        let wire = GeminiApi::wire_content(&msg);
        assert_eq!(wire["parts"][0]["functionResponse"]["name"], "read_file");
        assert_eq!(
            wire["parts"][0]["functionResponse"]["response"]["result"],
            "data"
        );
    }

    /// **Scenario**: candidates with functionCall parts produce ToolUse blocks.
    #[test]
    fn parse_parts_extracts_calls() {
        let parts = vec![
            json!({"text": "let me check"}),
            json!({"functionCall": {"name": "list_directory", "args": {"path": "."}}}),
        ];
        let blocks = GeminiApi::parse_parts(&parts);
        assert_eq!(blocks.len(), 2);
        assert!(matches!(
            &blocks[1],
            ContentBlock::ToolUse { name, .. } if name == "list_directory"
        ));
    }
}
