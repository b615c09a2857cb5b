use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::llm::{ChatRole, LanguageModel, LlmError, Message, ModelResponse, ToolCallRequest};
use crate::tools::ToolDescriptor;

const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Local Ollama `/api/chat` backend for keyless development setups.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    max_retries: u32,
}

impl OllamaClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            max_retries,
        })
    }

    async fn post_with_retries(&self, body: &Value) -> Result<Value, LlmError> {
        let url = format!("{}/api/chat", self.base_url);

        let mut attempt = 0;
        loop {
            let result = self.http.post(&url).json(body).send().await;

            match result {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<Value>()
                        .await
                        .map_err(|err| LlmError::Protocol(err.to_string()));
                }
                Ok(response) => {
                    let status = response.status();
                    if status.is_client_error() {
                        let detail = response.text().await.unwrap_or_default();
                        return Err(LlmError::Protocol(format!("ollama {status}: {detail}")));
                    }
                    warn!(status = %status, attempt, "ollama server error");
                }
                Err(err) => {
                    warn!(error = %err, attempt, "ollama transport error");
                }
            }

            attempt += 1;
            if attempt > self.max_retries {
                return Err(LlmError::Exhausted);
            }
            tokio::time::sleep(RETRY_BACKOFF).await;
        }
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ModelResponse, LlmError> {
        let body = request_body(&self.model, system_prompt, messages, tools);
        debug!(model = %self.model, turns = messages.len(), "ollama request");

        let response = self.post_with_retries(&body).await?;
        parse_response(&response)
    }
}

fn request_body(
    model: &str,
    system_prompt: &str,
    messages: &[Message],
    tools: &[ToolDescriptor],
) -> Value {
    let mut chat: Vec<Value> = vec![json!({ "role": "system", "content": system_prompt })];
    chat.extend(messages.iter().map(|message| {
        let role = match message.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        };
        json!({ "role": role, "content": message.content })
    }));

    let mut body = json!({
        "model": model,
        "messages": chat,
        "stream": false,
    });

    if !tools.is_empty() {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(declarations);
    }

    body
}

fn parse_response(response: &Value) -> Result<ModelResponse, LlmError> {
    let message = response
        .get("message")
        .ok_or_else(|| LlmError::Protocol("response carries no message".to_string()))?;

    if let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) {
        let mut calls = Vec::new();
        for call in tool_calls {
            let function = call
                .get("function")
                .ok_or_else(|| LlmError::Protocol("tool call without function".to_string()))?;
            let name = function
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| LlmError::Protocol("tool call without name".to_string()))?;
            let arguments = function.get("arguments").cloned().unwrap_or_else(|| json!({}));
            calls.push(ToolCallRequest { name: name.to_string(), arguments });
        }
        if !calls.is_empty() {
            return Ok(ModelResponse::ToolCalls(calls));
        }
    }

    let content = message.get("content").and_then(Value::as_str).unwrap_or_default();
    if content.trim().is_empty() {
        return Err(LlmError::Protocol("message carried neither text nor calls".to_string()));
    }
    Ok(ModelResponse::Reply(content.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_response, request_body};
    use crate::llm::{Message, ModelResponse};

    #[test]
    fn tool_calls_parse_ahead_of_content() {
        let response = json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{
                    "function": { "name": "search_products", "arguments": { "query": "milk" } }
                }],
            }
        });

        match parse_response(&response).expect("parse") {
            ModelResponse::ToolCalls(calls) => {
                assert_eq!(calls[0].name, "search_products");
                assert_eq!(calls[0].arguments["query"], "milk");
            }
            ModelResponse::Reply(_) => panic!("expected tool calls"),
        }
    }

    #[test]
    fn plain_content_becomes_a_reply() {
        let response = json!({ "message": { "role": "assistant", "content": "selam!" } });
        assert_eq!(
            parse_response(&response).expect("parse"),
            ModelResponse::Reply("selam!".to_string())
        );
    }

    #[test]
    fn request_prepends_the_system_prompt() {
        let body = request_body("llama3.2", "You are Kcart.", &[Message::user("hi")], &[]);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["stream"], false);
        assert!(body.get("tools").is_none());
    }
}
