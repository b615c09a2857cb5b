use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::llm::{ChatRole, LanguageModel, LlmError, Message, ModelResponse, ToolCallRequest};
use crate::tools::ToolDescriptor;

const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Gemini `generateContent` backend with function calling.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    max_retries: u32,
}

impl GeminiClient {
    pub fn new(
        api_key: SecretString,
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
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: model.into(),
            max_retries,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn post_with_retries(&self, body: &Value) -> Result<Value, LlmError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url,
            self.model,
            self.api_key.expose_secret()
        );

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
                    // Client errors will not improve on retry.
                    if status.is_client_error() {
                        let detail = response.text().await.unwrap_or_default();
                        return Err(LlmError::Protocol(format!("gemini {status}: {detail}")));
                    }
                    warn!(status = %status, attempt, "gemini server error");
                }
                Err(err) => {
                    warn!(error = %err, attempt, "gemini transport error");
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
impl LanguageModel for GeminiClient {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ModelResponse, LlmError> {
        let body = request_body(system_prompt, messages, tools);
        debug!(model = %self.model, turns = messages.len(), "gemini request");

        let response = self.post_with_retries(&body).await?;
        parse_response(&response)
    }
}

fn request_body(system_prompt: &str, messages: &[Message], tools: &[ToolDescriptor]) -> Value {
    let contents: Vec<Value> = messages.iter().map(content_from_message).collect();

    let declarations: Vec<Value> = tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            })
        })
        .collect();

    let mut body = json!({
        "system_instruction": { "parts": [{ "text": system_prompt }] },
        "contents": contents,
    });

    if !declarations.is_empty() {
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
    }

    body
}

fn content_from_message(message: &Message) -> Value {
    match message.role {
        ChatRole::Assistant => json!({
            "role": "model",
            "parts": [{ "text": message.content }],
        }),
        ChatRole::Tool => json!({
            "role": "user",
            "parts": [{
                "functionResponse": {
                    "name": message.tool_name.as_deref().unwrap_or("tool"),
                    "response": { "content": message.content },
                }
            }],
        }),
        // System turns inside history are folded into user turns; the real
        // system prompt travels in `system_instruction`.
        ChatRole::System | ChatRole::User => json!({
            "role": "user",
            "parts": [{ "text": message.content }],
        }),
    }
}

fn parse_response(response: &Value) -> Result<ModelResponse, LlmError> {
    let parts = response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| LlmError::Protocol("response has no candidate parts".to_string()))?;

    let mut calls = Vec::new();
    let mut text_fragments = Vec::new();

    for part in parts {
        if let Some(call) = part.get("functionCall") {
            let name = call
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| LlmError::Protocol("function call without name".to_string()))?;
            let arguments = call.get("args").cloned().unwrap_or_else(|| json!({}));
            calls.push(ToolCallRequest { name: name.to_string(), arguments });
        } else if let Some(text) = part.get("text").and_then(Value::as_str) {
            text_fragments.push(text);
        }
    }

    if !calls.is_empty() {
        return Ok(ModelResponse::ToolCalls(calls));
    }

    let reply = text_fragments.join("");
    if reply.trim().is_empty() {
        return Err(LlmError::Protocol("candidate carried neither text nor calls".to_string()));
    }
    Ok(ModelResponse::Reply(reply))
}
