use super::provider::{
    LlmProvider, LlmResponse, Message, ProviderErrorKind, Role, StreamChunk, TokenUsage, ToolCall,
};
use crate::tools::tool::ToolDef;
use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Ollama's native `/api/chat` endpoint — distinct from its OpenAI-compat
/// shim, since Ollama is named as its own provider in the spec. Streaming
/// replies are newline-delimited JSON objects (not SSE `data:` frames), and
/// a final object carries `done: true` plus token counts instead of an
/// OpenAI-style `usage` block.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

fn build_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            if let Some(calls) = &m.tool_calls {
                let tc_arr: Vec<Value> = calls
                    .iter()
                    .map(|c| json!({ "function": { "name": c.name, "arguments": c.args } }))
                    .collect();
                return json!({ "role": role, "content": "", "tool_calls": tc_arr });
            }
            json!({ "role": role, "content": m.content })
        })
        .collect()
}

fn build_tools(tools: &[ToolDef]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| json!({ "type": "function", "function": { "name": t.name, "description": t.description, "parameters": t.parameters } }))
        .collect()
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    message["tool_calls"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .enumerate()
                .map(|(i, tc)| ToolCall {
                    id: format!("call_{i}"),
                    name: tc["function"]["name"].as_str().unwrap_or_default().to_string(),
                    args: tc["function"]["arguments"].clone(),
                    thought_signature: None,
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete(&self, messages: &[Message], tools: &[ToolDef]) -> Result<LlmResponse> {
        let mut body = json!({
            "model": self.model,
            "messages": build_messages(messages),
            "stream": false,
        });
        let tools_val = build_tools(tools);
        if !tools_val.is_empty() {
            body["tools"] = json!(tools_val);
        }

        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let resp = self.client.post(&url).json(&body).send().await?.error_for_status()?;
        let data: Value = resp.json().await?;

        let usage = TokenUsage {
            input_tokens: data["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
            output_tokens: data["eval_count"].as_u64().unwrap_or(0) as u32,
        };

        let message = &data["message"];
        let tool_calls = parse_tool_calls(message);
        if !tool_calls.is_empty() {
            Ok(LlmResponse::ToolCalls { calls: tool_calls, usage })
        } else {
            let content = message["content"].as_str().unwrap_or("").to_string();
            Ok(LlmResponse::Message { content, usage })
        }
    }

    async fn stream_complete(
        &self,
        messages: &[Message],
        tools: &[ToolDef],
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<()> {
        let mut body = json!({
            "model": self.model,
            "messages": build_messages(messages),
            "stream": true,
        });
        let tools_val = build_tools(tools);
        if !tools_val.is_empty() {
            body["tools"] = json!(tools_val);
        }

        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let raw_resp = self.client.post(&url).json(&body).send().await?;

        if !raw_resp.status().is_success() {
            let status = raw_resp.status();
            let body_text = raw_resp.text().await.unwrap_or_default();
            let _ = tx
                .send(StreamChunk::Error {
                    kind: ProviderErrorKind::Transport,
                    message: format!("status {status}: {body_text}"),
                    partial_text: None,
                })
                .await;
            return Ok(());
        }

        let mut byte_stream = raw_resp.bytes_stream();
        let mut leftover = String::new();
        let mut partial_text = String::new();
        let mut usage = TokenUsage { input_tokens: 0, output_tokens: 0 };
        let mut tool_call_count = 0usize;

        while let Some(chunk) = byte_stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx
                        .send(StreamChunk::Error {
                            kind: ProviderErrorKind::Transport,
                            message: e.to_string(),
                            partial_text: (!partial_text.is_empty()).then(|| partial_text.clone()),
                        })
                        .await;
                    return Ok(());
                }
            };
            leftover.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = leftover.find('\n') {
                let line = leftover[..pos].trim().to_string();
                leftover = leftover[pos + 1..].to_string();
                if line.is_empty() {
                    continue;
                }

                let ev: Value = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(_) => continue,
                };

                let message = &ev["message"];
                if let Some(text) = message["content"].as_str() {
                    if !text.is_empty() {
                        partial_text.push_str(text);
                        let _ = tx.send(StreamChunk::Delta { text: text.to_string() }).await;
                    }
                }
                for call in parse_tool_calls(message) {
                    let call = ToolCall {
                        id: format!("call_{tool_call_count}"),
                        ..call
                    };
                    tool_call_count += 1;
                    let _ = tx.send(StreamChunk::ToolCallReady { call }).await;
                }

                if ev["done"].as_bool().unwrap_or(false) {
                    usage = TokenUsage {
                        input_tokens: ev["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
                        output_tokens: ev["eval_count"].as_u64().unwrap_or(0) as u32,
                    };
                }
            }
        }

        let _ = tx.send(StreamChunk::Done { usage }).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_calls_from_native_shape() {
        let message = json!({
            "content": "",
            "tool_calls": [{ "function": { "name": "bash", "arguments": { "command": "ls" } } }]
        });
        let calls = parse_tool_calls(&message);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "bash");
    }

    #[test]
    fn no_tool_calls_returns_empty() {
        let message = json!({ "content": "hi" });
        assert!(parse_tool_calls(&message).is_empty());
    }
}
