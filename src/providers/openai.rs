use crate::error::RelayGateError;
use crate::providers::{api_base_or, upstream_error};
use crate::types::{GenerationOptions, Message};
use crate::Result;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// chat/completions 请求体（OpenAI 与 Azure 共用）
///
/// 未显式给出的参数不会出现在 JSON 中。
#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl<'a> ChatCompletionRequest<'a> {
    pub fn new(model: Option<&'a str>, messages: &'a [Message], opts: &GenerationOptions) -> Self {
        Self {
            model,
            messages,
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

impl ChatCompletionResponse {
    /// 只取 choices[0].message.content，其余字段丢弃
    pub fn into_text(self, vendor: &str) -> Result<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                RelayGateError::internal(format!("{} response contained no message content", vendor))
            })
    }
}

/// 发送 chat/completions 请求并解析文本
pub(crate) async fn send_chat_completion(
    vendor: &str,
    request: RequestBuilder,
    body: &ChatCompletionRequest<'_>,
) -> Result<String> {
    let response = request
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(upstream_error(vendor, response).await);
    }

    let completion: ChatCompletionResponse = response.json().await?;
    completion.into_text(vendor)
}

/// OpenAI 后端
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    api_base: String,
    default_model: String,
}

impl OpenAiProvider {
    pub fn new(client: Client, api_key: &str, api_base: &str, default_model: Option<String>) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            api_base: api_base_or(api_base, DEFAULT_API_BASE),
            default_model: default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub async fn chat(&self, messages: &[Message], opts: &GenerationOptions) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = ChatCompletionRequest::new(
            Some(opts.model_or(&self.default_model)),
            messages,
            opts,
        );

        let request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key));

        send_chat_completion("OpenAI", request, &body).await
    }
}
