pub mod azure;
pub mod gemini;
pub mod openai;
pub mod routing;

use crate::config::{LlmKind, LlmProviderConfig};
use crate::error::RelayGateError;
use crate::types::{GenerationOptions, Message};
use crate::Result;
use reqwest::Client;
use std::time::Duration;

pub use azure::AzureOpenAiProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// 上游错误响应体的最大保留长度
const MAX_ERROR_BODY_CHARS: usize = 4096;

/// 构建带连接池的 HTTP 客户端，启动时创建一次并在各后端间共享
pub fn build_http_client(timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .build()?;
    Ok(client)
}

/// 已配置的 LLM 后端（封闭集合）
#[derive(Debug, Clone)]
pub enum LlmBackend {
    OpenAi(OpenAiProvider),
    Azure(AzureOpenAiProvider),
    Gemini(GeminiProvider),
}

impl LlmBackend {
    pub fn from_config(config: &LlmProviderConfig, client: Client) -> Self {
        let default_model = config.default_model.clone();
        match config.kind {
            LlmKind::Openai => LlmBackend::OpenAi(OpenAiProvider::new(
                client,
                &config.api_key,
                &config.api_base,
                default_model,
            )),
            LlmKind::Azure => LlmBackend::Azure(AzureOpenAiProvider::new(
                client,
                &config.api_key,
                &config.api_base,
                config.api_version.as_deref(),
                default_model,
            )),
            LlmKind::Gemini => LlmBackend::Gemini(GeminiProvider::new(
                client,
                &config.api_key,
                &config.api_base,
                default_model,
            )),
        }
    }

    /// 厂商名，用于日志和错误信息
    pub fn vendor(&self) -> &'static str {
        match self {
            LlmBackend::OpenAi(_) => "OpenAI",
            LlmBackend::Azure(_) => "Azure OpenAI",
            LlmBackend::Gemini(_) => "Gemini",
        }
    }

    pub fn default_model(&self) -> &str {
        match self {
            LlmBackend::OpenAi(p) => p.default_model(),
            LlmBackend::Azure(p) => p.default_model(),
            LlmBackend::Gemini(p) => p.default_model(),
        }
    }

    /// 单轮文本生成
    pub async fn generate(&self, prompt: &str, opts: &GenerationOptions) -> Result<String> {
        match self {
            LlmBackend::OpenAi(p) => p.chat(&[Message::user(prompt)], opts).await,
            LlmBackend::Azure(p) => p.chat(&[Message::user(prompt)], opts).await,
            LlmBackend::Gemini(p) => p.generate(prompt, opts).await,
        }
    }

    /// 带历史的聊天补全
    pub async fn chat(&self, messages: &[Message], opts: &GenerationOptions) -> Result<String> {
        match self {
            LlmBackend::OpenAi(p) => p.chat(messages, opts).await,
            LlmBackend::Azure(p) => p.chat(messages, opts).await,
            LlmBackend::Gemini(p) => p.chat(messages, opts).await,
        }
    }
}

/// 把非 2xx 的上游响应转换为错误
pub(crate) async fn upstream_error(vendor: &str, response: reqwest::Response) -> RelayGateError {
    let status = response.status();
    // 限制错误响应体大小
    let body = response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(MAX_ERROR_BODY_CHARS)
        .collect::<String>();
    RelayGateError::upstream(vendor, status.as_u16(), body)
}

/// 去掉 base URL 末尾的斜杠；为空时使用默认地址
pub(crate) fn api_base_or(api_base: &str, default: &str) -> String {
    let base = if api_base.is_empty() { default } else { api_base };
    base.trim_end_matches('/').to_string()
}
