use crate::providers::api_base_or;
use crate::providers::openai::{send_chat_completion, ChatCompletionRequest};
use crate::types::{GenerationOptions, Message};
use crate::Result;
use reqwest::Client;

pub const DEFAULT_API_VERSION: &str = "2023-05-15";
pub const DEFAULT_DEPLOYMENT: &str = "gpt-35-turbo";

/// Azure OpenAI 后端
///
/// 模型名即部署名，放在 URL 里；请求体与 OpenAI 相同但不带 model。
#[derive(Debug, Clone)]
pub struct AzureOpenAiProvider {
    client: Client,
    api_key: String,
    endpoint: String,
    api_version: String,
    default_deployment: String,
}

impl AzureOpenAiProvider {
    pub fn new(
        client: Client,
        api_key: &str,
        endpoint: &str,
        api_version: Option<&str>,
        default_deployment: Option<String>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            endpoint: api_base_or(endpoint, ""),
            api_version: api_version.unwrap_or(DEFAULT_API_VERSION).to_string(),
            default_deployment: default_deployment
                .unwrap_or_else(|| DEFAULT_DEPLOYMENT.to_string()),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_deployment
    }

    fn completions_url(&self, deployment: &str) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions",
            self.endpoint, deployment
        )
    }

    pub async fn chat(&self, messages: &[Message], opts: &GenerationOptions) -> Result<String> {
        let deployment = opts.model_or(&self.default_deployment);
        let body = ChatCompletionRequest::new(None, messages, opts);

        let request = self
            .client
            .post(self.completions_url(deployment))
            .query(&[("api-version", self.api_version.as_str())])
            .header("api-key", &self.api_key);

        send_chat_completion("Azure OpenAI", request, &body).await
    }
}
