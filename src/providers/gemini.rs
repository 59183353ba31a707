use crate::error::RelayGateError;
use crate::providers::{api_base_or, upstream_error};
use crate::types::{GenerationOptions, Message};
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-pro";

/// Gemini API 请求格式
#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

/// Gemini API 响应格式
#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<GeminiContentResponse>,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Debug, Deserialize)]
struct GeminiPartResponse {
    text: Option<String>,
}

/// 转换消息序列为 Gemini 格式
fn convert_request(messages: &[Message], opts: &GenerationOptions) -> GeminiRequest {
    // 所有 system message 按顺序合并，放进第一个 user message
    let system = messages
        .iter()
        .filter(|msg| msg.role == "system")
        .map(|msg| msg.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let mut system = (!system.is_empty()).then_some(system);

    let mut contents = Vec::new();
    for msg in messages.iter().filter(|msg| msg.role != "system") {
        let role = if msg.role == "assistant" { "model" } else { msg.role.as_str() };
        let mut text = msg.content.clone();

        if role == "user" {
            if let Some(system) = system.take() {
                text = format!("{}\n\n{}", system, text);
            }
        }

        contents.push(GeminiContent {
            role: role.to_string(),
            parts: vec![GeminiPart { text }],
        });
    }

    // 没有 user message 时单独作为开头的 user 轮次
    if let Some(text) = system {
        contents.insert(
            0,
            GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart { text }],
            },
        );
    }

    let generation_config = opts.has_sampling_overrides().then(|| GenerationConfig {
        temperature: opts.temperature,
        max_output_tokens: opts.max_tokens,
    });

    GeminiRequest {
        contents,
        generation_config,
    }
}

/// 提取第一个 candidate 的全部文本
fn extract_text(resp: GeminiResponse) -> Result<String> {
    let candidate = resp
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| RelayGateError::internal("Gemini response contained no candidates"))?;

    let content = candidate
        .content
        .ok_or_else(|| RelayGateError::internal("Gemini candidate contained no content"))?;

    Ok(content
        .parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect::<Vec<_>>()
        .join(""))
}

/// Google Gemini 后端
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    api_base: String,
    default_model: String,
}

impl GeminiProvider {
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

    pub async fn generate(&self, prompt: &str, opts: &GenerationOptions) -> Result<String> {
        self.chat(&[Message::user(prompt)], opts).await
    }

    pub async fn chat(&self, messages: &[Message], opts: &GenerationOptions) -> Result<String> {
        let model_id = opts.model_or(&self.default_model);
        let gemini_req = convert_request(messages, opts);

        // API 密钥通过请求头传递，不出现在 URL 中
        let url = format!("{}/v1beta/models/{}:generateContent", self.api_base, model_id);
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(&gemini_req)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error("Gemini", response).await);
        }

        let gemini_resp: GeminiResponse = response.json().await?;
        extract_text(gemini_resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::build_http_client;
    use mockito::{Matcher, Server};
    use std::time::Duration;

    fn create_provider(api_base: &str) -> GeminiProvider {
        let client = build_http_client(Duration::from_secs(5)).unwrap();
        GeminiProvider::new(client, "AIza-test", api_base, None)
    }

    #[test]
    fn test_convert_request_basic() {
        let messages = vec![Message::user("Hello")];
        let opts = GenerationOptions {
            temperature: Some(0.7),
            max_tokens: Some(100),
            ..Default::default()
        };

        let gemini_req = convert_request(&messages, &opts);
        assert_eq!(gemini_req.contents.len(), 1);
        assert_eq!(gemini_req.contents[0].role, "user");
        assert_eq!(gemini_req.contents[0].parts[0].text, "Hello");

        let json = serde_json::to_value(&gemini_req).unwrap();
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 100);
    }

    #[test]
    fn test_convert_request_with_system_and_history() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("Hello"),
            Message::assistant("Hi!"),
            Message::user("How are you?"),
        ];

        let gemini_req = convert_request(&messages, &GenerationOptions::default());
        assert_eq!(gemini_req.contents.len(), 3);
        assert_eq!(gemini_req.contents[0].parts[0].text, "You are helpful\n\nHello");
        assert_eq!(gemini_req.contents[1].role, "model");
        assert_eq!(gemini_req.contents[2].parts[0].text, "How are you?");
    }

    #[test]
    fn test_system_merged_into_first_user_after_assistant() {
        let messages = vec![
            Message::system("Be brief"),
            Message::assistant("Hi, how can I help?"),
            Message::user("Question"),
            Message::system("Answer in French"),
        ];

        let gemini_req = convert_request(&messages, &GenerationOptions::default());
        assert_eq!(gemini_req.contents.len(), 2);
        assert_eq!(gemini_req.contents[0].role, "model");
        assert_eq!(gemini_req.contents[1].role, "user");
        assert_eq!(
            gemini_req.contents[1].parts[0].text,
            "Be brief\n\nAnswer in French\n\nQuestion"
        );
    }

    #[test]
    fn test_system_without_user_becomes_leading_turn() {
        let messages = vec![Message::assistant("Hello"), Message::system("Stay formal")];

        let gemini_req = convert_request(&messages, &GenerationOptions::default());
        assert_eq!(gemini_req.contents.len(), 2);
        assert_eq!(gemini_req.contents[0].role, "user");
        assert_eq!(gemini_req.contents[0].parts[0].text, "Stay formal");
        assert_eq!(gemini_req.contents[1].role, "model");
    }

    #[test]
    fn test_generation_config_omitted_without_overrides() {
        let gemini_req = convert_request(&[Message::user("x")], &GenerationOptions::default());
        let json = serde_json::to_value(&gemini_req).unwrap();
        assert!(json.get("generationConfig").is_none());
    }

    #[test]
    fn test_generation_config_only_has_supplied_fields() {
        let opts = GenerationOptions {
            temperature: Some(0.0),
            ..Default::default()
        };
        let json = serde_json::to_value(convert_request(&[Message::user("x")], &opts)).unwrap();
        assert_eq!(json["generationConfig"], serde_json::json!({"temperature": 0.0}));
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let resp: GeminiResponse = serde_json::from_str(
            r#"{
                "candidates": [{
                    "content": {"parts": [{"text": "Hello"}, {"text": " World"}], "role": "model"},
                    "finishReason": "STOP",
                    "safetyRatings": []
                }],
                "usageMetadata": {"promptTokenCount": 1, "candidatesTokenCount": 2, "totalTokenCount": 3}
            }"#,
        )
        .unwrap();

        assert_eq!(extract_text(resp).unwrap(), "Hello World");
    }

    #[test]
    fn test_extract_text_no_candidates() {
        let resp: GeminiResponse =
            serde_json::from_str(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#).unwrap();
        assert!(extract_text(resp).is_err());
    }

    #[tokio::test]
    async fn test_generate_success() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("POST", "/v1beta/models/gemini-pro:generateContent")
            .match_header("x-goog-api-key", "AIza-test")
            .match_body(Matcher::Json(serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": "Write a haiku"}]}]
            })))
            .with_status(200)
            .with_body(r#"{"candidates": [{"content": {"parts": [{"text": "Autumn moonlight"}]}}]}"#)
            .create_async()
            .await;

        let provider = create_provider(&server.url());
        let text = provider
            .generate("Write a haiku", &GenerationOptions::default())
            .await
            .unwrap();

        assert_eq!(text, "Autumn moonlight");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_model_override_changes_url() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("POST", "/v1beta/models/gemini-1.5-flash:generateContent")
            .with_status(200)
            .with_body(r#"{"candidates": [{"content": {"parts": [{"text": "ok"}]}}]}"#)
            .create_async()
            .await;

        let provider = create_provider(&server.url());
        let opts = GenerationOptions {
            model: Some("gemini-1.5-flash".to_string()),
            ..Default::default()
        };
        provider.chat(&[Message::user("hi")], &opts).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error() {
        let mut server = Server::new_async().await;

        server
            .mock("POST", "/v1beta/models/gemini-pro:generateContent")
            .with_status(403)
            .with_body(r#"{"error": {"message": "API key not valid"}}"#)
            .create_async()
            .await;

        let provider = create_provider(&server.url());
        let err = provider
            .generate("hi", &GenerationOptions::default())
            .await
            .unwrap_err();

        match err {
            RelayGateError::UpstreamError { status, message, .. } => {
                assert_eq!(status, 403);
                assert!(message.contains("API key not valid"));
            }
            other => panic!("Expected UpstreamError, got {:?}", other),
        }
    }
}
