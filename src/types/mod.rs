use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_user_id() -> String {
    "default".to_string()
}

fn default_top_k() -> usize {
    5
}

/// 文本生成请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub provider: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

impl GenerateRequest {
    /// 验证请求参数
    pub fn validate(&self) -> Result<(), String> {
        if self.prompt.trim().is_empty() {
            return Err("prompt must not be empty".to_string());
        }
        self.options().validate()
    }

    pub fn options(&self) -> GenerationOptions {
        GenerationOptions {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// 聊天请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub provider: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub save_to_db: bool,
    /// 为空时使用配置中的 default_database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_type: Option<String>,
}

impl ChatRequest {
    /// 验证请求参数
    pub fn validate(&self) -> Result<(), String> {
        if self.messages.is_empty() {
            return Err("messages must not be empty".to_string());
        }
        if let Some(msg) = self.messages.iter().find(|m| m.role.is_empty()) {
            return Err(format!("message role must not be empty: {:?}", msg.content));
        }
        self.options().validate()
    }

    pub fn options(&self) -> GenerationOptions {
        GenerationOptions {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// 调用方显式给出的覆盖参数；None 表示交给后端默认值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl GenerationOptions {
    pub fn validate(&self) -> Result<(), String> {
        // temperature (0.0 - 2.0)
        if let Some(temp) = self.temperature {
            if !(0.0..=2.0).contains(&temp) {
                return Err(format!(
                    "temperature must be between 0.0 and 2.0, got {}",
                    temp
                ));
            }
        }
        if self.max_tokens == Some(0) {
            return Err("max_tokens must be greater than 0".to_string());
        }
        if matches!(self.model.as_deref(), Some("")) {
            return Err("model must not be empty".to_string());
        }
        Ok(())
    }

    /// 实际使用的模型：显式覆盖优先，否则使用后端默认
    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(default)
    }

    pub fn has_sampling_overrides(&self) -> bool {
        self.temperature.is_some() || self.max_tokens.is_some()
    }
}

/// 聊天消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    /// 创建用户消息
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// 创建助手消息
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    /// 创建系统消息
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// 统一的文本生成响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
    pub provider: String,
    pub model: Option<String>,
}

/// 统一的聊天响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
    pub provider: String,
    pub conversation_id: Option<String>,
    pub model: Option<String>,
}

/// 已持久化的会话
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationRecord {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderListResponse {
    pub llm_providers: Vec<String>,
    pub database_providers: Vec<String>,
    pub vector_stores: Vec<String>,
}

/// 向量写入请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingInsert {
    pub text: String,
    pub embedding: Vec<f32>,
}

/// 相似度查询
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityQuery {
    pub embedding: Vec<f32>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarityHit {
    pub id: i64,
    pub text: Option<String>,
    pub distance: f32,
}
