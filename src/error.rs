use crate::registry::Capability;
use hyper::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayGateError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Document store error: {0}")]
    DocumentStoreError(#[from] sled::Error),

    #[error("{capability} {key} not available")]
    ProviderNotConfigured { capability: Capability, key: String },

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{provider} API error ({status}): {message}")]
    UpstreamError {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("CV service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("CV service timeout: {0}")]
    Timeout(String),

    #[error("CV service error ({status}): {body}")]
    RemoteError { status: u16, body: String },

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl RelayGateError {
    pub fn config(msg: impl Into<String>) -> Self {
        RelayGateError::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        RelayGateError::InternalError(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        RelayGateError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        RelayGateError::NotFound(msg.into())
    }

    pub fn upstream(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        RelayGateError::UpstreamError {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    /// 映射到对外暴露的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayGateError::BadRequest(_)
            | RelayGateError::ProviderNotConfigured { .. }
            | RelayGateError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            RelayGateError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayGateError::RemoteError { status: 404, .. } => StatusCode::NOT_FOUND,
            RelayGateError::ServiceUnavailable(_) | RelayGateError::Timeout(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 返回给客户端的 detail 文本，500 类错误带上操作名前缀
    pub fn detail(&self, operation: &str) -> String {
        if self.status_code().is_server_error() && self.status_code() != StatusCode::SERVICE_UNAVAILABLE {
            format!("{}: {}", operation, self)
        } else {
            self.to_string()
        }
    }
}
