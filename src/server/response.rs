use crate::error::RelayGateError;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

pub fn full(body: impl Into<Bytes>) -> BoxBody {
    Full::new(body.into())
        .map_err(|e| Box::new(e) as BoxError)
        .boxed()
}

fn with_content_type(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<BoxBody> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// 序列化为 JSON 响应
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<BoxBody> {
    match serde_json::to_vec(value) {
        Ok(body) => with_content_type(status, "application/json", Bytes::from(body)),
        Err(e) => {
            error!("响应序列化失败: {}", e);
            detail_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Failed to serialize response: {}", e),
            )
        }
    }
}

pub fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<BoxBody> {
    with_content_type(status, content_type, Bytes::from(body))
}

/// `{"detail": ...}` 格式的错误响应
pub fn detail_response(status: StatusCode, detail: &str) -> Response<BoxBody> {
    let body = json!({ "detail": detail }).to_string();
    with_content_type(status, "application/json", Bytes::from(body))
}

/// 错误在这里统一转换为 HTTP 响应，且只转换一次
pub fn error_response(err: &RelayGateError, operation: &str) -> Response<BoxBody> {
    let status = err.status_code();
    if status.is_server_error() {
        error!("{}: {}", operation, err);
    } else {
        warn!("{}: {}", operation, err);
    }
    detail_response(status, &err.detail(operation))
}

pub fn not_found() -> Response<BoxBody> {
    detail_response(StatusCode::NOT_FOUND, "Not Found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Capability;

    async fn body_json(response: Response<BoxBody>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_json_response() {
        let response = json_response(StatusCode::OK, &json!({"status": "ok"}));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_client_error_detail_is_unprefixed() {
        let err = RelayGateError::ProviderNotConfigured {
            capability: Capability::Llm,
            key: "openai".to_string(),
        };
        let response = error_response(&err, "Error in chat");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["detail"], "Provider openai not available");
    }

    #[tokio::test]
    async fn test_server_error_detail_is_prefixed() {
        let err = RelayGateError::upstream("OpenAI", 401, "invalid api key");
        let response = error_response(&err, "Error in chat");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await["detail"],
            "Error in chat: OpenAI API error (401): invalid api key"
        );
    }

    #[tokio::test]
    async fn test_not_found() {
        let response = not_found();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["detail"], "Not Found");
    }
}
