use crate::config::VectorStoreConfig;
use crate::error::RelayGateError;
use crate::providers::{api_base_or, upstream_error};
use crate::types::SimilarityHit;
use crate::Result;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

const VECTOR_FIELD: &str = "embedding";
const TEXT_FIELD: &str = "text";
const SEARCH_NPROBE: u32 = 10;
const MAX_TOP_K: usize = 16384;

/// Milvus REST v2 通用响应信封
#[derive(Debug, Deserialize)]
struct MilvusReply<T> {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct HasCollection {
    has: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertResult {
    #[serde(default)]
    insert_ids: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: Value,
    distance: f32,
    #[serde(default)]
    text: Option<String>,
}

/// Milvus 向量库（REST API）
#[derive(Debug, Clone)]
pub struct MilvusStore {
    client: Client,
    base_url: String,
    collection: String,
    dimension: usize,
    token: Option<String>,
}

impl MilvusStore {
    pub fn new(client: Client, config: &VectorStoreConfig) -> Self {
        Self {
            client,
            base_url: api_base_or(&config.url, ""),
            collection: config.collection.clone(),
            dimension: config.dimension,
            token: config.token.clone(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// 集合不存在时按 id/text/embedding 三列创建
    pub async fn ensure_collection(&self) -> Result<()> {
        let exists: HasCollection = self
            .call("collections/has", &json!({ "collectionName": self.collection }))
            .await?;
        if exists.has {
            return Ok(());
        }

        let body = json!({
            "collectionName": self.collection,
            "schema": {
                "autoId": true,
                "enableDynamicField": false,
                "fields": [
                    { "fieldName": "id", "dataType": "Int64", "isPrimary": true },
                    { "fieldName": TEXT_FIELD, "dataType": "VarChar",
                      "elementTypeParams": { "max_length": 65535 } },
                    { "fieldName": VECTOR_FIELD, "dataType": "FloatVector",
                      "elementTypeParams": { "dim": self.dimension } }
                ]
            },
            "indexParams": [{
                "fieldName": VECTOR_FIELD,
                "indexName": VECTOR_FIELD,
                "metricType": "L2",
                "indexType": "IVF_FLAT",
                "params": { "nlist": 1024 }
            }]
        });
        self.call::<Value>("collections/create", &body).await?;
        info!("已创建 Milvus 集合: {}", self.collection);
        Ok(())
    }

    /// 写入一条文本及其向量，返回自动生成的主键
    pub async fn insert_embedding(&self, text: &str, embedding: &[f32]) -> Result<i64> {
        self.check_dimension(embedding)?;

        let body = json!({
            "collectionName": self.collection,
            "data": [{ TEXT_FIELD: text, VECTOR_FIELD: embedding }]
        });
        let result: InsertResult = self.call("entities/insert", &body).await?;

        result
            .insert_ids
            .first()
            .and_then(parse_id)
            .ok_or_else(|| RelayGateError::internal("Milvus insert returned no primary key"))
    }

    /// L2 距离检索，结果按距离升序
    pub async fn search_similar(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SimilarityHit>> {
        self.check_dimension(embedding)?;
        if top_k == 0 || top_k > MAX_TOP_K {
            return Err(RelayGateError::bad_request(format!(
                "top_k must be between 1 and {}",
                MAX_TOP_K
            )));
        }

        let body = json!({
            "collectionName": self.collection,
            "data": [embedding],
            "annsField": VECTOR_FIELD,
            "limit": top_k,
            "outputFields": [TEXT_FIELD],
            "searchParams": {
                "metricType": "L2",
                "params": { "nprobe": SEARCH_NPROBE }
            }
        });
        let hits: Vec<SearchHit> = self.call("entities/search", &body).await?;

        hits.into_iter()
            .map(|hit| {
                let id = parse_id(&hit.id).ok_or_else(|| {
                    RelayGateError::internal(format!("Milvus returned invalid id: {}", hit.id))
                })?;
                Ok(SimilarityHit {
                    id,
                    text: hit.text,
                    distance: hit.distance,
                })
            })
            .collect()
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(RelayGateError::bad_request(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }
        Ok(())
    }

    async fn call<T: DeserializeOwned>(&self, action: &str, body: &Value) -> Result<T> {
        let url = format!("{}/v2/vectordb/{}", self.base_url, action);
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(upstream_error("Milvus", response).await);
        }

        let reply: MilvusReply<T> = response.json().await?;
        if reply.code != 0 {
            return Err(RelayGateError::internal(format!(
                "Milvus {} failed (code {}): {}",
                action,
                reply.code,
                reply.message.unwrap_or_default()
            )));
        }

        reply
            .data
            .ok_or_else(|| RelayGateError::internal(format!("Milvus {} returned no data", action)))
    }
}

/// Int64 主键可能以数字或字符串形式返回
fn parse_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VectorKind;
    use crate::providers::build_http_client;
    use mockito::{Matcher, Server};
    use std::time::Duration;

    fn create_store(url: &str, dimension: usize) -> MilvusStore {
        let config = VectorStoreConfig {
            name: "milvus".to_string(),
            kind: VectorKind::Milvus,
            url: url.to_string(),
            collection: "embeddings".to_string(),
            dimension,
            token: Some("root:Milvus".to_string()),
        };
        MilvusStore::new(build_http_client(Duration::from_secs(5)).unwrap(), &config)
    }

    #[test]
    fn test_parse_id_accepts_number_and_string() {
        assert_eq!(parse_id(&json!(42)), Some(42));
        assert_eq!(parse_id(&json!("449912345678901234")), Some(449912345678901234));
        assert_eq!(parse_id(&json!(null)), None);
    }

    #[tokio::test]
    async fn test_ensure_collection_skips_existing() {
        let mut server = Server::new_async().await;

        let has = server
            .mock("POST", "/v2/vectordb/collections/has")
            .match_header("authorization", "Bearer root:Milvus")
            .with_body(r#"{"code": 0, "data": {"has": true}}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/v2/vectordb/collections/create")
            .expect(0)
            .create_async()
            .await;

        create_store(&server.url(), 4).ensure_collection().await.unwrap();

        has.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_ensure_collection_creates_missing() {
        let mut server = Server::new_async().await;

        server
            .mock("POST", "/v2/vectordb/collections/has")
            .with_body(r#"{"code": 0, "data": {"has": false}}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/v2/vectordb/collections/create")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(json!({"collectionName": "embeddings"})),
                Matcher::Regex(r#""metricType":"L2""#.to_string()),
            ]))
            .with_body(r#"{"code": 0, "data": {}}"#)
            .create_async()
            .await;

        create_store(&server.url(), 4).ensure_collection().await.unwrap();
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_insert_returns_primary_key() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("POST", "/v2/vectordb/entities/insert")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(json!({"collectionName": "embeddings"})),
                Matcher::Regex(r#""text":"hello""#.to_string()),
            ]))
            .with_body(r#"{"code": 0, "data": {"insertCount": 1, "insertIds": ["7"]}}"#)
            .create_async()
            .await;

        let id = create_store(&server.url(), 4)
            .insert_embedding("hello", &[0.5, 0.25, 0.0, 1.0])
            .await
            .unwrap();

        assert_eq!(id, 7);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_rejected_before_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let err = create_store(&server.url(), 4)
            .insert_embedding("hello", &[1.0, 2.0])
            .await
            .unwrap_err();

        assert!(matches!(err, RelayGateError::BadRequest(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_search_maps_hits() {
        let mut server = Server::new_async().await;

        server
            .mock("POST", "/v2/vectordb/entities/search")
            .match_body(Matcher::PartialJson(json!({
                "limit": 2,
                "searchParams": {"metricType": "L2", "params": {"nprobe": 10}}
            })))
            .with_body(
                r#"{"code": 0, "data": [
                    {"id": 3, "distance": 0.5, "text": "near"},
                    {"id": "9", "distance": 1.5, "text": "far"}
                ]}"#,
            )
            .create_async()
            .await;

        let hits = create_store(&server.url(), 2)
            .search_similar(&[0.0, 1.0], 2)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 3);
        assert_eq!(hits[0].text.as_deref(), Some("near"));
        assert_eq!(hits[1].id, 9);
    }

    #[tokio::test]
    async fn test_nonzero_code_is_error() {
        let mut server = Server::new_async().await;

        server
            .mock("POST", "/v2/vectordb/entities/search")
            .with_body(r#"{"code": 100, "message": "collection not found"}"#)
            .create_async()
            .await;

        let err = create_store(&server.url(), 2)
            .search_similar(&[0.0, 1.0], 5)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("collection not found"));
        assert_eq!(err.status_code(), hyper::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_http_error_body_is_truncated() {
        let mut server = Server::new_async().await;

        server
            .mock("POST", "/v2/vectordb/entities/search")
            .with_status(502)
            .with_body("x".repeat(20_000))
            .create_async()
            .await;

        let err = create_store(&server.url(), 2)
            .search_similar(&[0.0, 1.0], 5)
            .await
            .unwrap_err();

        match err {
            RelayGateError::UpstreamError { provider, status, message } => {
                assert_eq!(provider, "Milvus");
                assert_eq!(status, 502);
                assert_eq!(message.chars().count(), 4096);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
