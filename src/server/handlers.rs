use crate::context::AppContext;
use crate::error::RelayGateError;
use crate::providers::routing;
use crate::server::body::read_json;
use crate::server::cv;
use crate::server::params::Params;
use crate::server::response::{error_response, json_response, not_found, text_response, BoxBody, BoxError};
use crate::storage::DEFAULT_LIST_LIMIT;
use crate::types::{ChatRequest, EmbeddingInsert, GenerateRequest, SimilarityQuery};
use crate::Result;
use hyper::body::{Body, Bytes};
use hyper::{Method, Request, Response, StatusCode};
use percent_encoding::percent_decode_str;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

const MAX_LIST_LIMIT: u32 = 1000;

/// 处理 HTTP 请求的主路由，记录访问日志和计数
pub async fn handle_request<B>(
    req: Request<B>,
    ctx: Arc<AppContext>,
) -> std::result::Result<Response<BoxBody>, BoxError>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let in_flight = ctx.metrics.request_started();
    let response = route(req, &ctx).await;
    let elapsed = started.elapsed();
    in_flight.finish(response.status(), elapsed);

    info!(
        "{} {} -> {} ({:.1}ms)",
        method,
        path,
        response.status().as_u16(),
        elapsed.as_secs_f64() * 1000.0
    );
    Ok(response)
}

async fn route<B>(req: Request<B>, ctx: &AppContext) -> Response<BoxBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let segments = match path_segments(req.uri().path()) {
        Ok(segments) => segments,
        Err(e) => return error_response(&e, "Invalid path"),
    };
    let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
    let method = req.method().clone();

    match (&method, segments.as_slice()) {
        (&Method::GET, []) => root(),
        (&Method::GET, ["health"]) => health_check(),
        (&Method::GET, ["metrics"]) => metrics_endpoint(ctx),
        (_, ["api", "v1", rest @ ..]) => match (&method, rest) {
            (&Method::GET, ["providers"]) => json_response(StatusCode::OK, &ctx.provider_list()),
            (&Method::POST, ["generate"]) => generate(req, ctx).await,
            (&Method::POST, ["chat"]) => chat(req, ctx).await,
            (&Method::GET, ["conversations", db, "by-id", id]) => {
                get_conversation(ctx, db, id).await
            }
            (&Method::GET, ["conversations", db, user_id]) => {
                let params = Params::from_query(req.uri().query());
                list_conversations(ctx, db, user_id, &params).await
            }
            (&Method::POST, ["vectors", store]) => insert_embedding(req, ctx, store).await,
            (&Method::POST, ["vectors", store, "search"]) => search_similar(req, ctx, store).await,
            (_, ["cv", cv_path @ ..]) => cv::handle(req, ctx, cv_path).await,
            _ => not_found(),
        },
        _ => not_found(),
    }
}

/// 按 `/` 切分并做百分号解码
fn path_segments(path: &str) -> Result<Vec<String>> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            percent_decode_str(segment)
                .decode_utf8()
                .map(|decoded| decoded.into_owned())
                .map_err(|_| RelayGateError::bad_request(format!("Invalid path segment: {}", segment)))
        })
        .collect()
}

fn root() -> Response<BoxBody> {
    json_response(
        StatusCode::OK,
        &json!({
            "service": "relaygate",
            "version": env!("CARGO_PKG_VERSION"),
            "api": "/api/v1"
        }),
    )
}

/// 健康检查端点
fn health_check() -> Response<BoxBody> {
    json_response(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "service": "relaygate"
        }),
    )
}

/// 指标端点
fn metrics_endpoint(ctx: &AppContext) -> Response<BoxBody> {
    text_response(
        StatusCode::OK,
        "text/plain; version=0.0.4",
        ctx.metrics.export_prometheus(),
    )
}

async fn generate<B>(req: Request<B>, ctx: &AppContext) -> Response<BoxBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    const OP: &str = "Error in generate";

    let request: GenerateRequest = match read_json(req.into_body(), ctx.max_upload_bytes).await {
        Ok(request) => request,
        Err(e) => return error_response(&e, OP),
    };

    match routing::route_generate(ctx, &request).await {
        Ok(response) => json_response(StatusCode::OK, &response),
        Err(e) => error_response(&e, OP),
    }
}

async fn chat<B>(req: Request<B>, ctx: &AppContext) -> Response<BoxBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    const OP: &str = "Error in chat";

    let request: ChatRequest = match read_json(req.into_body(), ctx.max_upload_bytes).await {
        Ok(request) => request,
        Err(e) => return error_response(&e, OP),
    };

    match routing::route_chat(ctx, request).await {
        Ok(response) => json_response(StatusCode::OK, &response),
        Err(e) => error_response(&e, OP),
    }
}

async fn list_conversations(
    ctx: &AppContext,
    db: &str,
    user_id: &str,
    params: &Params,
) -> Response<BoxBody> {
    const OP: &str = "Error retrieving conversations";

    let result = async {
        let store = ctx.databases.resolve(db)?;
        let limit = params.parse::<u32>("limit")?.unwrap_or(DEFAULT_LIST_LIMIT);
        if limit == 0 || limit > MAX_LIST_LIMIT {
            return Err(RelayGateError::bad_request(format!(
                "limit must be between 1 and {}",
                MAX_LIST_LIMIT
            )));
        }
        store.list_conversations(user_id, limit).await
    }
    .await;

    match result {
        Ok(records) => json_response(StatusCode::OK, &records),
        Err(e) => error_response(&e, OP),
    }
}

async fn get_conversation(ctx: &AppContext, db: &str, id: &str) -> Response<BoxBody> {
    const OP: &str = "Error retrieving conversation";

    let result = async {
        let store = ctx.databases.resolve(db)?;
        store
            .get_conversation(id)
            .await?
            .ok_or_else(|| RelayGateError::not_found("Conversation not found"))
    }
    .await;

    match result {
        Ok(record) => json_response(StatusCode::OK, &record),
        Err(e) => error_response(&e, OP),
    }
}

async fn insert_embedding<B>(req: Request<B>, ctx: &AppContext, store: &str) -> Response<BoxBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    const OP: &str = "Error inserting embedding";

    let result = async {
        let vectors = ctx.vectors.resolve(store)?;
        let insert: EmbeddingInsert = read_json(req.into_body(), ctx.max_upload_bytes).await?;
        vectors.insert_embedding(&insert.text, &insert.embedding).await
    }
    .await;

    match result {
        Ok(id) => json_response(StatusCode::OK, &json!({ "id": id, "store": store })),
        Err(e) => error_response(&e, OP),
    }
}

async fn search_similar<B>(req: Request<B>, ctx: &AppContext, store: &str) -> Response<BoxBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    const OP: &str = "Error searching embeddings";

    let result = async {
        let vectors = ctx.vectors.resolve(store)?;
        let query: SimilarityQuery = read_json(req.into_body(), ctx.max_upload_bytes).await?;
        vectors.search_similar(&query.embedding, query.top_k).await
    }
    .await;

    match result {
        Ok(hits) => json_response(StatusCode::OK, &json!({ "results": hits })),
        Err(e) => error_response(&e, OP),
    }
}
