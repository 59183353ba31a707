use crate::context::AppContext;
use crate::cv::{health_report, DetectOptions, ResumeOptions, TrainOptions};
use crate::server::body::{read_bytes, MultipartForm};
use crate::server::params::Params;
use crate::server::response::{error_response, json_response, not_found, BoxBody, BoxError};
use crate::Result;
use hyper::body::{Body, Bytes};
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;

/// `/api/v1/cv/...` 下的转发路由
pub async fn handle<B>(req: Request<B>, ctx: &AppContext, path: &[&str]) -> Response<BoxBody>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let method = req.method().clone();
    let cv = &ctx.cv;

    match (&method, path) {
        (&Method::GET, ["health"]) => json_response(StatusCode::OK, &health_report(cv.health().await)),
        (&Method::POST, ["detect"]) => {
            let result = async {
                let mut form = read_multipart(req, ctx).await?;
                let file = form.take_file("file")?;
                let opts = detect_options(&form.fields, true)?;
                cv.detect(file, &opts).await
            }
            .await;
            respond(result, "Detection error")
        }
        (&Method::POST, ["detect", "batch"]) => {
            let result = async {
                let mut form = read_multipart(req, ctx).await?;
                let files = form.take_files("files");
                let opts = detect_options(&form.fields, false)?;
                cv.detect_batch(files, &opts).await
            }
            .await;
            respond(result, "Batch detection error")
        }
        (&Method::GET, ["models"]) => respond(cv.list_models().await, "Error listing models"),
        (&Method::GET, ["models", name, "info"]) => {
            respond(cv.model_info(name).await, "Error getting model info")
        }
        (&Method::GET, ["models", name, "status"]) => {
            respond(cv.model_status(name).await, "Error checking model status")
        }
        (&Method::DELETE, ["models", name]) => {
            respond(cv.delete_model(name).await, "Error deleting model")
        }
        (&Method::POST, ["train"]) => {
            let result = async {
                let mut form = read_multipart(req, ctx).await?;
                let dataset = form.take_file("dataset")?;
                let opts = train_options(&form.fields)?;
                cv.train_upload(dataset, &opts).await
            }
            .await;
            respond(result, "Training error")
        }
        (&Method::POST, ["train", "from-folder"]) => {
            let params = Params::from_query(req.uri().query());
            let result = async {
                let dataset_path = params.require("dataset_path")?;
                let opts = train_options(&params)?;
                cv.train_from_folder(dataset_path, &opts).await
            }
            .await;
            respond(result, "Training error")
        }
        (&Method::GET, ["train", "projects"]) => {
            respond(cv.list_projects().await, "Error listing projects")
        }
        (&Method::GET, ["train", "projects", name]) => {
            respond(cv.get_project(name).await, "Error getting project")
        }
        (&Method::POST, ["train", "resume"]) => {
            let params = Params::from_query(req.uri().query());
            let result = async {
                let opts = ResumeOptions {
                    checkpoint_path: params.require("checkpoint_path")?.to_string(),
                    epochs: params.parse("epochs")?,
                    strategy_file: params.string("strategy_file"),
                };
                cv.resume_training(&opts).await
            }
            .await;
            respond(result, "Resume training error")
        }
        (&Method::GET, ["strategies"]) => {
            respond(cv.list_strategies().await, "Error listing strategies")
        }
        (&Method::POST, ["strategies"]) => {
            let result = async {
                let mut form = read_multipart(req, ctx).await?;
                let strategy = form.take_file("strategy")?;
                let name = form.fields.require("name")?.to_string();
                cv.create_strategy(&name, strategy).await
            }
            .await;
            respond(result, "Error creating strategy")
        }
        _ => not_found(),
    }
}

fn respond<T: Serialize>(result: Result<T>, operation: &str) -> Response<BoxBody> {
    match result {
        Ok(value) => json_response(StatusCode::OK, &value),
        Err(e) => error_response(&e, operation),
    }
}

async fn read_multipart<B>(req: Request<B>, ctx: &AppContext) -> Result<MultipartForm>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let (parts, body) = req.into_parts();
    let bytes = read_bytes(body, ctx.max_upload_bytes).await?;
    MultipartForm::parse(parts.headers.get(CONTENT_TYPE), bytes).await
}

fn detect_options(fields: &Params, allow_save_result: bool) -> Result<DetectOptions> {
    Ok(DetectOptions {
        model: fields.string("model"),
        confidence: fields.parse("confidence")?,
        iou: fields.parse("iou")?,
        save_result: if allow_save_result {
            fields.parse("save_result")?
        } else {
            None
        },
    })
}

fn train_options(fields: &Params) -> Result<TrainOptions> {
    let defaults = TrainOptions::default();
    Ok(TrainOptions {
        base_model: fields.string("base_model").unwrap_or(defaults.base_model),
        epochs: fields.parse("epochs")?.unwrap_or(defaults.epochs),
        batch_size: fields.parse("batch_size")?.unwrap_or(defaults.batch_size),
        img_size: fields.parse("img_size")?.unwrap_or(defaults.img_size),
        device: fields.string("device").unwrap_or(defaults.device),
        project_name: fields.string("project_name"),
        strategy_file: fields.string("strategy_file"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CvServiceConfig;
    use crate::cv::CvClient;
    use http_body_util::{BodyExt, Full};
    use mockito::{Matcher, Server};

    fn context(base_url: &str) -> AppContext {
        let config = CvServiceConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            allowed_path_roots: Vec::new(),
        };
        AppContext::new(CvClient::new(&config).unwrap())
    }

    fn empty(method: Method, uri: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn call(ctx: &AppContext, req: Request<Full<Bytes>>) -> (StatusCode, serde_json::Value) {
        let path = req.uri().path().to_string();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let response = handle(req, ctx, &segments).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_train_options_from_fields() {
        let params = Params::from_query(Some("epochs=5&device=cuda&project_name=birds"));
        let opts = train_options(&params).unwrap();
        assert_eq!(opts.epochs, 5);
        assert_eq!(opts.batch_size, 16);
        assert_eq!(opts.device, "cuda");
        assert_eq!(opts.project_name.as_deref(), Some("birds"));
        assert!(opts.strategy_file.is_none());

        let params = Params::from_query(Some("epochs=many"));
        assert!(train_options(&params).is_err());
    }

    #[tokio::test]
    async fn test_models_passthrough() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/models")
            .with_status(200)
            .with_body(r#"{"models": [{"name": "yolov8n.pt", "custom": false}]}"#)
            .create_async()
            .await;

        let ctx = context(&server.url());
        let (status, body) = call(&ctx, empty(Method::GET, "/models")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["models"][0]["name"], "yolov8n.pt");
    }

    #[tokio::test]
    async fn test_missing_model_is_not_found() {
        let mut server = Server::new_async().await;
        server
            .mock("DELETE", "/models/ghost.pt")
            .with_status(404)
            .with_body(r#"{"detail": "Model not found"}"#)
            .create_async()
            .await;

        let ctx = context(&server.url());
        let (status, body) = call(&ctx, empty(Method::DELETE, "/models/ghost.pt")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["detail"].as_str().unwrap().contains("Model not found"));
    }

    #[tokio::test]
    async fn test_train_from_folder_requires_dataset_path() {
        let ctx = context("http://127.0.0.1:9");
        let (status, body) = call(&ctx, empty(Method::POST, "/train/from-folder")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Missing required parameter: dataset_path");
    }

    #[tokio::test]
    async fn test_resume_forwards_query() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/train/resume")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("checkpoint_path".into(), "runs/birds/last.pt".into()),
                Matcher::UrlEncoded("epochs".into(), "20".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"status": "resumed"}"#)
            .create_async()
            .await;

        let ctx = context(&server.url());
        let (status, body) = call(
            &ctx,
            empty(Method::POST, "/train/resume?checkpoint_path=runs%2Fbirds%2Flast.pt&epochs=20"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "resumed");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_detect_without_multipart_is_bad_request() {
        let ctx = context("http://127.0.0.1:9");
        let req = Request::builder()
            .method(Method::POST)
            .uri("/detect")
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from_static(b"{}")))
            .unwrap();

        let (status, _) = call(&ctx, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
