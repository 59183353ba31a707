use crate::config::CvServiceConfig;
use crate::cv::types::{
    DetectOptions, DetectionResponse, ResumeOptions, TrainOptions, TrainingResponse, UploadedFile,
};
use crate::error::RelayGateError;
use crate::Result;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// CV 服务客户端
///
/// 每个操作只发一次请求，不重试。连接失败、超时和非 2xx 响应分别映射为
/// `ServiceUnavailable`、`Timeout` 和 `RemoteError`。
#[derive(Debug, Clone)]
pub struct CvClient {
    client: Client,
    base_url: Url,
    allowed_roots: Vec<PathBuf>,
}

impl CvClient {
    pub fn new(config: &CvServiceConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            RelayGateError::config(format!("Invalid CV service URL {}: {}", config.base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(RelayGateError::config(format!(
                "Invalid CV service URL: {}",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            allowed_roots: config.allowed_path_roots.iter().map(PathBuf::from).collect(),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// 探活，永不失败；异常时返回 `{"status": "unhealthy", "error": ...}`
    pub async fn health(&self) -> Value {
        let url = match self.endpoint(&["health"]) {
            Ok(url) => url,
            Err(e) => return json!({ "status": "unhealthy", "error": e.to_string() }),
        };

        let response = match self.client.get(url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("CV 服务探活失败: {}", e);
                return json!({ "status": "unhealthy", "error": e.to_string() });
            }
        };

        let status = response.status();
        if !status.is_success() {
            return json!({ "status": "unhealthy", "error": format!("HTTP {}", status.as_u16()) });
        }

        match response.json::<Value>().await {
            Ok(body) => body,
            Err(e) => json!({ "status": "unhealthy", "error": e.to_string() }),
        }
    }

    pub async fn detect(
        &self,
        file: UploadedFile,
        opts: &DetectOptions,
    ) -> Result<DetectionResponse> {
        let mut form = Form::new().part("file", file_part(file, "image/jpeg")?);
        for (name, value) in opts.form_fields() {
            form = form.text(name, value);
        }

        let request = self.client.post(self.endpoint(&["detect"])?).multipart(form);
        self.execute_json(request, "detection").await
    }

    pub async fn detect_batch(&self, files: Vec<UploadedFile>, opts: &DetectOptions) -> Result<Value> {
        if files.is_empty() {
            return Err(RelayGateError::bad_request("At least one file is required"));
        }

        let mut form = Form::new();
        for file in files {
            form = form.part("files", file_part(file, "image/jpeg")?);
        }
        for (name, value) in opts.form_fields() {
            // 批量检测不支持 save_result
            if name != "save_result" {
                form = form.text(name, value);
            }
        }

        let request = self
            .client
            .post(self.endpoint(&["detect", "batch"])?)
            .multipart(form);
        self.execute_json(request, "batch detection").await
    }

    pub async fn list_models(&self) -> Result<Value> {
        let request = self.client.get(self.endpoint(&["models"])?);
        self.execute_json(request, "listing models").await
    }

    pub async fn model_info(&self, model_name: &str) -> Result<Value> {
        let request = self.client.get(self.endpoint(&["models", model_name, "info"])?);
        self.execute_json(request, "model info").await
    }

    pub async fn model_status(&self, model_name: &str) -> Result<Value> {
        let request = self.client.get(self.endpoint(&["models", model_name, "status"])?);
        self.execute_json(request, "model status check").await
    }

    pub async fn delete_model(&self, model_name: &str) -> Result<Value> {
        let request = self.client.delete(self.endpoint(&["models", model_name])?);
        self.execute_json(request, "model deletion").await
    }

    /// 上传 zip 数据集并训练
    pub async fn train_upload(
        &self,
        dataset: UploadedFile,
        opts: &TrainOptions,
    ) -> Result<TrainingResponse> {
        if let Some(strategy_file) = &opts.strategy_file {
            self.check_server_path(strategy_file)?;
        }

        let mut form = Form::new().part("dataset", file_part(dataset, "application/zip")?);
        for (name, value) in opts.form_fields() {
            form = form.text(name, value);
        }

        let request = self.client.post(self.endpoint(&["train"])?).multipart(form);
        self.execute_json(request, "training").await
    }

    /// 使用 CV 服务本地已有的数据集目录训练
    pub async fn train_from_folder(
        &self,
        dataset_path: &str,
        opts: &TrainOptions,
    ) -> Result<TrainingResponse> {
        self.check_server_path(dataset_path)?;
        if let Some(strategy_file) = &opts.strategy_file {
            self.check_server_path(strategy_file)?;
        }

        let mut params = vec![("dataset_path", dataset_path.to_string())];
        params.extend(opts.form_fields());

        let request = self
            .client
            .post(self.endpoint(&["train", "from-folder"])?)
            .query(&params);
        self.execute_json(request, "training").await
    }

    pub async fn list_projects(&self) -> Result<Value> {
        let request = self.client.get(self.endpoint(&["train", "projects"])?);
        self.execute_json(request, "listing projects").await
    }

    pub async fn get_project(&self, project_name: &str) -> Result<Value> {
        let request = self
            .client
            .get(self.endpoint(&["train", "projects", project_name])?);
        self.execute_json(request, "project lookup").await
    }

    pub async fn resume_training(&self, opts: &ResumeOptions) -> Result<Value> {
        self.check_server_path(&opts.checkpoint_path)?;
        if let Some(strategy_file) = &opts.strategy_file {
            self.check_server_path(strategy_file)?;
        }

        let request = self
            .client
            .post(self.endpoint(&["train", "resume"])?)
            .query(&opts.query_params());
        self.execute_json(request, "resume training").await
    }

    pub async fn list_strategies(&self) -> Result<Value> {
        let request = self.client.get(self.endpoint(&["strategies"])?);
        self.execute_json(request, "listing strategies").await
    }

    pub async fn create_strategy(&self, name: &str, strategy: UploadedFile) -> Result<Value> {
        if name.trim().is_empty() {
            return Err(RelayGateError::bad_request("Strategy name must not be empty"));
        }

        let form = Form::new()
            .text("name", name.to_string())
            .part("strategy", file_part(strategy, "application/x-yaml")?);

        let request = self.client.post(self.endpoint(&["strategies"])?).multipart(form);
        self.execute_json(request, "strategy upload").await
    }

    /// 调用方给出的服务端路径做词法检查：不允许 `..`，
    /// 配置了允许根目录时绝对路径必须落在其中之一
    pub fn check_server_path(&self, path: &str) -> Result<()> {
        if path.trim().is_empty() {
            return Err(RelayGateError::bad_request("Path must not be empty"));
        }

        let candidate = Path::new(path);
        if candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(RelayGateError::bad_request(format!(
                "Path must not contain '..': {}",
                path
            )));
        }

        if candidate.is_absolute()
            && !self.allowed_roots.is_empty()
            && !self.allowed_roots.iter().any(|root| candidate.starts_with(root))
        {
            return Err(RelayGateError::bad_request(format!(
                "Path is outside the allowed directories: {}",
                path
            )));
        }

        Ok(())
    }

    /// 逐段追加路径，段内的 `/` 等字符会被转义
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        if let Some(bad) = segments.iter().find(|s| matches!(**s, "" | "." | "..")) {
            return Err(RelayGateError::bad_request(format!("Invalid name: {:?}", bad)));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RelayGateError::config(format!("Invalid CV service URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn classify(&self, err: reqwest::Error, operation: &str) -> RelayGateError {
        if err.is_timeout() {
            RelayGateError::Timeout(format!("CV service request timed out during {}", operation))
        } else if err.is_connect() {
            RelayGateError::ServiceUnavailable(format!(
                "Cannot connect to CV service at {}. Please ensure the CV service is running.",
                self.base_url
            ))
        } else {
            RelayGateError::HttpError(err)
        }
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &str,
    ) -> Result<T> {
        debug!("CV 服务请求: {}", operation);

        let response = request
            .send()
            .await
            .map_err(|e| self.classify(e, operation))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.classify(e, operation))?;

        if !status.is_success() {
            return Err(RelayGateError::RemoteError {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        serde_json::from_slice(&body).map_err(|e| {
            RelayGateError::internal(format!(
                "CV service returned an unexpected payload during {}: {}",
                operation, e
            ))
        })
    }
}

fn file_part(file: UploadedFile, default_mime: &str) -> Result<Part> {
    let mime = file
        .content_type
        .clone()
        .unwrap_or_else(|| default_mime.to_string());
    let length = file.data.len() as u64;

    Part::stream_with_length(file.data, length)
        .file_name(file.file_name)
        .mime_str(&mime)
        .map_err(|e| RelayGateError::bad_request(format!("Invalid content type {}: {}", mime, e)))
}
