use hyper::body::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_BASE_MODEL: &str = "yolov8n.pt";
pub const DEFAULT_EPOCHS: u32 = 100;
pub const DEFAULT_BATCH_SIZE: u32 = 16;
pub const DEFAULT_IMG_SIZE: u32 = 640;
pub const DEFAULT_DEVICE: &str = "cpu";

/// 像素坐标边框
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segmentation {
    #[serde(default)]
    pub polygon: Vec<[f64; 2]>,
    #[serde(default)]
    pub mask_available: bool,
}

/// 单个检测目标
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    pub id: i64,
    pub class_id: i64,
    pub class_name: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation: Option<Segmentation>,
}

/// 检测结果；CV 服务返回的其他字段原样保留
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionResponse {
    pub image_path: String,
    #[serde(default)]
    pub annotated_path: Option<String>,
    pub detections: Vec<Detection>,
    pub num_detections: usize,
    pub model: String,
    pub confidence_threshold: f64,
    pub iou_threshold: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 训练结果，只保留固定字段
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrainingResponse {
    pub status: String,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub project_dir: Option<String>,
    #[serde(default)]
    pub best_model: Option<String>,
    #[serde(default)]
    pub last_model: Option<String>,
    #[serde(default)]
    pub epochs: Option<u32>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub img_size: Option<u32>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub num_classes: Option<u32>,
    #[serde(default)]
    pub class_names: Option<Vec<String>>,
    #[serde(default)]
    pub dataset_path: Option<String>,
    /// 训练指标（mAP 等），结构由 CV 服务决定
    #[serde(default)]
    pub results: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// 检测参数，None 的字段不发送
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectOptions {
    pub model: Option<String>,
    pub confidence: Option<f64>,
    pub iou: Option<f64>,
    pub save_result: Option<bool>,
}

impl DetectOptions {
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::new();
        if let Some(model) = &self.model {
            fields.push(("model", model.clone()));
        }
        if let Some(confidence) = self.confidence {
            fields.push(("confidence", confidence.to_string()));
        }
        if let Some(iou) = self.iou {
            fields.push(("iou", iou.to_string()));
        }
        if let Some(save_result) = self.save_result {
            fields.push(("save_result", save_result.to_string()));
        }
        fields
    }
}

/// 训练参数
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOptions {
    pub base_model: String,
    pub epochs: u32,
    pub batch_size: u32,
    pub img_size: u32,
    pub device: String,
    pub project_name: Option<String>,
    pub strategy_file: Option<String>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            base_model: DEFAULT_BASE_MODEL.to_string(),
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            img_size: DEFAULT_IMG_SIZE,
            device: DEFAULT_DEVICE.to_string(),
            project_name: None,
            strategy_file: None,
        }
    }
}

impl TrainOptions {
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("base_model", self.base_model.clone()),
            ("epochs", self.epochs.to_string()),
            ("batch_size", self.batch_size.to_string()),
            ("img_size", self.img_size.to_string()),
            ("device", self.device.clone()),
        ];
        if let Some(project_name) = &self.project_name {
            fields.push(("project_name", project_name.clone()));
        }
        if let Some(strategy_file) = &self.strategy_file {
            fields.push(("strategy_file", strategy_file.clone()));
        }
        fields
    }
}

/// 从检查点继续训练
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResumeOptions {
    pub checkpoint_path: String,
    pub epochs: Option<u32>,
    pub strategy_file: Option<String>,
}

impl ResumeOptions {
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("checkpoint_path", self.checkpoint_path.clone())];
        if let Some(epochs) = self.epochs {
            params.push(("epochs", epochs.to_string()));
        }
        if let Some(strategy_file) = &self.strategy_file {
            params.push(("strategy_file", strategy_file.clone()));
        }
        params
    }
}

/// 内存中的上传文件
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, content_type: Option<String>, data: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            content_type,
            data,
        }
    }
}

/// 把 CV 服务的健康检查结果包装成对外格式
pub fn health_report(delegate: Value) -> Value {
    let healthy = delegate.get("status").and_then(Value::as_str) == Some("healthy");
    if healthy {
        serde_json::json!({ "status": "healthy", "cv_service": delegate })
    } else {
        let error = delegate.get("error").cloned().unwrap_or(Value::Null);
        serde_json::json!({ "status": "unhealthy", "cv_service": delegate, "error": error })
    }
}
