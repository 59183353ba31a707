//! 计算机视觉服务的转发客户端。推理和训练都在独立的 CV 服务进程中完成。

pub mod client;
pub mod types;

pub use client::CvClient;
pub use types::{
    health_report, DetectOptions, DetectionResponse, ResumeOptions, TrainOptions,
    TrainingResponse, UploadedFile,
};
