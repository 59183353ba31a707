use crate::cv::UploadedFile;
use crate::error::RelayGateError;
use crate::server::params::Params;
use crate::server::response::BoxError;
use crate::Result;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::HeaderValue;
use serde::de::DeserializeOwned;
use std::convert::Infallible;

/// 读取完整请求体，超过上限时返回 BadRequest
pub async fn read_bytes<B>(body: B, limit: u64) -> Result<Bytes>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(RelayGateError::bad_request(format!(
            "Request body exceeds the maximum size of {} bytes",
            limit
        ))),
        Err(e) => Err(RelayGateError::bad_request(format!(
            "Failed to read request body: {}",
            e
        ))),
    }
}

pub async fn read_json<B, T>(body: B, limit: u64) -> Result<T>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
    T: DeserializeOwned,
{
    let bytes = read_bytes(body, limit).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// 解析后的 multipart 表单：带文件名的字段是文件，其余是文本
#[derive(Debug, Default)]
pub struct MultipartForm {
    files: Vec<(String, UploadedFile)>,
    pub fields: Params,
}

impl MultipartForm {
    pub async fn parse(content_type: Option<&HeaderValue>, body: Bytes) -> Result<Self> {
        let content_type = content_type
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| RelayGateError::bad_request("Expected a multipart/form-data body"))?;
        let boundary = multer::parse_boundary(content_type).map_err(invalid_multipart)?;

        let stream = futures_util::stream::once(async move { Ok::<Bytes, Infallible>(body) });
        let mut multipart = multer::Multipart::new(stream, boundary);

        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(invalid_multipart)? {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field.content_type().map(|mime| mime.to_string());
                    let data = field.bytes().await.map_err(invalid_multipart)?;
                    form.files
                        .push((name, UploadedFile::new(file_name, content_type, data)));
                }
                None => {
                    let text = field.text().await.map_err(invalid_multipart)?;
                    form.fields.insert(name, text);
                }
            }
        }

        Ok(form)
    }

    /// 取出必填的单个文件字段
    pub fn take_file(&mut self, name: &str) -> Result<UploadedFile> {
        let index = self
            .files
            .iter()
            .position(|(field, _)| field == name)
            .ok_or_else(|| RelayGateError::bad_request(format!("Missing file field: {}", name)))?;
        Ok(self.files.remove(index).1)
    }

    /// 取出同名的全部文件字段
    pub fn take_files(&mut self, name: &str) -> Vec<UploadedFile> {
        let (matched, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|(field, _)| field == name);
        self.files = rest;
        matched.into_iter().map(|(_, file)| file).collect()
    }
}

fn invalid_multipart(err: multer::Error) -> RelayGateError {
    RelayGateError::bad_request(format!("Invalid multipart body: {}", err))
}
