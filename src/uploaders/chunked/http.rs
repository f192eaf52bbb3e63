use std::time::Duration;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use url::Url;
use crate::core::{ChunkPayload, ChunkProgress, ChunkTransport, Result, TransportError};
use super::progress_stream::{ProgressStream, split_pieces};

/// multipart 字段名
pub mod form {
    pub const FILE: &str = "file";
    pub const FILE_NAME: &str = "fileName";
    pub const START_TIME: &str = "startTime";
    pub const CATEGORY: &str = "category";
    pub const IS_LAST_CHUNK: &str = "isLastChunk";
}

/// 基于 reqwest 的分片传输
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    token: Option<HeaderValue>,
}

impl HttpTransport {
    pub fn new(endpoint: &str) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            endpoint: Url::parse(endpoint)?,
            token: None,
        })
    }

    /// 每个请求带上 `Authorization` 头
    pub fn with_token(mut self, token: &str) -> Result<Self> {
        let mut value = HeaderValue::from_str(token)?;
        value.set_sensitive(true);
        self.token = Some(value);
        Ok(self)
    }

    /// 单个分片请求的超时
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn build_form(payload: ChunkPayload, progress: ChunkProgress) -> std::result::Result<Form, TransportError> {
        let len = payload.bytes.len() as u64;
        let body = Body::wrap_stream(ProgressStream::new(split_pieces(payload.bytes), progress));
        let part = Part::stream_with_length(body, len)
            .file_name(payload.file_name.clone())
            .mime_str("application/octet-stream")
            .map_err(map_reqwest_error)?;

        Ok(Form::new()
            .part(form::FILE, part)
            .text(form::FILE_NAME, payload.file_name)
            .text(form::START_TIME, payload.start_time.to_string())
            .text(form::CATEGORY, payload.category)
            .text(form::IS_LAST_CHUNK, payload.is_last.to_string()))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    let message = if err.is_timeout() {
        format!("request timeout: {err}")
    } else {
        err.to_string()
    };

    match err.status() {
        Some(status) => TransportError::http(status.as_u16(), message),
        None => TransportError::new(message),
    }
}

/// 从响应体中取出错误说明，JSON 里的 `error` / `message` 优先
pub(crate) fn extract_error(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error", "message", "msg"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return Some(text.to_string());
            }
        }
    }

    Some(body.to_string())
}

#[async_trait]
impl ChunkTransport for HttpTransport {
    async fn send_chunk(
        &self,
        payload: ChunkPayload,
        progress: ChunkProgress,
        cancel: CancellationToken,
    ) -> std::result::Result<(), TransportError> {
        let index = payload.index;
        let form = Self::build_form(payload, progress)?;

        let mut request = self.client.post(self.endpoint.clone()).multipart(form);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, token.clone());
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::cancelled()),
            response = request.send() => response.map_err(map_reqwest_error)?,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("Request failed with status code {}", status.as_u16());
        warn!(chunk = index, status = status.as_u16(), body = %body, "chunk rejected");

        let mut error = TransportError::http(status.as_u16(), message);
        if let Some(detail) = extract_error(&body) {
            error = error.with_payload(detail);
        }
        Err(error)
    }
}
