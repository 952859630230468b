// HTTP 文件服务客户端
//
// 对接平台文件服务的三个上传接口：
// - POST /api/v1/files/upload          整文件上传（multipart）
// - POST /api/v1/files/chunk           分片上传（multipart）
// - POST /api/v1/files/merge           合并分片（JSON）

use crate::client::types::{
    ApiEnvelope, ChunkAck, TransferErrorKind, TransferFailure, UploadResponse,
};
use crate::client::StorageClient;
use async_trait::async_trait;
use reqwest::multipart;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, info};

/// 默认请求超时（秒）
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// HTTP 文件服务客户端
#[derive(Debug, Clone)]
pub struct HttpStorageClient {
    /// HTTP 客户端
    client: reqwest::Client,
    /// 文件服务基础地址，如 "https://files.example.com"
    base_url: String,
    /// 访问令牌（可选）
    auth_token: Option<String>,
}

impl HttpStorageClient {
    /// 创建新的客户端
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_token(base_url, None)
    }

    /// 创建带访问令牌的客户端
    pub fn with_token(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    /// 组装请求并附加鉴权头
    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(url);
        if let Some(token) = &self.auth_token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        builder
    }

    /// 将 reqwest 错误映射为传输失败
    fn map_request_error(err: reqwest::Error, context: &str) -> TransferFailure {
        let kind = if err.is_timeout() {
            TransferErrorKind::Timeout
        } else if err.is_connect() || err.is_request() {
            TransferErrorKind::Network
        } else {
            TransferErrorKind::Unknown
        };
        TransferFailure::new(kind, format!("{}: {}", context, err))
    }

    /// 解析响应体并检查业务错误码
    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
        context: &str,
    ) -> Result<T, TransferFailure> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Self::map_request_error(e, "读取响应失败"))?;

        if !status.is_success() {
            let kind = TransferErrorKind::from_status(status.as_u16());
            error!("{}: HTTP {} - {}", context, status, body);
            return Err(TransferFailure::new(
                kind,
                format!("{}: HTTP {}", context, status),
            ));
        }

        let envelope: ApiEnvelope<T> = serde_json::from_str(&body).map_err(|e| {
            TransferFailure::new(
                TransferErrorKind::Unknown,
                format!("{}: 解析响应失败: {} (body={})", context, e, body),
            )
        })?;

        if !envelope.is_success() {
            let kind = TransferErrorKind::from_code(envelope.code);
            error!(
                "{}: 业务错误 code={}, message={}, retriable={}",
                context,
                envelope.code,
                envelope.message,
                kind.is_retriable()
            );
            return Err(TransferFailure::new(
                kind,
                format!("{}: {} ({})", context, envelope.message, envelope.code),
            ));
        }

        envelope.data.ok_or_else(|| {
            TransferFailure::new(
                TransferErrorKind::Unknown,
                format!("{}: 响应缺少 data 字段", context),
            )
        })
    }
}

#[async_trait]
impl StorageClient for HttpStorageClient {
    async fn upload_file(
        &self,
        file_name: &str,
        file_type: &str,
        data: Vec<u8>,
    ) -> Result<UploadResponse, TransferFailure> {
        let url = format!("{}/api/v1/files/upload", self.base_url);

        info!(
            "整文件上传: name={}, type={}, size={}",
            file_name,
            file_type,
            data.len()
        );

        let part = multipart::Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str(file_type)
            .map_err(|e| {
                TransferFailure::new(TransferErrorKind::BadRequest, format!("无效的文件类型: {}", e))
            })?;

        let form = multipart::Form::new()
            .part("file", part)
            .text("file_type", file_type.to_string());

        let response = self
            .request(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::map_request_error(e, "整文件上传请求发送失败"))?;

        Self::parse_response(response, "整文件上传").await
    }

    async fn upload_chunk(
        &self,
        file_identifier: &str,
        chunk_index: usize,
        total_chunks: usize,
        data: Vec<u8>,
    ) -> Result<ChunkAck, TransferFailure> {
        let url = format!(
            "{}/api/v1/files/chunk?identifier={}&index={}&total={}",
            self.base_url,
            urlencoding::encode(file_identifier),
            chunk_index,
            total_chunks
        );

        debug!(
            "上传分片: identifier={}, index={}/{}, size={}",
            file_identifier,
            chunk_index,
            total_chunks,
            data.len()
        );

        let part = multipart::Part::bytes(data)
            .file_name("chunk")
            .mime_str("application/octet-stream")
            .map_err(|e| TransferFailure::new(TransferErrorKind::Unknown, e.to_string()))?;

        let form = multipart::Form::new().part("chunk", part);

        let response = self
            .request(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::map_request_error(e, "分片上传请求发送失败"))?;

        let ack: ChunkAck = Self::parse_response(response, "分片上传").await?;

        debug!("分片上传成功: index={}, etag={}", ack.chunk_index, ack.etag);
        Ok(ack)
    }

    async fn finalize(
        &self,
        file_identifier: &str,
        file_name: &str,
        file_type: &str,
        total_size: u64,
        etags: &[String],
    ) -> Result<UploadResponse, TransferFailure> {
        let url = format!("{}/api/v1/files/merge", self.base_url);

        info!(
            "合并分片: identifier={}, name={}, chunks={}",
            file_identifier,
            file_name,
            etags.len()
        );

        let body = json!({
            "file_identifier": file_identifier,
            "file_name": file_name,
            "file_type": file_type,
            "file_size": total_size,
            "etags": etags,
        });

        let response = self
            .request(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::map_request_error(e, "合并分片请求发送失败"))?;

        Self::parse_response(response, "合并分片").await
    }
}
