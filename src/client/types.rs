// 文件服务接口类型定义

use serde::{Deserialize, Serialize};

/// 上传完成响应
///
/// 整文件上传成功或最后一个分片合并完成后，由文件服务返回
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    /// 文件 ID
    pub file_id: String,
    /// 访问 URL
    pub url: String,
    /// 文件名
    pub file_name: String,
    /// 文件大小（字节）
    pub file_size: u64,
    /// 文件类型（MIME）
    pub file_type: String,
    /// 上传完成时间 (Unix timestamp)
    pub upload_time: i64,
    /// 缩略图 URL（图片/视频类文件）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// 服务端存储路径
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
}

/// 分片上传确认
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkAck {
    /// 分片索引（从 0 开始）
    pub chunk_index: usize,
    /// 服务端返回的分片校验值（合并时回传）
    pub etag: String,
}

/// 接口响应包装
///
/// 文件服务统一返回 `{ code, message, data }`，code 为 0 表示成功
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i32,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// 是否成功
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// 传输错误分类
///
/// 用于决定单次传输失败后是否进入重试
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferErrorKind {
    /// 网络错误（可重试）
    Network,
    /// 超时（可重试）
    Timeout,
    /// 服务器错误（可重试）
    ServerError,
    /// 限流（可重试，需要更长等待时间）
    RateLimited,
    /// 参数错误（不可重试）
    BadRequest,
    /// 存储空间不足（不可重试）
    QuotaExceeded,
    /// 文件类型不被服务端接受（不可重试）
    UnsupportedType,
    /// 未知错误
    Unknown,
}

impl TransferErrorKind {
    /// 是否可重试
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            TransferErrorKind::Network
                | TransferErrorKind::Timeout
                | TransferErrorKind::ServerError
                | TransferErrorKind::RateLimited
        )
    }

    /// 根据 HTTP 状态码分类
    pub fn from_status(status: u16) -> Self {
        match status {
            408 => TransferErrorKind::Timeout,
            415 => TransferErrorKind::UnsupportedType,
            429 => TransferErrorKind::RateLimited,
            400..=499 => TransferErrorKind::BadRequest,
            500..=599 => TransferErrorKind::ServerError,
            _ => TransferErrorKind::Unknown,
        }
    }

    /// 根据业务错误码分类
    ///
    /// 文件服务约定：1xx 参数类，2xx 容量类，5xx 服务端临时故障
    pub fn from_code(code: i32) -> Self {
        match code {
            100..=199 => TransferErrorKind::BadRequest,
            201 => TransferErrorKind::QuotaExceeded,
            202 => TransferErrorKind::UnsupportedType,
            429 => TransferErrorKind::RateLimited,
            500..=599 => TransferErrorKind::ServerError,
            _ => TransferErrorKind::Unknown,
        }
    }
}

impl std::fmt::Display for TransferErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TransferErrorKind::Network => "网络错误",
            TransferErrorKind::Timeout => "超时",
            TransferErrorKind::ServerError => "服务器错误",
            TransferErrorKind::RateLimited => "限流",
            TransferErrorKind::BadRequest => "参数错误",
            TransferErrorKind::QuotaExceeded => "存储空间不足",
            TransferErrorKind::UnsupportedType => "文件类型不支持",
            TransferErrorKind::Unknown => "未知错误",
        };
        write!(f, "{}", label)
    }
}

/// 单次传输失败
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransferFailure {
    /// 错误分类
    pub kind: TransferErrorKind,
    /// 错误描述
    pub message: String,
}

impl TransferFailure {
    pub fn new(kind: TransferErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// 网络类失败
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::Network, message)
    }

    /// 是否可重试
    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}
