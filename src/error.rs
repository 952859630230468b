// 上传错误类型定义
//
// 队列层错误（入队校验、状态控制）通过 Result 直接返回；
// 传输层的最终失败只写入任务的 error 字段，不向调用方抛出

use crate::client::TransferFailure;
use thiserror::Error;

/// 上传错误
#[derive(Debug, Error)]
pub enum UploadError {
    /// 队列已满，入队被拒绝
    #[error("上传队列已满: {current}/{limit}")]
    QueueFull { current: usize, limit: usize },

    /// 入队时文件校验失败（空文件、未识别的文件类型等）
    #[error("文件校验失败: {0}")]
    Validation(String),

    /// 指定任务不存在
    #[error("任务不存在: {0}")]
    TaskNotFound(String),

    /// 任务当前状态不允许该操作
    #[error("任务状态不允许该操作: {0}")]
    InvalidState(String),

    /// 单次传输请求失败
    #[error("传输失败: {0}")]
    Transfer(#[from] TransferFailure),

    /// 重试次数耗尽
    #[error("重试次数耗尽 ({retries}/{limit}): {message}")]
    RetryExhausted {
        retries: u32,
        limit: u32,
        message: String,
    },

    /// 任务已取消
    #[error("任务已取消")]
    Cancelled,

    /// 本地文件读取失败
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// 构造校验错误
    pub fn validation(msg: impl Into<String>) -> Self {
        UploadError::Validation(msg.into())
    }

    /// 构造状态错误
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        UploadError::InvalidState(msg.into())
    }
}
