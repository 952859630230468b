// 上传任务定义

use crate::client::UploadResponse;
use crate::error::UploadError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// 平台接受的文件类型（MIME）
///
/// 头像/相册图片、视频、医疗文档与聊天附件
pub const RECOGNIZED_FILE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "video/mp4",
    "video/quicktime",
    "audio/mpeg",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/plain",
];

/// 文件类型是否被平台接受
pub fn is_recognized_file_type(file_type: &str) -> bool {
    RECOGNIZED_FILE_TYPES.contains(&file_type)
}

/// 上传任务状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadTaskStatus {
    /// 等待中
    Pending,
    /// 上传中
    Uploading,
    /// 已暂停
    Paused,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl UploadTaskStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadTaskStatus::Completed | UploadTaskStatus::Failed | UploadTaskStatus::Cancelled
        )
    }
}

/// 上传任务
///
/// 每个文件一条记录：入队时创建，由调度器推进状态，
/// 成功后移入已上传文件登记表并从活跃列表移除
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTask {
    /// 任务ID
    pub id: String,
    /// 本地文件路径
    pub local_path: PathBuf,
    /// 文件名
    pub file_name: String,
    /// 文件类型（MIME）
    pub file_type: String,
    /// 文件大小
    pub total_size: u64,
    /// 已上传大小
    pub uploaded_size: u64,
    /// 任务状态
    pub status: UploadTaskStatus,
    /// 上传速度 (bytes/s)
    pub speed: u64,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 开始时间 (Unix timestamp)
    pub started_at: Option<i64>,
    /// 完成时间 (Unix timestamp)，仅终态
    pub completed_at: Option<i64>,
    /// 成功响应，仅 Completed 状态
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<UploadResponse>,
    /// 错误信息，仅 Failed / Cancelled 状态
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    // === 分片模式字段 ===
    /// 是否分片上传
    #[serde(default)]
    pub use_chunk_upload: bool,
    /// 总分片数
    #[serde(default)]
    pub total_chunks: usize,
    /// 已完成分片数
    #[serde(default)]
    pub completed_chunks: usize,
    /// 文件指纹（断点续传的稳定键）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_identifier: Option<String>,
    /// 重试次数
    #[serde(default)]
    pub retries: u32,
    /// 分片大小
    #[serde(default)]
    pub chunk_size: u64,

    // === 文件夹批量上传字段 ===
    /// 相对于批量上传根目录的路径
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
}

impl UploadTask {
    /// 创建新的上传任务
    ///
    /// 入队校验：文件非空、类型被平台接受
    pub fn new(
        local_path: PathBuf,
        file_name: String,
        file_type: String,
        total_size: u64,
    ) -> Result<Self, UploadError> {
        if total_size == 0 {
            return Err(UploadError::validation(format!(
                "文件为空: {}",
                file_name
            )));
        }
        if !is_recognized_file_type(&file_type) {
            return Err(UploadError::validation(format!(
                "不支持的文件类型: {}",
                file_type
            )));
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            local_path,
            file_name,
            file_type,
            total_size,
            uploaded_size: 0,
            status: UploadTaskStatus::Pending,
            speed: 0,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
            response: None,
            error: None,
            use_chunk_upload: false,
            total_chunks: 0,
            completed_chunks: 0,
            file_identifier: None,
            retries: 0,
            chunk_size: 0,
            relative_path: None,
        })
    }

    /// 配置分片模式
    pub fn set_chunk_mode(
        &mut self,
        total_chunks: usize,
        chunk_size: u64,
        file_identifier: String,
    ) {
        self.use_chunk_upload = true;
        self.total_chunks = total_chunks;
        self.chunk_size = chunk_size;
        self.file_identifier = Some(file_identifier);
    }

    /// 计算进度百分比（0-100，向下取整）
    ///
    /// 分片模式按已完成分片数计算，整文件模式按字节计算
    pub fn progress(&self) -> u8 {
        if self.status == UploadTaskStatus::Completed {
            return 100;
        }
        if self.use_chunk_upload {
            if self.total_chunks == 0 {
                return 0;
            }
            (100 * self.completed_chunks / self.total_chunks) as u8
        } else {
            if self.total_size == 0 {
                return 0;
            }
            (self.uploaded_size * 100 / self.total_size) as u8
        }
    }

    /// 估算剩余时间 (秒)
    pub fn eta(&self) -> Option<u64> {
        if self.speed == 0 || self.uploaded_size >= self.total_size {
            return None;
        }
        let remaining = self.total_size - self.uploaded_size;
        Some(remaining / self.speed)
    }

    /// 标记为上传中
    pub fn mark_uploading(&mut self) {
        self.status = UploadTaskStatus::Uploading;
        self.error = None;
        if self.started_at.is_none() {
            self.started_at = Some(chrono::Utc::now().timestamp());
        }
    }

    /// 标记为已暂停
    pub fn mark_paused(&mut self) {
        self.status = UploadTaskStatus::Paused;
    }

    /// 标记为已完成
    pub fn mark_completed(&mut self, response: UploadResponse) {
        self.status = UploadTaskStatus::Completed;
        self.completed_at = Some(chrono::Utc::now().timestamp());
        self.uploaded_size = self.total_size;
        self.completed_chunks = self.total_chunks;
        self.response = Some(response);
        self.error = None;
    }

    /// 标记为失败
    pub fn mark_failed(&mut self, error: String) {
        self.status = UploadTaskStatus::Failed;
        self.completed_at = Some(chrono::Utc::now().timestamp());
        self.error = Some(error);
    }

    /// 标记为已取消
    pub fn mark_cancelled(&mut self) {
        self.status = UploadTaskStatus::Cancelled;
        self.completed_at = Some(chrono::Utc::now().timestamp());
        self.error = Some("任务已取消".to_string());
    }

    /// 失败后是否还可重试
    pub fn can_retry(&self, retry_limit: u32) -> bool {
        self.status == UploadTaskStatus::Failed && self.retries < retry_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task(size: u64) -> UploadTask {
        UploadTask::new(
            PathBuf::from("./photos/buddy.jpg"),
            "buddy.jpg".to_string(),
            "image/jpeg".to_string(),
            size,
        )
        .unwrap()
    }

    fn sample_response() -> UploadResponse {
        UploadResponse {
            file_id: "f1".to_string(),
            url: "https://files.example.com/f1".to_string(),
            file_name: "buddy.jpg".to_string(),
            file_size: 1024,
            file_type: "image/jpeg".to_string(),
            upload_time: 1700000000,
            thumbnail_url: None,
            storage_path: None,
        }
    }

    #[test]
    fn test_task_creation() {
        let task = sample_task(1024 * 1024);
        assert_eq!(task.status, UploadTaskStatus::Pending);
        assert_eq!(task.uploaded_size, 0);
        assert_eq!(task.progress(), 0);
        assert!(task.started_at.is_none());
        assert!(!task.use_chunk_upload);
    }

    #[test]
    fn test_empty_file_rejected() {
        let result = UploadTask::new(
            PathBuf::from("./empty.jpg"),
            "empty.jpg".to_string(),
            "image/jpeg".to_string(),
            0,
        );
        assert!(matches!(result, Err(UploadError::Validation(_))));
    }

    #[test]
    fn test_unrecognized_type_rejected() {
        let result = UploadTask::new(
            PathBuf::from("./run.exe"),
            "run.exe".to_string(),
            "application/x-msdownload".to_string(),
            1024,
        );
        assert!(matches!(result, Err(UploadError::Validation(_))));
    }

    #[test]
    fn test_progress_whole_file() {
        let mut task = sample_task(1000);
        task.uploaded_size = 250;
        assert_eq!(task.progress(), 25);

        task.uploaded_size = 999;
        assert_eq!(task.progress(), 99);
    }

    #[test]
    fn test_progress_chunked_floor() {
        let mut task = sample_task(3 * 1024 * 1024);
        task.set_chunk_mode(3, 1024 * 1024, "abc".to_string());

        assert_eq!(task.progress(), 0);
        task.completed_chunks = 1;
        assert_eq!(task.progress(), 33); // floor(100/3)
        task.completed_chunks = 2;
        assert_eq!(task.progress(), 66);
    }

    #[test]
    fn test_status_transitions() {
        let mut task = sample_task(1000);

        task.mark_uploading();
        assert_eq!(task.status, UploadTaskStatus::Uploading);
        assert!(task.started_at.is_some());

        task.mark_paused();
        assert_eq!(task.status, UploadTaskStatus::Paused);

        task.mark_failed("网络错误".to_string());
        assert_eq!(task.status, UploadTaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("网络错误"));
        assert!(task.completed_at.is_some());
        assert!(task.status.is_terminal());
    }

    #[test]
    fn test_completed_invariant() {
        // Completed ⟺ progress=100 ∧ response 有值 ∧ error 为空
        let mut task = sample_task(1000);
        task.mark_uploading();
        task.mark_failed("先失败一次".to_string());

        task.mark_uploading();
        task.mark_completed(sample_response());
        assert_eq!(task.status, UploadTaskStatus::Completed);
        assert_eq!(task.progress(), 100);
        assert_eq!(task.uploaded_size, task.total_size);
        assert!(task.response.is_some());
        assert!(task.error.is_none());
    }

    #[test]
    fn test_cancelled_is_terminal_error_variant() {
        let mut task = sample_task(1000);
        task.mark_uploading();
        task.mark_cancelled();
        assert_eq!(task.status, UploadTaskStatus::Cancelled);
        assert!(task.status.is_terminal());
        assert!(task.error.is_some());
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_can_retry() {
        let mut task = sample_task(1000);
        assert!(!task.can_retry(3)); // Pending 状态不可重试

        task.mark_uploading();
        task.retries = 2;
        task.mark_failed("err".to_string());
        assert!(task.can_retry(3));

        task.retries = 3;
        assert!(!task.can_retry(3));
    }

    #[test]
    fn test_eta_calculation() {
        let mut task = sample_task(1000);
        task.uploaded_size = 200;
        task.speed = 100;
        assert_eq!(task.eta(), Some(8));

        task.speed = 0;
        assert_eq!(task.eta(), None);
    }
}
