// 上传事件模块
//
// 进度通过广播通道暴露给调用方；Progress 事件经节流器限频，
// 终态事件（完成/失败/取消）始终发送

pub mod throttle;

pub use throttle::{ProgressThrottler, DEFAULT_THROTTLE_INTERVAL_MS};

use crate::uploader::registry::UploadedFile;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// 事件通道默认容量
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// 上传事件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadEvent {
    /// 任务已入队
    Queued { task_id: String },
    /// 任务开始传输
    Started { task_id: String },
    /// 进度更新
    Progress {
        task_id: String,
        uploaded_size: u64,
        total_size: u64,
        progress: u8,
    },
    /// 任务完成
    Completed {
        task_id: String,
        file: UploadedFile,
    },
    /// 任务失败
    Failed { task_id: String, error: String },
    /// 任务已取消
    Cancelled { task_id: String },
    /// 任务已暂停
    Paused { task_id: String },
    /// 任务已恢复
    Resumed { task_id: String },
}

/// 事件总线
///
/// broadcast 通道的薄封装：无订阅者时发送静默丢弃
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<UploadEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 订阅事件流
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.sender.subscribe()
    }

    /// 发送事件
    ///
    /// 没有活跃订阅者时返回 Err，此处忽略
    pub fn emit(&self, event: UploadEvent) {
        if self.sender.send(event).is_err() {
            debug!("无活跃订阅者，事件被丢弃");
        }
    }

    /// 当前订阅者数量
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
