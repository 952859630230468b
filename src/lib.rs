// 宠物寄养平台文件上传引擎
//
// 头像、相册、医疗文档与聊天附件统一经由本引擎上传：
// 任务排队、分片传输、指数退避重试、断点续传、完成登记

// 配置管理模块
pub mod config;

// 错误类型
pub mod error;

// 文件服务客户端
pub mod client;

// 上传事件
pub mod events;

// 上传引擎模块
pub mod uploader;

// 日志初始化
pub mod logging;

// 导出常用类型
pub use client::{ChunkAck, HttpStorageClient, StorageClient, TransferErrorKind, TransferFailure, UploadResponse};
pub use config::{AppConfig, LogConfig, UploadConfig};
pub use error::UploadError;
pub use events::{EventBus, ProgressThrottler, UploadEvent};
pub use uploader::{
    ChunkPlan, FolderScanner, ResumeStore, ScanOptions, UploadManager, UploadTask, UploadTaskStatus,
    UploadedFile, UploadedFileRegistry,
};
