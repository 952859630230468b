// 上传引擎模块
//
// 组成：
// - task: 任务状态机
// - chunk: 分片计划与进度账目
// - engine: 单任务传输驱动（整文件/分片，退避重试）
// - manager: 队列与并发槽位调度
// - registry: 已上传文件登记表
// - resume: 断点续传存储
// - folder: 目录批量入队

pub mod chunk;
pub mod engine;
pub mod folder;
pub mod manager;
pub mod registry;
pub mod resume;
pub mod task;

pub use chunk::{
    calculate_recommended_chunk_size, ChunkPlan, UploadChunk, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE,
};
pub use engine::UploadEngine;
pub use folder::{file_type_from_extension, FolderScanner, ScanOptions, ScannedFile};
pub use manager::{TaskHandle, UploadManager};
pub use registry::{UploadedFile, UploadedFileRegistry};
pub use resume::{compute_file_identifier, ResumeEntry, ResumeStore};
pub use task::{is_recognized_file_type, UploadTask, UploadTaskStatus, RECOGNIZED_FILE_TYPES};
