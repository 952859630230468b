// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 上传配置
///
/// 进程级策略，创建管理器时读取一次
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 队列容量上限（活跃 + 等待 + 失败的任务总数）
    #[serde(default = "default_queue_limit")]
    pub queue_limit: usize,
    /// 入队后是否立即开始上传
    #[serde(default = "default_auto_upload")]
    pub auto_upload: bool,
    /// 最大同时上传任务数
    #[serde(default = "default_concurrent_uploads")]
    pub concurrent_uploads: usize,
    /// 最大重试次数（任务级 / 分片级）
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// 是否启用分片上传
    #[serde(default = "default_enable_chunk_upload")]
    pub enable_chunk_upload: bool,
    /// 分片上传阈值（字节），超过该大小的文件才会分片
    #[serde(default = "default_chunk_upload_threshold")]
    pub chunk_upload_threshold: u64,
    /// 分片大小（字节）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// 是否启用断点续传
    #[serde(default = "default_enable_resume_upload")]
    pub enable_resume_upload: bool,
    /// 单个任务的最大并发分片数
    #[serde(default = "default_concurrent_chunks")]
    pub concurrent_chunks: usize,
}

fn default_queue_limit() -> usize {
    20
}

fn default_auto_upload() -> bool {
    true
}

fn default_concurrent_uploads() -> usize {
    3
}

fn default_retry_limit() -> u32 {
    3
}

fn default_enable_chunk_upload() -> bool {
    true
}

fn default_chunk_upload_threshold() -> u64 {
    8 * 1024 * 1024 // 8MB
}

fn default_chunk_size() -> u64 {
    4 * 1024 * 1024 // 4MB
}

fn default_enable_resume_upload() -> bool {
    true
}

fn default_concurrent_chunks() -> usize {
    3
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            queue_limit: default_queue_limit(),
            auto_upload: default_auto_upload(),
            concurrent_uploads: default_concurrent_uploads(),
            retry_limit: default_retry_limit(),
            enable_chunk_upload: default_enable_chunk_upload(),
            chunk_upload_threshold: default_chunk_upload_threshold(),
            chunk_size: default_chunk_size(),
            enable_resume_upload: default_enable_resume_upload(),
            concurrent_chunks: default_concurrent_chunks(),
        }
    }
}

impl UploadConfig {
    /// 校验配置取值
    pub fn validate(&self) -> Result<()> {
        if self.queue_limit == 0 {
            anyhow::bail!("queue_limit 必须大于 0");
        }
        if self.concurrent_uploads == 0 {
            anyhow::bail!("concurrent_uploads 必须大于 0");
        }
        if self.concurrent_chunks == 0 {
            anyhow::bail!("concurrent_chunks 必须大于 0");
        }
        if self.enable_chunk_upload && self.chunk_size == 0 {
            anyhow::bail!("启用分片上传时 chunk_size 必须大于 0");
        }
        Ok(())
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    false
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .upload
            .validate()
            .context("配置文件中的上传参数校验失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.upload.validate().context("保存配置失败：上传参数非法")?;

        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, content)
            .await
            .context("写入配置文件失败")?;

        tracing::info!("配置已保存: {}", path);
        Ok(())
    }
}
