// 断点续传状态存储
//
// 以文件指纹为键记录已确认的分片，任务失败后重新入队时
// 从上次确认的位置继续，而不是从 0 重新上传

use anyhow::{Context, Result};
use bit_set::BitSet;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// 指纹计算的读取缓冲区大小
const HASH_BUF_SIZE: usize = 256 * 1024;

/// 计算文件指纹
///
/// 流式 MD5 + 文件大小，同一内容重复入队时指纹稳定
pub async fn compute_file_identifier(path: &Path) -> Result<String> {
    let mut file = File::open(path).await.context("打开文件计算指纹失败")?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; HASH_BUF_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = file.read(&mut buffer).await.context("读取文件计算指纹失败")?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
        total += n as u64;
    }

    let digest = context.compute();
    Ok(format!("{:x}-{}", digest, total))
}

/// 单个文件的续传记录
#[derive(Debug, Clone)]
pub struct ResumeEntry {
    /// 总分片数
    pub total_chunks: usize,
    /// 分片大小
    pub chunk_size: u64,
    /// 已确认的分片位图
    pub completed: BitSet,
    /// 已确认分片的校验值（index, etag）
    pub etags: Vec<(usize, String)>,
}

impl ResumeEntry {
    /// 已确认的分片数
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }
}

/// 续传记录的序列化形式
#[derive(Debug, Serialize, Deserialize)]
struct ResumeEntrySnapshot {
    total_chunks: usize,
    chunk_size: u64,
    completed: Vec<usize>,
    etags: Vec<(usize, String)>,
}

/// 断点续传存储
///
/// 内存表 + 可选的 JSON 快照文件
#[derive(Debug, Default)]
pub struct ResumeStore {
    entries: DashMap<String, ResumeEntry>,
}

impl ResumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一个已确认的分片
    pub fn record_chunk(
        &self,
        file_identifier: &str,
        total_chunks: usize,
        chunk_size: u64,
        chunk_index: usize,
        etag: String,
    ) {
        let mut entry = self
            .entries
            .entry(file_identifier.to_string())
            .or_insert_with(|| ResumeEntry {
                total_chunks,
                chunk_size,
                completed: BitSet::with_capacity(total_chunks),
                etags: Vec::new(),
            });

        if entry.completed.insert(chunk_index) {
            entry.etags.push((chunk_index, etag));
        }
    }

    /// 查询续传记录
    ///
    /// 分片参数不一致的记录无法复用（分片边界变了），按无记录处理
    pub fn lookup(
        &self,
        file_identifier: &str,
        total_chunks: usize,
        chunk_size: u64,
    ) -> Option<ResumeEntry> {
        let entry = self.entries.get(file_identifier)?;
        if entry.total_chunks != total_chunks || entry.chunk_size != chunk_size {
            debug!(
                "续传记录分片参数不一致，忽略: identifier={}, 记录={}片/{}B, 当前={}片/{}B",
                file_identifier, entry.total_chunks, entry.chunk_size, total_chunks, chunk_size
            );
            return None;
        }
        if entry.completed_count() == 0 {
            return None;
        }
        Some(entry.clone())
    }

    /// 清除记录（任务成功后调用）
    pub fn clear(&self, file_identifier: &str) {
        self.entries.remove(file_identifier);
    }

    /// 记录条数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 保存快照到 JSON 文件
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let snapshot: HashMap<String, ResumeEntrySnapshot> = self
            .entries
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    ResumeEntrySnapshot {
                        total_chunks: entry.total_chunks,
                        chunk_size: entry.chunk_size,
                        completed: entry.completed.iter().collect(),
                        etags: entry.etags.clone(),
                    },
                )
            })
            .collect();

        let content = serde_json::to_string(&snapshot).context("序列化续传快照失败")?;
        tokio::fs::write(path, content)
            .await
            .context("写入续传快照失败")?;

        info!("续传快照已保存: {:?}, 条数={}", path, snapshot.len());
        Ok(())
    }

    /// 从 JSON 文件加载快照
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .context("读取续传快照失败")?;
        let snapshot: HashMap<String, ResumeEntrySnapshot> =
            serde_json::from_str(&content).context("解析续传快照失败")?;

        let store = Self::new();
        for (identifier, entry) in snapshot {
            let mut completed = BitSet::with_capacity(entry.total_chunks);
            for index in entry.completed {
                completed.insert(index);
            }
            store.entries.insert(
                identifier,
                ResumeEntry {
                    total_chunks: entry.total_chunks,
                    chunk_size: entry.chunk_size,
                    completed,
                    etags: entry.etags,
                },
            );
        }

        info!("续传快照已加载: {:?}, 条数={}", path, store.len());
        Ok(store)
    }
}
