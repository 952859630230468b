// 上传分片管理
//
// 分片规则：
// - 文件大小 <= 分片上传阈值：整文件直接上传，不经过本模块
// - 超过阈值：按固定分片大小切分为 ceil(size / chunk_size) 片，
//   最后一片允许不足一个分片大小

use anyhow::{Context, Result};
use bit_set::BitSet;
use std::ops::Range;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};

/// 最小分片大小: 256KB
pub const MIN_CHUNK_SIZE: u64 = 256 * 1024;

/// 最大分片大小: 32MB
pub const MAX_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

/// 大文件的目标分片数下限（推荐分片大小计算用）
const TARGET_CHUNKS_MIN: u64 = 50;

/// 大文件的目标分片数上限
const TARGET_CHUNKS_MAX: u64 = 500;

/// 计算推荐的分片大小
///
/// 以配置值为基准，对大文件放大分片避免分片数失控，
/// 结果限制在 256KB-32MB 范围内
pub fn calculate_recommended_chunk_size(file_size: u64, configured_chunk_size: u64) -> u64 {
    let base = configured_chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);

    let estimated_chunks = file_size.div_ceil(base);
    if estimated_chunks <= TARGET_CHUNKS_MAX {
        return base;
    }

    // 分片数过多时按目标下限反推
    let ideal = file_size / TARGET_CHUNKS_MIN;
    ideal.clamp(base, MAX_CHUNK_SIZE)
}

/// 上传分片信息
#[derive(Debug, Clone)]
pub struct UploadChunk {
    /// 分片索引
    pub index: usize,
    /// 字节范围
    pub range: Range<u64>,
    /// 是否已完成
    pub completed: bool,
    /// 是否正在上传（防止重复调度）
    pub uploading: bool,
    /// 重试次数
    pub retries: u32,
    /// 分片校验值（上传后由服务器返回）
    pub etag: Option<String>,
}

impl UploadChunk {
    pub fn new(index: usize, range: Range<u64>) -> Self {
        Self {
            index,
            range,
            completed: false,
            uploading: false,
            retries: 0,
            etag: None,
        }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }

    /// 读取分片数据
    pub async fn read_data(&self, file_path: &Path) -> Result<Vec<u8>> {
        let mut file = File::open(file_path).await.context("打开上传文件失败")?;

        file.seek(std::io::SeekFrom::Start(self.range.start))
            .await
            .context("文件定位失败")?;

        let chunk_size = self.size() as usize;
        let mut buffer = vec![0u8; chunk_size];
        file.read_exact(&mut buffer)
            .await
            .context("读取分片数据失败")?;

        debug!(
            "读取分片 #{}: bytes={}-{}, 大小={} bytes",
            self.index,
            self.range.start,
            self.range.end - 1,
            chunk_size
        );

        Ok(buffer)
    }
}

/// 分片计划
///
/// 持有一个任务的全部分片及其进度状态
#[derive(Debug)]
pub struct ChunkPlan {
    /// 所有分片
    chunks: Vec<UploadChunk>,
    /// 文件总大小
    total_size: u64,
    /// 分片大小
    chunk_size: u64,
}

impl ChunkPlan {
    /// 创建分片计划
    ///
    /// 分片大小会被限制在 256KB-32MB 范围内
    pub fn new(total_size: u64, chunk_size: u64) -> Self {
        let chunk_size = chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE).min(
            // 单片文件无需比文件本身更大的分片
            total_size.max(1),
        );
        let chunks = Self::calculate_chunks(total_size, chunk_size);

        info!(
            "创建分片计划: 文件大小={} bytes, 分片大小={} bytes, 分片数量={}",
            total_size,
            chunk_size,
            chunks.len()
        );
        Self {
            chunks,
            total_size,
            chunk_size,
        }
    }

    /// 计算分片
    fn calculate_chunks(total_size: u64, chunk_size: u64) -> Vec<UploadChunk> {
        let mut chunks = Vec::new();
        let mut offset = 0u64;
        let mut index = 0;

        while offset < total_size {
            let end = std::cmp::min(offset + chunk_size, total_size);
            chunks.push(UploadChunk::new(index, offset..end));
            offset = end;
            index += 1;
        }

        chunks
    }

    /// 取下一个待上传的分片并标记为上传中
    ///
    /// 跳过已完成和正在上传的分片；无可调度分片时返回 None
    pub fn acquire_next(&mut self) -> Option<UploadChunk> {
        let chunk = self
            .chunks
            .iter_mut()
            .find(|c| !c.completed && !c.uploading)?;
        chunk.uploading = true;
        Some(chunk.clone())
    }

    /// 标记分片为已完成
    pub fn mark_completed(&mut self, index: usize, etag: Option<String>) {
        if let Some(chunk) = self.chunks.get_mut(index) {
            chunk.completed = true;
            chunk.uploading = false;
            chunk.etag = etag;
        }
    }

    /// 取消分片上传标记（上传失败时调用）
    pub fn unmark_uploading(&mut self, index: usize) {
        if let Some(chunk) = self.chunks.get_mut(index) {
            chunk.uploading = false;
        }
    }

    /// 清除所有未完成分片的在途标记
    ///
    /// 上一轮传输被中止时在途标记可能残留，重新调度前必须清除
    pub fn reset_inflight(&mut self) {
        for chunk in &mut self.chunks {
            if !chunk.completed {
                chunk.uploading = false;
            }
        }
    }

    /// 增加分片重试次数，返回新值
    pub fn increment_retry(&mut self, index: usize) -> u32 {
        if let Some(chunk) = self.chunks.get_mut(index) {
            chunk.retries += 1;
            chunk.retries
        } else {
            0
        }
    }

    /// 分片数量
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// 已完成的分片数量
    pub fn completed_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.completed).count()
    }

    /// 已上传的字节数
    pub fn uploaded_bytes(&self) -> u64 {
        self.chunks
            .iter()
            .filter(|c| c.completed)
            .map(|c| c.size())
            .sum()
    }

    /// 是否全部完成
    pub fn is_completed(&self) -> bool {
        self.chunks.iter().all(|c| c.completed)
    }

    /// 文件总大小
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// 分片大小
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// 所有分片
    pub fn chunks(&self) -> &[UploadChunk] {
        &self.chunks
    }

    /// 按索引顺序收集分片校验值（合并接口用）
    ///
    /// 存在未完成分片时返回 None
    pub fn etag_list(&self) -> Option<Vec<String>> {
        self.chunks
            .iter()
            .map(|c| c.etag.clone())
            .collect::<Option<Vec<_>>>()
    }

    /// 已完成分片的位图（断点续传记录用）
    pub fn completed_bitmap(&self) -> BitSet {
        let mut bitmap = BitSet::with_capacity(self.chunks.len());
        for chunk in &self.chunks {
            if chunk.completed {
                bitmap.insert(chunk.index);
            }
        }
        bitmap
    }

    /// 从断点续传位图恢复已完成分片
    ///
    /// 恢复的分片没有本地保存的 etag，合并前由服务端按索引补全，
    /// 此处记录占位值
    pub fn restore_completed(&mut self, bitmap: &BitSet, etags: &[(usize, String)]) {
        for chunk in &mut self.chunks {
            if bitmap.contains(chunk.index) {
                chunk.completed = true;
                chunk.etag = etags
                    .iter()
                    .find(|(i, _)| *i == chunk.index)
                    .map(|(_, e)| e.clone());
            }
        }
    }
}
