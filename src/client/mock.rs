// 测试用文件服务客户端
//
// 支持按文件名/分片索引编排失败脚本、注入延迟、统计并发峰值

use crate::client::types::{ChunkAck, TransferErrorKind, TransferFailure, UploadResponse};
use crate::client::StorageClient;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// 永久失败标记
pub const FAIL_FOREVER: u32 = u32::MAX;

/// 测试用客户端
#[derive(Debug)]
pub struct MockStorageClient {
    /// 每次调用的模拟耗时
    latency: Duration,
    /// 失败时返回的错误分类
    fail_kind: Mutex<TransferErrorKind>,
    /// 整文件上传失败脚本（file_name -> 剩余失败次数）
    whole_failures: Mutex<HashMap<String, u32>>,
    /// 分片上传失败脚本（chunk_index -> 剩余失败次数）
    chunk_failures: Mutex<HashMap<usize, u32>>,
    /// 合并接口失败次数
    finalize_failures: AtomicU32,

    /// 调用统计
    pub whole_calls: AtomicUsize,
    pub chunk_calls: AtomicUsize,
    pub finalize_calls: AtomicUsize,
    /// 成功上传的分片索引（按完成顺序）
    pub uploaded_chunks: Mutex<Vec<usize>>,
    /// 当前在途请求数 / 峰值
    inflight: AtomicUsize,
    pub max_inflight: AtomicUsize,
}

impl Default for MockStorageClient {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            fail_kind: Mutex::new(TransferErrorKind::ServerError),
            whole_failures: Mutex::default(),
            chunk_failures: Mutex::default(),
            finalize_failures: AtomicU32::new(0),
            whole_calls: AtomicUsize::new(0),
            chunk_calls: AtomicUsize::new(0),
            finalize_calls: AtomicUsize::new(0),
            uploaded_chunks: Mutex::default(),
            inflight: AtomicUsize::new(0),
            max_inflight: AtomicUsize::new(0),
        }
    }
}

impl MockStorageClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// 设置失败时返回的错误分类
    pub fn set_fail_kind(&self, kind: TransferErrorKind) {
        *self.fail_kind.lock().unwrap() = kind;
    }

    /// 指定文件名的整文件上传前 n 次失败
    pub fn fail_whole(&self, file_name: &str, times: u32) {
        self.whole_failures
            .lock()
            .unwrap()
            .insert(file_name.to_string(), times);
    }

    /// 指定索引的分片上传前 n 次失败（FAIL_FOREVER 表示永久失败）
    pub fn fail_chunk(&self, chunk_index: usize, times: u32) {
        self.chunk_failures
            .lock()
            .unwrap()
            .insert(chunk_index, times);
    }

    /// 合并接口前 n 次失败
    pub fn fail_finalize(&self, times: u32) {
        self.finalize_failures.store(times, Ordering::SeqCst);
    }

    /// 观测到的最大并发请求数
    pub fn observed_max_inflight(&self) -> usize {
        self.max_inflight.load(Ordering::SeqCst)
    }

    fn failure(&self, message: String) -> TransferFailure {
        TransferFailure::new(*self.fail_kind.lock().unwrap(), message)
    }

    /// 消耗一次失败额度，返回是否应失败
    fn consume_failure(remaining: &mut u32) -> bool {
        if *remaining == 0 {
            return false;
        }
        if *remaining != FAIL_FOREVER {
            *remaining -= 1;
        }
        true
    }

    async fn track_inflight(&self) {
        let current = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inflight.fetch_max(current, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.inflight.fetch_sub(1, Ordering::SeqCst);
    }

    fn make_response(file_name: &str, file_type: &str, file_size: u64) -> UploadResponse {
        UploadResponse {
            file_id: format!("file-{}", file_name),
            url: format!("https://files.test/{}", file_name),
            file_name: file_name.to_string(),
            file_size,
            file_type: file_type.to_string(),
            upload_time: chrono::Utc::now().timestamp(),
            thumbnail_url: None,
            storage_path: Some(format!("/storage/{}", file_name)),
        }
    }
}

#[async_trait]
impl StorageClient for MockStorageClient {
    async fn upload_file(
        &self,
        file_name: &str,
        file_type: &str,
        data: Vec<u8>,
    ) -> Result<UploadResponse, TransferFailure> {
        self.track_inflight().await;
        self.whole_calls.fetch_add(1, Ordering::SeqCst);

        let should_fail = {
            let mut failures = self.whole_failures.lock().unwrap();
            failures
                .get_mut(file_name)
                .map(|r| Self::consume_failure(r))
                .unwrap_or(false)
        };
        if should_fail {
            return Err(self.failure(format!("mock 整文件上传失败: {}", file_name)));
        }

        Ok(Self::make_response(file_name, file_type, data.len() as u64))
    }

    async fn upload_chunk(
        &self,
        _file_identifier: &str,
        chunk_index: usize,
        _total_chunks: usize,
        _data: Vec<u8>,
    ) -> Result<ChunkAck, TransferFailure> {
        self.track_inflight().await;
        self.chunk_calls.fetch_add(1, Ordering::SeqCst);

        let should_fail = {
            let mut failures = self.chunk_failures.lock().unwrap();
            failures
                .get_mut(&chunk_index)
                .map(|r| Self::consume_failure(r))
                .unwrap_or(false)
        };
        if should_fail {
            return Err(self.failure(format!("mock 分片上传失败: #{}", chunk_index)));
        }

        self.uploaded_chunks.lock().unwrap().push(chunk_index);
        Ok(ChunkAck {
            chunk_index,
            etag: format!("etag-{}", chunk_index),
        })
    }

    async fn finalize(
        &self,
        file_identifier: &str,
        file_name: &str,
        file_type: &str,
        total_size: u64,
        _etags: &[String],
    ) -> Result<UploadResponse, TransferFailure> {
        self.track_inflight().await;
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);

        loop {
            let remaining = self.finalize_failures.load(Ordering::SeqCst);
            if remaining == 0 {
                break;
            }
            let next = if remaining == FAIL_FOREVER {
                remaining
            } else {
                remaining - 1
            };
            if self
                .finalize_failures
                .compare_exchange(remaining, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Err(self.failure(format!("mock 合并失败: {}", file_identifier)));
            }
        }

        Ok(Self::make_response(file_name, file_type, total_size))
    }
}
