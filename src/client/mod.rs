// 文件服务客户端模块
//
// 上传引擎与外部世界唯一的边界：
// - 整文件上传：一次调用
// - 分片上传：每个分片一次调用，携带 file_identifier / chunk_index / total_chunks
// - 合并分片：最后一步，返回完整文件的 UploadResponse

pub mod http;
#[cfg(test)]
pub mod mock;
pub mod types;

pub use http::HttpStorageClient;
pub use types::{
    ApiEnvelope, ChunkAck, TransferErrorKind, TransferFailure, UploadResponse,
};

use async_trait::async_trait;

/// 文件服务客户端接口
///
/// 调度器只通过该接口与文件服务交互，便于替换实现与测试
#[async_trait]
pub trait StorageClient: Send + Sync + std::fmt::Debug {
    /// 整文件上传（单次调用）
    async fn upload_file(
        &self,
        file_name: &str,
        file_type: &str,
        data: Vec<u8>,
    ) -> Result<UploadResponse, TransferFailure>;

    /// 上传单个分片
    async fn upload_chunk(
        &self,
        file_identifier: &str,
        chunk_index: usize,
        total_chunks: usize,
        data: Vec<u8>,
    ) -> Result<ChunkAck, TransferFailure>;

    /// 合并分片，完成上传
    ///
    /// `etags` 按分片索引顺序排列
    async fn finalize(
        &self,
        file_identifier: &str,
        file_name: &str,
        file_type: &str,
        total_size: u64,
        etags: &[String],
    ) -> Result<UploadResponse, TransferFailure>;
}
