// 已上传文件登记表
//
// 仅在任务成功时追加，条目创建后不再修改

use crate::client::UploadResponse;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// 已上传文件记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    /// 文件 ID
    pub id: String,
    /// 文件名
    pub name: String,
    /// 访问 URL
    pub url: String,
    /// 文件类型（MIME）
    pub file_type: String,
    /// 文件大小（字节）
    pub size: u64,
    /// 上传完成时间 (Unix timestamp)
    pub uploaded_at: i64,
    /// 服务端存储路径
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    /// 缩略图 URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl UploadedFile {
    /// 从上传响应生成记录
    pub fn from_response(response: &UploadResponse) -> Self {
        Self {
            id: response.file_id.clone(),
            name: response.file_name.clone(),
            url: response.url.clone(),
            file_type: response.file_type.clone(),
            size: response.file_size,
            uploaded_at: response.upload_time,
            storage_path: response.storage_path.clone(),
            thumbnail_url: response.thumbnail_url.clone(),
        }
    }
}

/// 已上传文件登记表（追加写）
#[derive(Debug, Default)]
pub struct UploadedFileRegistry {
    files: RwLock<Vec<UploadedFile>>,
}

impl UploadedFileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条记录
    pub fn append(&self, file: UploadedFile) {
        self.files.write().push(file);
    }

    /// 全部记录（按完成顺序）
    pub fn all(&self) -> Vec<UploadedFile> {
        self.files.read().clone()
    }

    /// 按文件 ID 查找
    pub fn find(&self, id: &str) -> Option<UploadedFile> {
        self.files.read().iter().find(|f| f.id == id).cloned()
    }

    /// 记录条数
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response(id: &str) -> UploadResponse {
        UploadResponse {
            file_id: id.to_string(),
            url: format!("https://files.example.com/{}", id),
            file_name: "buddy.jpg".to_string(),
            file_size: 2048,
            file_type: "image/jpeg".to_string(),
            upload_time: 1700000000,
            thumbnail_url: Some(format!("https://files.example.com/{}/thumb", id)),
            storage_path: None,
        }
    }

    #[test]
    fn test_append_and_query() {
        let registry = UploadedFileRegistry::new();
        assert!(registry.is_empty());

        registry.append(UploadedFile::from_response(&sample_response("f1")));
        registry.append(UploadedFile::from_response(&sample_response("f2")));

        assert_eq!(registry.len(), 2);
        // 保持完成顺序
        let all = registry.all();
        assert_eq!(all[0].id, "f1");
        assert_eq!(all[1].id, "f2");

        let found = registry.find("f2").unwrap();
        assert_eq!(found.size, 2048);
        assert!(found.thumbnail_url.is_some());
        assert!(registry.find("f3").is_none());
    }
}
