// 目录扫描
//
// 把一个本地目录展开为待上传文件列表，供批量入队使用

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// 扫描选项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    /// 是否跳过隐藏文件（以 . 开头的文件/目录）
    pub skip_hidden: bool,
    /// 最大递归深度（None 表示不限制）
    pub max_depth: Option<usize>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            skip_hidden: true,
            max_depth: None,
        }
    }
}

/// 扫描到的文件
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// 文件绝对路径
    pub path: PathBuf,
    /// 相对于扫描根目录的路径，如 "2024/01/photo.jpg"
    pub relative_path: String,
    /// 文件大小
    pub size: u64,
    /// 按扩展名推断的文件类型，无法识别时为 None
    pub file_type: Option<String>,
}

/// 按扩展名推断文件类型
pub fn file_type_from_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let file_type = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "txt" => "text/plain",
        _ => return None,
    };
    Some(file_type.to_string())
}

/// 目录扫描器
pub struct FolderScanner;

impl FolderScanner {
    /// 扫描目录，返回按相对路径排序的文件列表
    pub fn scan(root: &Path, options: &ScanOptions) -> std::io::Result<Vec<ScannedFile>> {
        let mut walker = WalkDir::new(root).follow_links(false);
        if let Some(depth) = options.max_depth {
            walker = walker.max_depth(depth);
        }

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| std::io::Error::other(e.to_string()))?;

            if options.skip_hidden && Self::is_hidden(relative) {
                debug!("跳过隐藏文件: {:?}", entry.path());
                continue;
            }

            let metadata = entry.metadata().map_err(|e| std::io::Error::other(e.to_string()))?;
            files.push(ScannedFile {
                path: entry.path().to_path_buf(),
                relative_path: relative.to_string_lossy().replace('\\', "/"),
                size: metadata.len(),
                file_type: file_type_from_extension(entry.path()),
            });
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(files)
    }

    /// 相对路径中任一段以 . 开头即视为隐藏
    fn is_hidden(relative: &Path) -> bool {
        relative.components().any(|c| {
            c.as_os_str()
                .to_str()
                .map(|s| s.starts_with('.'))
                .unwrap_or(false)
        })
    }
}
