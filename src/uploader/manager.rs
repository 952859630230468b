// 上传管理器
//
// 负责任务队列与调度：
// - 入队校验（空文件、文件类型、队列容量）
// - FIFO 等待队列 + 并发槽位准入（active_uploads 不超过 concurrent_uploads）
// - 超过分片阈值的文件走分片传输，并按续传记录恢复进度
// - 成功任务移入登记表并移出活跃列表；失败任务保留，等待调用方重试或丢弃
// - 暂停/恢复/取消/重试

use crate::client::StorageClient;
use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::events::{EventBus, UploadEvent};
use crate::uploader::chunk::ChunkPlan;
use crate::uploader::engine::UploadEngine;
use crate::uploader::folder::{FolderScanner, ScanOptions};
use crate::uploader::registry::{UploadedFile, UploadedFileRegistry};
use crate::uploader::resume::{compute_file_identifier, ResumeStore};
use crate::uploader::task::{UploadTask, UploadTaskStatus};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 准入轮询间隔（毫秒）
const ADMISSION_POLL_MS: u64 = 20;

/// 任务句柄（调度内部共享的状态）
#[derive(Debug, Clone)]
pub struct TaskHandle {
    /// 任务
    pub task: Arc<Mutex<UploadTask>>,
    /// 分片计划（整文件模式为 None）
    pub plan: Option<Arc<Mutex<ChunkPlan>>>,
    /// 取消令牌
    pub cancel_token: CancellationToken,
    /// 是否暂停
    pub is_paused: Arc<AtomicBool>,
}

/// 上传管理器
pub struct UploadManager {
    /// 文件服务客户端
    client: Arc<dyn StorageClient>,
    /// 上传配置
    config: UploadConfig,
    /// 所有活跃任务（task_id -> TaskHandle）
    tasks: Arc<DashMap<String, TaskHandle>>,
    /// 活跃任务的入队顺序（同时作为队列容量的临界区）
    order: Arc<Mutex<Vec<String>>>,
    /// 等待并发槽位的任务队列（FIFO）
    waiting: Arc<Mutex<VecDeque<String>>>,
    /// 当前占用并发槽位的任务数
    active_uploads: Arc<AtomicUsize>,
    /// 已上传文件登记表
    registry: Arc<UploadedFileRegistry>,
    /// 断点续传存储（启用时）
    resume_store: Option<Arc<ResumeStore>>,
    /// 事件总线
    events: EventBus,
    /// 管理器停机令牌
    shutdown: CancellationToken,
}

impl UploadManager {
    /// 创建上传管理器并启动准入调度
    pub fn new(client: Arc<dyn StorageClient>, config: UploadConfig) -> Self {
        let resume_store = if config.enable_resume_upload {
            Some(Arc::new(ResumeStore::new()))
        } else {
            None
        };
        Self::with_resume_store(client, config, resume_store)
    }

    /// 使用外部提供的续传存储创建（如从快照文件加载）
    pub fn with_resume_store(
        client: Arc<dyn StorageClient>,
        config: UploadConfig,
        resume_store: Option<Arc<ResumeStore>>,
    ) -> Self {
        info!(
            "创建上传管理器: queue_limit={}, concurrent_uploads={}, concurrent_chunks={}, retry_limit={}",
            config.queue_limit, config.concurrent_uploads, config.concurrent_chunks, config.retry_limit
        );

        let manager = Self {
            client,
            config,
            tasks: Arc::new(DashMap::new()),
            order: Arc::new(Mutex::new(Vec::new())),
            waiting: Arc::new(Mutex::new(VecDeque::new())),
            active_uploads: Arc::new(AtomicUsize::new(0)),
            registry: Arc::new(UploadedFileRegistry::new()),
            resume_store,
            events: EventBus::new(),
            shutdown: CancellationToken::new(),
        };

        manager.start_admission_monitor();
        manager
    }

    // =====================================================
    // 入队
    // =====================================================

    /// 入队一个文件
    ///
    /// 队列已满返回 QueueFull，文件为空或类型不被接受返回 Validation；
    /// auto_upload 开启时任务随即进入等待队列
    pub async fn enqueue(
        &self,
        local_path: impl Into<PathBuf>,
        file_type: impl Into<String>,
    ) -> Result<String, UploadError> {
        self.enqueue_inner(local_path.into(), file_type.into(), None)
            .await
    }

    /// 批量入队
    pub async fn enqueue_batch(
        &self,
        files: Vec<(PathBuf, String)>,
    ) -> Result<Vec<String>, UploadError> {
        let mut ids = Vec::with_capacity(files.len());
        for (path, file_type) in files {
            ids.push(self.enqueue_inner(path, file_type, None).await?);
        }
        Ok(ids)
    }

    /// 扫描目录并批量入队
    ///
    /// 无法识别类型的文件跳过并记录日志
    pub async fn enqueue_folder(
        &self,
        root: impl AsRef<Path>,
        options: ScanOptions,
    ) -> Result<Vec<String>, UploadError> {
        let root = root.as_ref().to_path_buf();
        let scanned = tokio::task::spawn_blocking(move || FolderScanner::scan(&root, &options))
            .await
            .map_err(|e| UploadError::invalid_state(format!("目录扫描协程异常: {}", e)))?
            .map_err(UploadError::Io)?;

        let mut ids = Vec::new();
        for file in scanned {
            let Some(file_type) = file.file_type else {
                warn!("跳过无法识别类型的文件: {:?}", file.path);
                continue;
            };
            let id = self
                .enqueue_inner(file.path, file_type, Some(file.relative_path))
                .await?;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn enqueue_inner(
        &self,
        local_path: PathBuf,
        file_type: String,
        relative_path: Option<String>,
    ) -> Result<String, UploadError> {
        let metadata = tokio::fs::metadata(&local_path).await?;
        let total_size = metadata.len();
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::validation("无效的文件路径"))?;

        let mut task = UploadTask::new(local_path.clone(), file_name, file_type, total_size)?;
        task.relative_path = relative_path;

        // 超过阈值的文件走分片传输
        let use_chunks =
            self.config.enable_chunk_upload && total_size > self.config.chunk_upload_threshold;
        let plan = if use_chunks {
            let identifier = compute_file_identifier(&local_path)
                .await
                .map_err(|e| UploadError::Io(std::io::Error::other(e.to_string())))?;

            let mut plan = ChunkPlan::new(total_size, self.config.chunk_size);
            task.set_chunk_mode(plan.chunk_count(), plan.chunk_size(), identifier.clone());

            // 同一文件此前失败过且有已确认分片时，从断点恢复
            if let Some(store) = &self.resume_store {
                if let Some(entry) = store.lookup(&identifier, plan.chunk_count(), plan.chunk_size())
                {
                    plan.restore_completed(&entry.completed, &entry.etags);
                    task.completed_chunks = plan.completed_count();
                    task.uploaded_size = plan.uploaded_bytes();
                    info!(
                        "任务从断点恢复: identifier={}, 已确认分片 {}/{}",
                        identifier,
                        plan.completed_count(),
                        plan.chunk_count()
                    );
                }
            }
            Some(Arc::new(Mutex::new(plan)))
        } else {
            None
        };

        let task_id = task.id.clone();
        let handle = TaskHandle {
            task: Arc::new(Mutex::new(task)),
            plan,
            cancel_token: CancellationToken::new(),
            is_paused: Arc::new(AtomicBool::new(false)),
        };

        // 容量检查与入队在同一临界区，拒绝时不改动任务列表
        {
            let mut order = self.order.lock().await;
            if order.len() >= self.config.queue_limit {
                return Err(UploadError::QueueFull {
                    current: order.len(),
                    limit: self.config.queue_limit,
                });
            }
            order.push(task_id.clone());
            self.tasks.insert(task_id.clone(), handle);
        }

        debug!("任务已入队: {}", task_id);
        self.events.emit(UploadEvent::Queued {
            task_id: task_id.clone(),
        });

        if self.config.auto_upload {
            self.waiting.lock().await.push_back(task_id.clone());
        }

        Ok(task_id)
    }

    // =====================================================
    // 任务控制
    // =====================================================

    /// 手动启动一个等待中的任务（auto_upload 关闭时使用）
    pub async fn start_task(&self, task_id: &str) -> Result<(), UploadError> {
        let handle = self.handle(task_id)?;
        {
            let task = handle.task.lock().await;
            if task.status != UploadTaskStatus::Pending {
                return Err(UploadError::invalid_state(format!(
                    "任务 {} 当前状态为 {:?}，无法启动",
                    task_id, task.status
                )));
            }
        }

        let mut waiting = self.waiting.lock().await;
        if !waiting.iter().any(|id| id == task_id) {
            waiting.push_back(task_id.to_string());
        }
        Ok(())
    }

    /// 启动所有等待中的任务，返回启动数量
    pub async fn start_all_pending(&self) -> usize {
        let ids = { self.order.lock().await.clone() };
        let mut count = 0;
        for id in ids {
            if self.start_task(&id).await.is_ok() {
                count += 1;
            }
        }
        count
    }

    /// 暂停任务
    ///
    /// 已在途的分片会自然完成，之后不再调度新分片；并发槽位保留
    pub async fn pause_task(&self, task_id: &str) -> Result<(), UploadError> {
        let handle = self.handle(task_id)?;
        {
            let mut task = handle.task.lock().await;
            if task.status != UploadTaskStatus::Uploading {
                return Err(UploadError::invalid_state(format!(
                    "任务 {} 当前状态为 {:?}，无法暂停",
                    task_id, task.status
                )));
            }
            task.mark_paused();
        }
        handle.is_paused.store(true, Ordering::SeqCst);

        info!("任务已暂停: {}", task_id);
        self.events.emit(UploadEvent::Paused {
            task_id: task_id.to_string(),
        });
        Ok(())
    }

    /// 恢复已暂停的任务
    pub async fn resume_task(&self, task_id: &str) -> Result<(), UploadError> {
        let handle = self.handle(task_id)?;
        {
            let mut task = handle.task.lock().await;
            if task.status != UploadTaskStatus::Paused {
                return Err(UploadError::invalid_state(format!(
                    "任务 {} 当前状态为 {:?}，无法恢复",
                    task_id, task.status
                )));
            }
            task.mark_uploading();
        }
        handle.is_paused.store(false, Ordering::SeqCst);

        info!("任务已恢复: {}", task_id);
        self.events.emit(UploadEvent::Resumed {
            task_id: task_id.to_string(),
        });
        Ok(())
    }

    /// 取消任务
    ///
    /// 立即转入终态并释放并发槽位，任务保留在列表中直到被丢弃
    pub async fn cancel_task(&self, task_id: &str) -> Result<(), UploadError> {
        let handle = self.handle(task_id)?;

        let was_pending = {
            let mut task = handle.task.lock().await;
            if task.status.is_terminal() {
                return Err(UploadError::invalid_state(format!(
                    "任务 {} 已处于终态",
                    task_id
                )));
            }
            let was_pending = task.status == UploadTaskStatus::Pending;
            task.mark_cancelled();
            was_pending
        };

        // 唤醒暂停中的分片协程，令其尽快观察到取消
        handle.is_paused.store(false, Ordering::SeqCst);
        handle.cancel_token.cancel();

        if was_pending {
            // 还未占用槽位，从等待队列摘除即可
            self.waiting.lock().await.retain(|id| id != task_id);
            self.events.emit(UploadEvent::Cancelled {
                task_id: task_id.to_string(),
            });
        }
        // 传输中的任务由传输协程在退出时释放槽位并发布事件

        info!("任务已取消: {}", task_id);
        Ok(())
    }

    /// 重试失败的任务
    ///
    /// 仅当重试次数未耗尽时允许；分片任务保留已确认的分片
    pub async fn retry_task(&self, task_id: &str) -> Result<(), UploadError> {
        let handle = self.handle(task_id)?;
        {
            let mut task = handle.task.lock().await;
            if task.status != UploadTaskStatus::Failed {
                return Err(UploadError::invalid_state(format!(
                    "任务 {} 当前状态为 {:?}，无法重试",
                    task_id, task.status
                )));
            }
            if task.retries >= self.config.retry_limit {
                return Err(UploadError::invalid_state(format!(
                    "任务 {} 重试次数已耗尽 ({}/{})",
                    task_id, task.retries, self.config.retry_limit
                )));
            }
            task.status = UploadTaskStatus::Pending;
            task.error = None;
            task.completed_at = None;
        }

        self.waiting.lock().await.push_back(task_id.to_string());
        info!("任务重新排队: {}", task_id);
        self.events.emit(UploadEvent::Queued {
            task_id: task_id.to_string(),
        });
        Ok(())
    }

    /// 丢弃任务（终态或未启动的任务）
    pub async fn discard_task(&self, task_id: &str) -> Result<(), UploadError> {
        let handle = self.handle(task_id)?;
        {
            let task = handle.task.lock().await;
            if task.status == UploadTaskStatus::Uploading || task.status == UploadTaskStatus::Paused
            {
                return Err(UploadError::invalid_state(format!(
                    "任务 {} 正在传输，请先取消",
                    task_id
                )));
            }
        }

        self.waiting.lock().await.retain(|id| id != task_id);
        {
            let mut order = self.order.lock().await;
            order.retain(|id| id != task_id);
        }
        self.tasks.remove(task_id);

        info!("任务已丢弃: {}", task_id);
        Ok(())
    }

    /// 清除所有失败任务，返回清除数量
    pub async fn clear_failed(&self) -> usize {
        let ids = { self.order.lock().await.clone() };
        let mut cleared = 0;
        for id in ids {
            let Some(handle) = self.tasks.get(&id).map(|h| h.clone()) else {
                continue;
            };
            let failed = { handle.task.lock().await.status == UploadTaskStatus::Failed };
            if failed && self.discard_task(&id).await.is_ok() {
                cleared += 1;
            }
        }
        cleared
    }

    // =====================================================
    // 查询
    // =====================================================

    /// 查询单个任务
    pub async fn get_task(&self, task_id: &str) -> Option<UploadTask> {
        let handle = self.tasks.get(task_id).map(|h| h.clone())?;
        let task = handle.task.lock().await.clone();
        Some(task)
    }

    /// 活跃任务列表快照（按入队顺序）
    pub async fn current_tasks(&self) -> Vec<UploadTask> {
        let ids = { self.order.lock().await.clone() };
        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(handle) = self.tasks.get(&id).map(|h| h.clone()) {
                tasks.push(handle.task.lock().await.clone());
            }
        }
        tasks
    }

    /// 当前占用并发槽位的任务数
    pub fn active_uploads(&self) -> usize {
        self.active_uploads.load(Ordering::SeqCst)
    }

    /// 当前配置
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// 已上传文件登记表
    pub fn registry(&self) -> Arc<UploadedFileRegistry> {
        self.registry.clone()
    }

    /// 订阅上传事件
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    /// 断点续传存储
    pub fn resume_store(&self) -> Option<Arc<ResumeStore>> {
        self.resume_store.clone()
    }

    /// 停止准入调度（在途传输不受影响）
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn handle(&self, task_id: &str) -> Result<TaskHandle, UploadError> {
        self.tasks
            .get(task_id)
            .map(|h| h.clone())
            .ok_or_else(|| UploadError::TaskNotFound(task_id.to_string()))
    }

    // =====================================================
    // 准入调度
    // =====================================================

    /// 后台循环：等待队列按 FIFO 出队，占满并发槽位为止
    fn start_admission_monitor(&self) {
        let tasks = self.tasks.clone();
        let order = self.order.clone();
        let waiting = self.waiting.clone();
        let active_uploads = self.active_uploads.clone();
        let registry = self.registry.clone();
        let resume_store = self.resume_store.clone();
        let events = self.events.clone();
        let client = self.client.clone();
        let shutdown = self.shutdown.clone();
        let concurrent_uploads = self.config.concurrent_uploads;
        let concurrent_chunks = self.config.concurrent_chunks;
        let retry_limit = self.config.retry_limit;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(ADMISSION_POLL_MS)) => {}
                }

                while active_uploads.load(Ordering::SeqCst) < concurrent_uploads {
                    let next_id = { waiting.lock().await.pop_front() };
                    let Some(task_id) = next_id else { break };

                    let Some(handle) = tasks.get(&task_id).map(|h| h.clone()) else {
                        // 等待期间被丢弃
                        continue;
                    };

                    // 先占槽位，状态检查与标记在同一锁内完成，
                    // 避免与并发取消互相覆盖
                    active_uploads.fetch_add(1, Ordering::SeqCst);
                    {
                        let mut task = handle.task.lock().await;
                        if task.status != UploadTaskStatus::Pending {
                            // 等待期间被取消
                            drop(task);
                            active_uploads.fetch_sub(1, Ordering::SeqCst);
                            continue;
                        }
                        task.mark_uploading();
                    }

                    info!(
                        "任务 {} 获得并发槽位 ({}/{})",
                        task_id,
                        active_uploads.load(Ordering::SeqCst),
                        concurrent_uploads
                    );
                    events.emit(UploadEvent::Started {
                        task_id: task_id.clone(),
                    });

                    Self::spawn_transfer(
                        task_id,
                        handle,
                        client.clone(),
                        tasks.clone(),
                        order.clone(),
                        active_uploads.clone(),
                        registry.clone(),
                        resume_store.clone(),
                        events.clone(),
                        retry_limit,
                        concurrent_chunks,
                    );
                }
            }
            debug!("准入调度循环已停止");
        });
    }

    /// 启动单个任务的传输协程
    #[allow(clippy::too_many_arguments)]
    fn spawn_transfer(
        task_id: String,
        handle: TaskHandle,
        client: Arc<dyn StorageClient>,
        tasks: Arc<DashMap<String, TaskHandle>>,
        order: Arc<Mutex<Vec<String>>>,
        active_uploads: Arc<AtomicUsize>,
        registry: Arc<UploadedFileRegistry>,
        resume_store: Option<Arc<ResumeStore>>,
        events: EventBus,
        retry_limit: u32,
        concurrent_chunks: usize,
    ) {
        tokio::spawn(async move {
            let engine = UploadEngine::new(
                client,
                handle.task.clone(),
                handle.plan.clone(),
                handle.cancel_token.clone(),
                handle.is_paused.clone(),
                retry_limit,
                concurrent_chunks,
                resume_store,
                events.clone(),
            );

            let result = engine.run().await;

            // 终态账目：状态标记、列表变更与槽位释放集中在此处
            match result {
                Ok(response) => {
                    let file = UploadedFile::from_response(&response);
                    {
                        let mut task = handle.task.lock().await;
                        task.mark_completed(response);
                    }
                    registry.append(file.clone());

                    // 成功任务移出活跃列表
                    {
                        let mut order = order.lock().await;
                        order.retain(|id| id != &task_id);
                    }
                    tasks.remove(&task_id);
                    active_uploads.fetch_sub(1, Ordering::SeqCst);

                    info!("任务完成并登记: {}", task_id);
                    events.emit(UploadEvent::Completed { task_id, file });
                }
                Err(UploadError::Cancelled) => {
                    {
                        let mut task = handle.task.lock().await;
                        if task.status != UploadTaskStatus::Cancelled {
                            task.mark_cancelled();
                        }
                    }
                    active_uploads.fetch_sub(1, Ordering::SeqCst);

                    info!("任务传输已中止: {}", task_id);
                    events.emit(UploadEvent::Cancelled { task_id });
                }
                Err(e) => {
                    let message = e.to_string();
                    {
                        let mut task = handle.task.lock().await;
                        task.mark_failed(message.clone());
                    }
                    active_uploads.fetch_sub(1, Ordering::SeqCst);

                    warn!("任务失败: {} - {}", task_id, message);
                    // 失败任务保留在列表中，等待调用方重试或丢弃
                    events.emit(UploadEvent::Failed {
                        task_id,
                        error: message,
                    });
                }
            }
        });
    }
}
