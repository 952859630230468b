//! 进度事件节流器
//!
//! 限制 Progress 事件的发布频率，避免分片密集完成时的事件风暴

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 默认节流间隔（毫秒）
pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 200;

/// 进度事件节流器
///
/// 线程安全，多个分片上传协程共享一个实例。
/// 典型用法：每次进度变化时调用 `try_emit()`，返回 true 才发布事件；
/// 终态更新调用 `force()` 绕过间隔检查。
#[derive(Debug)]
pub struct ProgressThrottler {
    /// 上次发布时间（相对进程起点的毫秒数）
    last_emit_ms: AtomicU64,
    /// 节流间隔（毫秒）
    interval_ms: u64,
}

impl ProgressThrottler {
    /// 创建指定间隔的节流器
    pub fn new(interval: Duration) -> Self {
        Self {
            last_emit_ms: AtomicU64::new(0),
            interval_ms: interval.as_millis() as u64,
        }
    }

    /// 使用默认间隔（200ms）创建
    pub fn default_interval() -> Self {
        Self::new(Duration::from_millis(DEFAULT_THROTTLE_INTERVAL_MS))
    }

    /// 检查是否应该发布事件
    ///
    /// 距上次发布超过间隔时返回 true 并更新时间戳；
    /// CAS 失败说明其他协程刚刚发布过，本次不发布
    pub fn try_emit(&self) -> bool {
        let now = Self::elapsed_ms();
        let last = self.last_emit_ms.load(Ordering::Relaxed);

        if now.saturating_sub(last) < self.interval_ms && last != 0 {
            return false;
        }

        self.last_emit_ms
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// 强制发布（终态或最后一次更新）
    pub fn force(&self) {
        self.last_emit_ms.store(Self::elapsed_ms(), Ordering::Relaxed);
    }

    /// 节流间隔
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// 进程起点以来的毫秒数
    ///
    /// 使用 Instant 避免系统时钟跳变影响
    fn elapsed_ms() -> u64 {
        use std::sync::OnceLock;
        static START: OnceLock<Instant> = OnceLock::new();
        START.get_or_init(Instant::now).elapsed().as_millis() as u64 + 1
    }
}

impl Default for ProgressThrottler {
    fn default() -> Self {
        Self::default_interval()
    }
}
