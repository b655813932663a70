//! 运行上下文：生命周期计数器与记录存储

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::common::{round_to, secs};
use crate::metrics::record::{Outcome, Record};
use crate::metrics::store::MetricsStore;

/// 生命周期计数器（不受滑动窗口影响）
#[derive(Debug, Default)]
pub struct Counters {
    issued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    throttled: AtomicU64,
    in_flight: AtomicU64,
}

/// 计数器的一次读取
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterValues {
    pub issued: u64,
    pub completed: u64,
    pub failed: u64,
    pub throttled: u64,
    pub in_flight: u64,
}

impl Counters {
    pub fn load(&self) -> CounterValues {
        CounterValues {
            issued: self.issued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// 由调度器持有、共享给执行任务与统计任务的上下文
pub struct RunContext {
    pub store: MetricsStore,
    pub counters: Counters,
    started_at: Instant,
    window: Duration,
}

impl RunContext {
    pub fn new(window: Duration) -> Self {
        Self {
            store: MetricsStore::new(),
            counters: Counters::default(),
            started_at: Instant::now(),
            window,
        }
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    /// 发起一个逻辑请求
    pub fn begin_request(&self) {
        self.counters.issued.fetch_add(1, Ordering::Relaxed);
        self.counters.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// 逻辑请求结束，更新计数并写入记录
    pub fn complete(&self, record: Record) {
        let counter = match record.outcome {
            Outcome::Success => &self.counters.completed,
            Outcome::Throttled => &self.counters.throttled,
            Outcome::Failed => &self.counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);

        if record.e2e > self.window {
            tracing::warn!(
                "请求耗时 {} 秒，超过统计窗口 {} 秒，建议把 aggregation-window 调大到典型延迟的 2 倍以上",
                round_to(secs(record.e2e), 2),
                round_to(secs(self.window), 2)
            );
        }
        self.store.append(record);
    }
}
