//! 滑动窗口记录存储

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::record::Record;

/// 线程安全的记录存储
///
/// 写入方为各个执行任务，读取方为统计任务；锁只在内存操作期间持有，
/// 不会跨越网络 IO。记录以 `Arc` 保存，窗口读取只复制指针
#[derive(Default)]
pub struct MetricsStore {
    records: Mutex<VecDeque<Arc<Record>>>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条记录（按完成顺序）
    pub fn append(&self, record: Record) {
        self.records.lock().push_back(Arc::new(record));
    }

    /// 读取 `now - window` 之后完成的所有记录
    pub fn window(&self, now: Instant, window: Duration) -> Vec<Arc<Record>> {
        let records = self.records.lock();
        match now.checked_sub(window) {
            Some(cutoff) => records
                .iter()
                .filter(|r| r.timestamp >= cutoff)
                .cloned()
                .collect(),
            None => records.iter().cloned().collect(),
        }
    }

    /// 移除窗口之外的记录，返回移除数量
    ///
    /// 记录按完成顺序追加，只从队首弹出；个别乱序的旧记录留到下一轮
    pub fn prune(&self, now: Instant, window: Duration) -> usize {
        let Some(cutoff) = now.checked_sub(window) else {
            return 0;
        };
        let mut records = self.records.lock();
        let before = records.len();
        while records.front().is_some_and(|r| r.timestamp < cutoff) {
            records.pop_front();
        }
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
