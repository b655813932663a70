//! 请求记录、滑动窗口存储与周期统计

pub mod aggregator;
pub mod record;
pub mod snapshot;
pub mod stats;
pub mod store;

pub use aggregator::StatsAggregator;
pub use store::MetricsStore;
