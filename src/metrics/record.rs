//! 已完成逻辑请求的记录

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// 请求结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    /// 容量 / 速率限制拒绝（HTTP 429）
    Throttled,
    /// 其他传输、协议或服务端错误
    Failed,
}

/// 逻辑请求结束时写入 MetricsStore 的不可变摘要
#[derive(Debug, Clone)]
pub struct Record {
    /// 完成时刻
    pub timestamp: Instant,
    pub outcome: Outcome,
    pub context_tokens: u64,
    pub generated_tokens: u64,
    /// 首 token 延迟（从第一次尝试开始计）
    pub ttft: Option<Duration>,
    /// 相邻生成 token 之间的间隔
    pub token_gaps: Vec<Duration>,
    /// 端到端延迟（第一次尝试开始到最后一次尝试结束）
    pub e2e: Duration,
    /// 端点上报的利用率（百分比）
    pub utilization: Option<f64>,
    /// 网络调用次数
    pub attempts: u32,
    /// 最后一次尝试的 HTTP 状态码
    pub status: Option<u16>,
}

impl Record {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}
