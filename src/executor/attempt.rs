//! 单次网络调用

use std::time::Duration;

use tokio::time::Instant;

use crate::metrics::record::Outcome;

/// 逻辑请求中的一次网络调用
#[derive(Debug, Clone)]
pub struct Attempt {
    /// 尝试序号（从 0 开始）
    pub index: u32,
    pub started_at: Instant,
    /// 首个生成 token 到达时刻
    pub first_token_at: Option<Instant>,
    /// 每个生成 token 的到达时刻
    pub token_times: Vec<Instant>,
    pub completed_at: Instant,
    pub outcome: Outcome,
    /// HTTP 状态码，传输层错误时为 None
    pub status: Option<u16>,
    /// 端点上报的利用率（百分比）
    pub utilization: Option<f64>,
    /// 端点建议的重试等待时间
    pub retry_after: Option<Duration>,
    /// 是否属于可重试的瞬时错误
    pub retryable: bool,
    pub error: Option<String>,
}

impl Attempt {
    /// 开始一次尝试，记录开始时刻
    pub fn start(index: u32) -> Self {
        let now = Instant::now();
        Self {
            index,
            started_at: now,
            first_token_at: None,
            token_times: Vec::new(),
            completed_at: now,
            outcome: Outcome::Failed,
            status: None,
            utilization: None,
            retry_after: None,
            retryable: false,
            error: None,
        }
    }

    /// 记录一个生成 token 的到达
    pub fn token_received(&mut self, at: Instant) {
        if self.first_token_at.is_none() {
            self.first_token_at = Some(at);
        }
        self.token_times.push(at);
    }

    pub fn succeed(mut self) -> Self {
        self.outcome = Outcome::Success;
        self.retryable = false;
        self.completed_at = Instant::now();
        self
    }

    pub fn throttle(mut self, retry_after: Option<Duration>) -> Self {
        self.outcome = Outcome::Throttled;
        self.retry_after = retry_after;
        self.retryable = true;
        self.completed_at = Instant::now();
        self
    }

    pub fn fail(mut self, error: impl Into<String>, retryable: bool) -> Self {
        self.outcome = Outcome::Failed;
        self.error = Some(error.into());
        self.retryable = retryable;
        self.completed_at = Instant::now();
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn generated_tokens(&self) -> u64 {
        self.token_times.len() as u64
    }

    /// 相邻 token 到达间隔
    pub fn token_gaps(&self) -> Vec<Duration> {
        self.token_times
            .windows(2)
            .map(|w| w[1].saturating_duration_since(w[0]))
            .collect()
    }

    pub fn duration(&self) -> Duration {
        self.completed_at.saturating_duration_since(self.started_at)
    }
}
