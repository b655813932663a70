//! 指数退避参数

use std::time::Duration;

/// 退避起始等待
pub const BASE_DELAY: Duration = Duration::from_millis(500);
/// 单次等待上限
pub const MAX_SINGLE_WAIT: Duration = Duration::from_secs(60);
/// 逻辑请求从第一次尝试开始的累计重试上限
pub const RETRY_CEILING: Duration = Duration::from_secs(60);

/// 指数退避配置
#[derive(Debug, Clone)]
pub struct Backoff {
    pub base: Duration,
    pub max_wait: Duration,
    pub ceiling: Duration,
    /// 是否在 [delay/2, delay] 区间内随机抖动
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: BASE_DELAY,
            max_wait: MAX_SINGLE_WAIT,
            ceiling: RETRY_CEILING,
            jitter: true,
        }
    }
}

impl Backoff {
    /// 第 `retry` 次重试（从 0 开始）前的等待时间：base * 2^retry，封顶 max_wait
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        let delay = self.base.saturating_mul(factor).min(self.max_wait);
        if self.jitter {
            let half = delay / 2;
            half + half.mul_f64(fastrand::f64())
        } else {
            delay
        }
    }

    /// 计算下一次等待
    ///
    /// 端点给出 retry-after 时优先采用，结果不超过 max_wait。
    /// `attempt_cost` 为预计的下一次尝试耗时；等待加上这次尝试会超出累计上限时返回 None，
    /// 不会缩短等待去凑上限
    pub fn next_wait(
        &self,
        retry: u32,
        elapsed: Duration,
        retry_after: Option<Duration>,
        attempt_cost: Duration,
    ) -> Option<Duration> {
        let wait = retry_after
            .unwrap_or_else(|| self.delay(retry))
            .min(self.max_wait);
        let resume_at = elapsed.saturating_add(wait);
        if resume_at >= self.ceiling || resume_at.saturating_add(attempt_cost) > self.ceiling {
            return None;
        }
        Some(wait)
    }
}
