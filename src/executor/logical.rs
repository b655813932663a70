//! 逻辑请求状态机
//!
//! `Pending → Attempting → {Succeeded | BackoffWait → Attempting | GaveUp}`
//!
//! 每个逻辑请求独立持有自己的尝试序列，不与其他请求共享重试状态

use std::time::Duration;

use tokio::time::Instant;

use super::attempt::Attempt;
use super::retry::Backoff;
use crate::metrics::record::{Outcome, Record};
use crate::model::config::RetryPolicy;
use crate::workload::RequestSpec;

/// 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Attempting { index: u32 },
    BackoffWait { index: u32, wait: Duration },
    Succeeded,
    GaveUp,
}

/// 最终结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Completed,
    GaveUp,
}

/// 用户可见的一个请求，背后可能有多次尝试
pub struct LogicalRequest {
    spec: RequestSpec,
    policy: RetryPolicy,
    backoff: Backoff,
    attempts: Vec<Attempt>,
    state: RequestState,
}

impl LogicalRequest {
    pub fn new(spec: RequestSpec, policy: RetryPolicy, backoff: Backoff) -> Self {
        Self {
            spec,
            policy,
            backoff,
            attempts: Vec::new(),
            state: RequestState::Pending,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn spec(&self) -> &RequestSpec {
        &self.spec
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn resolution(&self) -> Option<Resolution> {
        match self.state {
            RequestState::Succeeded => Some(Resolution::Completed),
            RequestState::GaveUp => Some(Resolution::GaveUp),
            _ => None,
        }
    }

    /// Pending → Attempting
    pub fn begin(&mut self) {
        if self.state == RequestState::Pending {
            self.state = RequestState::Attempting { index: 0 };
        }
    }

    /// BackoffWait → Attempting
    pub fn resume(&mut self) {
        if let RequestState::BackoffWait { index, .. } = self.state {
            self.state = RequestState::Attempting { index: index + 1 };
        }
    }

    /// 处理一次尝试的结果，决定下一个状态
    ///
    /// `deadline` 为整个运行的硬截止时刻，等待会越过它时直接放弃
    pub fn on_attempt(&mut self, attempt: Attempt, deadline: Option<Instant>) -> RequestState {
        let RequestState::Attempting { index } = self.state else {
            tracing::warn!("逻辑请求状态 {:?} 下收到尝试结果，已忽略", self.state);
            return self.state;
        };

        let outcome = attempt.outcome;
        let retryable = attempt.retryable;
        let retry_after = attempt.retry_after;
        let completed_at = attempt.completed_at;
        self.attempts.push(attempt);

        self.state = match (outcome, self.policy) {
            (Outcome::Success, _) => RequestState::Succeeded,
            (_, RetryPolicy::None) => RequestState::GaveUp,
            (_, RetryPolicy::Exponential) if !retryable => RequestState::GaveUp,
            (_, RetryPolicy::Exponential) => {
                let elapsed = completed_at.saturating_duration_since(self.first_started_at());
                match self.backoff.next_wait(index, elapsed, retry_after, self.longest_attempt()) {
                    Some(wait) if deadline.is_none_or(|d| completed_at + wait <= d) => {
                        RequestState::BackoffWait { index, wait }
                    }
                    _ => RequestState::GaveUp,
                }
            }
        };
        self.state
    }

    /// 已完成尝试中最长的耗时，作为下一次尝试的预估
    fn longest_attempt(&self) -> Duration {
        self.attempts
            .iter()
            .map(|a| a.completed_at.saturating_duration_since(a.started_at))
            .max()
            .unwrap_or_default()
    }

    fn first_started_at(&self) -> Instant {
        self.attempts
            .first()
            .map(|a| a.started_at)
            .unwrap_or_else(Instant::now)
    }

    /// 折叠为记录
    ///
    /// 延迟从第一次尝试开始计算到最后一次尝试结束，重试耗时计入用户可见结果；
    /// token 时序取自最后一次尝试
    pub fn into_record(self) -> Record {
        let context_tokens = self.spec.context_tokens;
        let Some(last) = self.attempts.last() else {
            return Record {
                timestamp: Instant::now(),
                outcome: Outcome::Failed,
                context_tokens,
                generated_tokens: 0,
                ttft: None,
                token_gaps: Vec::new(),
                e2e: Duration::ZERO,
                utilization: None,
                attempts: 0,
                status: None,
            };
        };
        let start = self.first_started_at();

        Record {
            timestamp: last.completed_at,
            outcome: last.outcome,
            context_tokens,
            generated_tokens: last.generated_tokens(),
            ttft: last
                .first_token_at
                .map(|t| t.saturating_duration_since(start)),
            token_gaps: last.token_gaps(),
            e2e: last.completed_at.saturating_duration_since(start),
            utilization: self.attempts.iter().rev().find_map(|a| a.utilization),
            attempts: self.attempts.len() as u32,
            status: last.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::message::ChatMessage;

    fn spec() -> RequestSpec {
        RequestSpec {
            context_tokens: 100,
            max_tokens: Some(10),
            messages: vec![ChatMessage::user("hi")],
        }
    }

    fn backoff() -> Backoff {
        Backoff {
            jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let mut request = LogicalRequest::new(spec(), RetryPolicy::Exponential, backoff());
        assert_eq!(request.state(), RequestState::Pending);
        request.begin();
        assert_eq!(request.state(), RequestState::Attempting { index: 0 });

        let state = request.on_attempt(Attempt::start(0).succeed(), None);
        assert_eq!(state, RequestState::Succeeded);
        assert_eq!(request.resolution(), Some(Resolution::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_none_policy_gives_up_immediately() {
        let mut request = LogicalRequest::new(spec(), RetryPolicy::None, backoff());
        request.begin();
        let state = request.on_attempt(Attempt::start(0).with_status(429).throttle(None), None);
        assert_eq!(state, RequestState::GaveUp);

        let record = request.into_record();
        assert_eq!(record.outcome, Outcome::Throttled);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backs_off_then_resumes() {
        let mut request = LogicalRequest::new(spec(), RetryPolicy::Exponential, backoff());
        request.begin();

        let state = request.on_attempt(Attempt::start(0).throttle(None), None);
        assert_eq!(
            state,
            RequestState::BackoffWait {
                index: 0,
                wait: Duration::from_millis(500)
            }
        );
        request.resume();
        assert_eq!(request.state(), RequestState::Attempting { index: 1 });

        let state = request.on_attempt(Attempt::start(1).throttle(Some(Duration::from_secs(2))), None);
        assert_eq!(
            state,
            RequestState::BackoffWait {
                index: 1,
                wait: Duration::from_secs(2)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_terminal_failure_not_retried() {
        let mut request = LogicalRequest::new(spec(), RetryPolicy::Exponential, backoff());
        request.begin();
        let state = request.on_attempt(Attempt::start(0).with_status(400).fail("HTTP 400", false), None);
        assert_eq!(state, RequestState::GaveUp);
        assert_eq!(request.into_record().outcome, Outcome::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_gives_up_after_ceiling() {
        let mut request = LogicalRequest::new(spec(), RetryPolicy::Exponential, backoff());
        request.begin();
        request.on_attempt(Attempt::start(0).throttle(None), None);

        tokio::time::advance(Duration::from_secs(61)).await;
        request.resume();
        let state = request.on_attempt(Attempt::start(1).throttle(None), None);
        assert_eq!(state, RequestState::GaveUp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_give_up_span_stays_within_ceiling() {
        let mut request = LogicalRequest::new(spec(), RetryPolicy::Exponential, backoff());
        request.begin();

        // 每次尝试 500ms，retry-after 11.5s：第 5 次尝试在 48.5s 结束，
        // 再等一次会在 60s 开始第 6 次尝试并在 60.5s 结束，所以此时放弃
        loop {
            let attempt = Attempt::start(request.attempts().len() as u32);
            tokio::time::advance(Duration::from_millis(500)).await;
            match request.on_attempt(attempt.with_status(429).throttle(Some(Duration::from_millis(11_500))), None) {
                RequestState::BackoffWait { wait, .. } => {
                    assert_eq!(wait, Duration::from_millis(11_500));
                    tokio::time::advance(wait).await;
                    request.resume();
                }
                RequestState::GaveUp => break,
                other => panic!("意外的状态: {:?}", other),
            }
        }

        let record = request.into_record();
        assert_eq!(record.outcome, Outcome::Throttled);
        assert_eq!(record.attempts, 5);
        assert_eq!(record.e2e, Duration::from_millis(48_500));
        assert!(record.e2e <= crate::executor::retry::RETRY_CEILING);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_respects_run_deadline() {
        let mut request = LogicalRequest::new(spec(), RetryPolicy::Exponential, backoff());
        request.begin();
        let deadline = Instant::now() + Duration::from_millis(100);
        let state = request.on_attempt(Attempt::start(0).throttle(None), Some(deadline));
        assert_eq!(state, RequestState::GaveUp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_spans_first_start_to_last_end() {
        let mut request = LogicalRequest::new(spec(), RetryPolicy::Exponential, backoff());
        request.begin();

        let first = Attempt::start(0);
        let first_start = first.started_at;
        tokio::time::advance(Duration::from_millis(200)).await;
        request.on_attempt(first.with_status(429).throttle(None), None);
        request.resume();

        tokio::time::advance(Duration::from_millis(500)).await;
        let mut second = Attempt::start(1).with_status(200);
        second.utilization = Some(42.5);
        tokio::time::advance(Duration::from_millis(300)).await;
        second.token_received(Instant::now());
        tokio::time::advance(Duration::from_millis(100)).await;
        second.token_received(Instant::now());
        request.on_attempt(second.succeed(), None);

        let record = request.into_record();
        assert_eq!(record.outcome, Outcome::Success);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.generated_tokens, 2);
        assert_eq!(record.e2e, Duration::from_millis(1100));
        // 首 token 延迟包含重试等待
        assert_eq!(record.ttft, Some(Duration::from_millis(1000)));
        assert!(record.e2e >= record.ttft.unwrap());
        assert_eq!(record.token_gaps, vec![Duration::from_millis(100)]);
        assert_eq!(record.utilization, Some(42.5));
        assert_eq!(record.context_tokens, 100);
        assert_eq!(record.timestamp, first_start + Duration::from_millis(1100));
    }
}
