//! 逻辑请求执行器
//!
//! 驱动 [`LogicalRequest`] 状态机直到成功或放弃，输出一条 [`Record`]

pub mod attempt;
pub mod endpoint;
pub mod logical;
pub mod retry;

use std::sync::Arc;

use tokio::time::Instant;

use crate::metrics::record::Record;
use crate::model::config::RetryPolicy;
use crate::workload::RequestSpec;
use endpoint::Endpoint;
use logical::{LogicalRequest, RequestState};
use retry::Backoff;

pub struct RequestExecutor {
    endpoint: Arc<dyn Endpoint>,
    policy: RetryPolicy,
    backoff: Backoff,
}

impl RequestExecutor {
    pub fn new(endpoint: Arc<dyn Endpoint>, policy: RetryPolicy) -> Self {
        Self {
            endpoint,
            policy,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// 执行一个逻辑请求
    ///
    /// `deadline` 之后不再发起新的退避等待
    pub async fn execute(&self, spec: RequestSpec, deadline: Option<Instant>) -> Record {
        let mut request = LogicalRequest::new(spec, self.policy, self.backoff.clone());

        loop {
            match request.state() {
                RequestState::Pending => request.begin(),
                RequestState::Attempting { index } => {
                    let attempt = self.endpoint.attempt(request.spec(), index).await;
                    request.on_attempt(attempt, deadline);
                }
                RequestState::BackoffWait { index, wait } => {
                    tracing::debug!("第 {} 次尝试未成功，{:?} 后重试", index + 1, wait);
                    tokio::time::sleep(wait).await;
                    request.resume();
                }
                RequestState::Succeeded | RequestState::GaveUp => break,
            }
        }

        let record = request.into_record();
        if record.attempts > 1 {
            tracing::debug!(
                "逻辑请求结束: {:?}，共 {} 次尝试，耗时 {:?}",
                record.outcome,
                record.attempts,
                record.e2e
            );
        }
        record
    }
}
