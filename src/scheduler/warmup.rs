//! 预热请求
//!
//! 正式计量前发送一个不计入统计的请求，既预热端点的 prompt 缓存，也作为启动时的连通性检查

use crate::executor::endpoint::Endpoint;
use crate::metrics::record::Outcome;
use crate::workload::RequestSpec;

/// 这些状态码说明配置有误，继续运行没有意义
const FATAL_STATUSES: &[u16] = &[401, 403, 404];

pub async fn warm_up(endpoint: &dyn Endpoint, spec: &RequestSpec) -> anyhow::Result<()> {
    tracing::info!("发送预热请求");
    let attempt = endpoint.attempt(spec, 0).await;

    match (attempt.outcome, attempt.status) {
        (Outcome::Success, _) => {
            tracing::info!(
                "预热完成，耗时 {:?}，生成 {} 个 token",
                attempt.duration(),
                attempt.generated_tokens()
            );
            Ok(())
        }
        (Outcome::Throttled, _) => {
            tracing::warn!("预热请求被限流，端点可能已经满载");
            Ok(())
        }
        (Outcome::Failed, None) => anyhow::bail!(
            "无法连接端点: {}",
            attempt.error.unwrap_or_default()
        ),
        (Outcome::Failed, Some(status)) if FATAL_STATUSES.contains(&status) => {
            anyhow::bail!("端点拒绝请求 (HTTP {})，请检查地址、部署名称和 API 密钥", status)
        }
        (Outcome::Failed, Some(status)) => {
            tracing::warn!(
                "预热请求失败 (HTTP {}): {}",
                status,
                attempt.error.unwrap_or_default()
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::endpoint::{HttpEndpoint, SamplingParams};
    use crate::model::message::ChatMessage;
    use crate::test_support::{unused_local_url, MockBehavior, MockServer};
    use std::time::Duration;

    fn spec() -> RequestSpec {
        RequestSpec {
            context_tokens: 10,
            max_tokens: Some(4),
            messages: vec![ChatMessage::user("warm up")],
        }
    }

    fn endpoint(url: String) -> HttpEndpoint {
        let client = crate::http_client::build_client(None, 10).unwrap();
        HttpEndpoint::new(client, url, "key", SamplingParams::default())
    }

    #[tokio::test]
    async fn test_warm_up_success() {
        let server = MockServer::start(MockBehavior::Stream {
            tokens: 2,
            delay: Duration::from_millis(5),
        })
        .await;
        assert!(warm_up(&endpoint(server.url()), &spec()).await.is_ok());
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_warm_up_throttled_is_not_fatal() {
        let server = MockServer::start(MockBehavior::Throttle {
            retry_after_ms: None,
        })
        .await;
        assert!(warm_up(&endpoint(server.url()), &spec()).await.is_ok());
    }

    #[tokio::test]
    async fn test_warm_up_unauthorized_is_fatal() {
        let server = MockServer::start(MockBehavior::Status(401)).await;
        let err = warm_up(&endpoint(server.url()), &spec()).await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_warm_up_unreachable_is_fatal() {
        let url = unused_local_url().await;
        let err = warm_up(&endpoint(url), &spec()).await.unwrap_err();
        assert!(err.to_string().contains("无法连接端点"));
    }
}
