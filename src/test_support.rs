//! 测试用的模拟流式端点

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Json, Response,
    },
    routing::post,
    Router,
};
use futures::stream::{self, Stream, StreamExt};

use crate::executor::endpoint::{RETRY_AFTER_MS_HEADER, UTILIZATION_HEADER};

/// 模拟端点的响应方式
#[derive(Debug, Clone, Copy)]
pub enum MockBehavior {
    /// 正常流式返回 `tokens` 个 token，每个 token 前等待 `delay`
    Stream { tokens: usize, delay: Duration },
    /// 返回 429
    Throttle { retry_after_ms: Option<u64> },
    /// 前 `failures` 次返回 429，之后正常流式返回
    ThrottleThenStream { failures: usize, tokens: usize },
    /// 返回指定状态码和错误正文
    Status(u16),
    /// 流中包含无法解析的数据
    Malformed,
}

struct MockState {
    behavior: MockBehavior,
    hits: AtomicUsize,
}

pub struct MockServer {
    addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockServer {
    pub async fn start(behavior: MockBehavior) -> Self {
        let state = Arc::new(MockState {
            behavior,
            hits: AtomicUsize::new(0),
        });
        let app = Router::new()
            .route("/chat", post(handle))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}/chat", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }
}

/// 一个没有监听者的本地地址
pub async fn unused_local_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/chat", addr)
}

fn token_chunk(text: &str) -> String {
    serde_json::json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion.chunk",
        "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]
    })
    .to_string()
}

fn token_stream(
    tokens: usize,
    delay: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let role = serde_json::json!({
        "choices": [{"index": 0, "delta": {"role": "assistant"}}]
    })
    .to_string();
    let head = stream::iter([Ok::<_, Infallible>(Event::default().data(role))]);
    let body = stream::unfold(0usize, move |i| async move {
        if i >= tokens {
            return None;
        }
        tokio::time::sleep(delay).await;
        Some((Ok(Event::default().data(token_chunk(&format!("t{} ", i)))), i + 1))
    });
    let tail = stream::iter([Ok(Event::default().data("[DONE]"))]);
    head.chain(body).chain(tail)
}

fn with_utilization(mut response: Response, value: &'static str) -> Response {
    response
        .headers_mut()
        .insert(UTILIZATION_HEADER, HeaderValue::from_static(value));
    response
}

fn throttled(retry_after_ms: Option<u64>) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({"error": {"code": "429", "message": "Rate limit is exceeded."}})),
    )
        .into_response();
    if let Some(ms) = retry_after_ms {
        response
            .headers_mut()
            .insert(RETRY_AFTER_MS_HEADER, HeaderValue::from(ms));
    }
    with_utilization(response, "100.0%")
}

async fn handle(State(state): State<Arc<MockState>>) -> Response {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst);
    match state.behavior {
        MockBehavior::Stream { tokens, delay } => {
            with_utilization(Sse::new(token_stream(tokens, delay)).into_response(), "11.2%")
        }
        MockBehavior::Throttle { retry_after_ms } => throttled(retry_after_ms),
        MockBehavior::ThrottleThenStream { failures, tokens } => {
            if hit < failures {
                throttled(Some(20))
            } else {
                with_utilization(
                    Sse::new(token_stream(tokens, Duration::from_millis(1))).into_response(),
                    "55.0%",
                )
            }
        }
        MockBehavior::Status(code) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (
                status,
                Json(serde_json::json!({"error": {"code": code.to_string(), "message": "mock error"}})),
            )
                .into_response()
        }
        MockBehavior::Malformed => {
            let events = stream::iter([
                Ok::<_, Infallible>(Event::default().data(token_chunk("ok"))),
                Ok(Event::default().data("this is not json")),
                Ok(Event::default().data("[DONE]")),
            ]);
            Sse::new(events).into_response()
        }
    }
}
