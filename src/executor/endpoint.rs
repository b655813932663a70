//! 流式 chat completions 端点
//!
//! 每次调用强制使用流式模式，以便采集逐 token 时序

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use super::attempt::Attempt;
use crate::common::truncate_with_ellipsis;
use crate::model::config::LoadConfig;
use crate::model::message::ChatMessage;
use crate::workload::RequestSpec;

pub const REQUEST_ID_HEADER: &str = "apim-request-id";
pub const CLIENT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";
pub const UTILIZATION_HEADER: &str = "azure-openai-deployment-utilization";
pub const RETRY_AFTER_MS_HEADER: &str = "retry-after-ms";
pub const RETRY_AFTER_S_HEADER: &str = "retry-after";

/// 错误日志中响应正文的最大长度
const MAX_LOGGED_BODY_BYTES: usize = 512;

/// 执行单次尝试的端点
///
/// 实现方不得向调用方抛出错误：所有结果都编码在返回的 [`Attempt`] 中
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn attempt(&self, spec: &RequestSpec, index: u32) -> Attempt;
}

/// 透传到请求体的采样参数
#[derive(Debug, Clone, Default)]
pub struct SamplingParams {
    pub completions: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
}

impl SamplingParams {
    pub fn from_config(config: &LoadConfig) -> Self {
        Self {
            completions: Some(config.completions).filter(|n| *n > 1),
            temperature: config.temperature,
            top_p: config.top_p,
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
        }
    }
}

/// chat completions 请求体
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
}

/// 流式响应块
#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// SSE 行解析结果
#[derive(Debug, PartialEq)]
pub(crate) enum SseLine {
    /// 携带生成内容的数据块
    Token,
    /// 注释、空行、无内容的数据块（角色、内容过滤结果等）
    Ignored,
    /// data: [DONE]
    Done,
    /// 流内错误事件或无法解析的数据
    Malformed(String),
}

pub(crate) fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Ignored;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    if data.is_empty() {
        return SseLine::Ignored;
    }

    match serde_json::from_str::<ChatCompletionChunk>(data) {
        Ok(chunk) => {
            if let Some(error) = chunk.error {
                return SseLine::Malformed(format!("流内错误: {}", error));
            }
            let has_content = chunk.choices.iter().any(|c| {
                c.delta
                    .as_ref()
                    .and_then(|d| d.content.as_deref())
                    .is_some_and(|s| !s.is_empty())
            });
            if has_content {
                SseLine::Token
            } else {
                SseLine::Ignored
            }
        }
        Err(e) => SseLine::Malformed(format!(
            "无法解析流数据: {} ({})",
            e,
            truncate_with_ellipsis(data, 128)
        )),
    }
}

/// 从缓冲区取出一行（不含换行符）
fn next_line(buffer: &mut BytesMut) -> Option<String> {
    let pos = buffer.iter().position(|b| *b == b'\n')?;
    let line = buffer.split_to(pos + 1);
    Some(String::from_utf8_lossy(&line).into_owned())
}

/// 解析利用率头，形如 "12.5%"
pub(crate) fn parse_utilization(headers: &HeaderMap) -> Option<f64> {
    let value = headers.get(UTILIZATION_HEADER)?;
    let Ok(value) = value.to_str() else {
        tracing::warn!("利用率头 {} 不是有效字符串", UTILIZATION_HEADER);
        return None;
    };
    if value.is_empty() {
        tracing::warn!("利用率头 {} 为空", UTILIZATION_HEADER);
        return None;
    }
    let Some(number) = value.strip_suffix('%') else {
        tracing::warn!("无效的利用率头: {}={}", UTILIZATION_HEADER, value);
        return None;
    };
    match number.trim().parse::<f64>() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("无法解析利用率头: {}={}: {}", UTILIZATION_HEADER, value, e);
            None
        }
    }
}

/// 解析重试等待头，优先 retry-after-ms，其次 retry-after（秒）
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    fn read(headers: &HeaderMap, name: &str) -> Option<f64> {
        let raw = headers.get(name)?.to_str().ok()?;
        match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => Some(v),
            _ => {
                tracing::warn!("无法解析重试等待头: {}={}", name, raw);
                None
            }
        }
    }

    if headers.contains_key(RETRY_AFTER_MS_HEADER) {
        return read(headers, RETRY_AFTER_MS_HEADER).map(|ms| Duration::from_secs_f64(ms / 1000.0));
    }
    read(headers, RETRY_AFTER_S_HEADER).map(Duration::from_secs_f64)
}

/// 基于 reqwest 的 HTTP 端点
pub struct HttpEndpoint {
    client: reqwest::Client,
    url: String,
    api_key: String,
    params: SamplingParams,
}

impl HttpEndpoint {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        api_key: impl Into<String>,
        params: SamplingParams,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
            params,
        }
    }

    fn build_body<'a>(&self, spec: &'a RequestSpec) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            messages: &spec.messages,
            stream: true,
            max_tokens: spec.max_tokens,
            n: self.params.completions,
            temperature: self.params.temperature,
            top_p: self.params.top_p,
            frequency_penalty: self.params.frequency_penalty,
            presence_penalty: self.params.presence_penalty,
        }
    }

    /// 读取流式响应，记录每个 token 的到达时刻
    async fn read_stream(&self, response: reqwest::Response, mut attempt: Attempt) -> Attempt {
        let mut stream = response.bytes_stream();
        let mut buffer = BytesMut::new();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => return attempt.fail(format!("读取响应流失败: {}", e), true),
            };
            let arrived_at = Instant::now();
            buffer.extend_from_slice(&chunk);

            while let Some(line) = next_line(&mut buffer) {
                match parse_sse_line(&line) {
                    SseLine::Token => attempt.token_received(arrived_at),
                    SseLine::Ignored => {}
                    SseLine::Done => return attempt.succeed(),
                    SseLine::Malformed(msg) => return attempt.fail(msg, false),
                }
            }
        }

        // 流结束时可能残留一行没有换行符的数据
        if !buffer.is_empty() {
            let line = String::from_utf8_lossy(&buffer).into_owned();
            match parse_sse_line(&line) {
                SseLine::Token => attempt.token_received(Instant::now()),
                SseLine::Malformed(msg) => return attempt.fail(msg, false),
                SseLine::Ignored | SseLine::Done => {}
            }
        }
        attempt.succeed()
    }
}

#[async_trait]
impl Endpoint for HttpEndpoint {
    async fn attempt(&self, spec: &RequestSpec, index: u32) -> Attempt {
        let body = self.build_body(spec);
        let client_request_id = uuid::Uuid::new_v4().to_string();

        #[cfg(feature = "sensitive-logs")]
        tracing::debug!(
            client_request_id = %client_request_id,
            "请求体: {}",
            serde_json::to_string(&body).unwrap_or_default()
        );

        let attempt = Attempt::start(index);
        let response = match self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .header(CLIENT_REQUEST_ID_HEADER, &client_request_id)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(client_request_id = %client_request_id, "请求发送失败: {}", e);
                return attempt.fail(format!("请求发送失败: {}", e), true);
            }
        };

        let status = response.status();
        let mut attempt = attempt.with_status(status.as_u16());
        // 任何状态下都尝试读取利用率
        attempt.utilization = parse_utilization(response.headers());

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(response.headers());
            tracing::debug!(
                client_request_id = %client_request_id,
                attempt = index,
                "请求被限流，retry-after: {:?}",
                retry_after
            );
            return attempt.throttle(retry_after);
        }

        if !status.is_success() {
            let request_id = response
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_string();
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(
                "调用失败: {}={} {}: {}",
                REQUEST_ID_HEADER,
                request_id,
                status,
                truncate_with_ellipsis(&text, MAX_LOGGED_BODY_BYTES)
            );
            let retryable = status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT;
            return attempt.fail(format!("HTTP {}", status), retryable);
        }

        self.read_stream(response, attempt).await
    }
}
