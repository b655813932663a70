//! 统计快照及其输出格式

use serde::Serialize;

use super::stats::Summary;
use crate::model::config::OutputFormat;

/// 平均值 / 95 分位，无样本时为空
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Figure {
    pub avg: Option<f64>,
    #[serde(rename = "95th")]
    pub p95: Option<f64>,
}

impl From<Option<Summary>> for Figure {
    fn from(summary: Option<Summary>) -> Self {
        match summary {
            Some(s) => Self {
                avg: Some(s.avg),
                p95: Some(s.p95),
            },
            None => Self::default(),
        }
    }
}

/// 每分钟 token 数
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TokenRate {
    pub context: Option<f64>,
    #[serde(rename = "gen")]
    pub generated: Option<f64>,
    /// 两项都不可用时为空
    pub total: Option<f64>,
}

impl TokenRate {
    pub fn new(context: Option<f64>, generated: Option<f64>) -> Self {
        let total = match (context, generated) {
            (Some(c), Some(g)) => Some(c + g),
            (c, g) => c.or(g),
        };
        Self {
            context,
            generated,
            total,
        }
    }
}

/// 一次统计输出
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub timestamp: String,
    pub run_seconds: u64,
    /// 已发起的逻辑请求
    pub requests: u64,
    pub completed: u64,
    pub failures: u64,
    pub throttled: u64,
    pub in_flight: u64,
    pub rpm: Option<f64>,
    pub tpm: TokenRate,
    /// 首 token 延迟（秒）
    pub ttft: Figure,
    /// token 间隔（秒）
    pub tbt: Figure,
    /// 端到端延迟（秒）
    pub e2e: Figure,
    /// 利用率（百分比）
    pub util: Figure,
}

fn opt(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{}%", v))
}

impl Snapshot {
    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Human => self.render_human(),
            OutputFormat::Jsonl => serde_json::to_string(self).unwrap_or_else(|e| {
                tracing::error!("序列化快照失败: {}", e);
                String::new()
            }),
        }
    }

    fn render_human(&self) -> String {
        format!(
            "{} run_seconds: {:<5} rpm: {:<6} requests: {:<5} completed: {:<5} failures: {:<4} throttled: {:<4} in_flight: {:<4} \
             tpm: {:<7} tpm_context: {:<7} tpm_gen: {:<7} ttft_avg: {:<6} ttft_95th: {:<6} tbt_avg: {:<6} tbt_95th: {:<6} \
             e2e_avg: {:<6} e2e_95th: {:<6} util_avg: {:<6} util_95th: {:<6}",
            self.timestamp,
            self.run_seconds,
            opt(self.rpm),
            self.requests,
            self.completed,
            self.failures,
            self.throttled,
            self.in_flight,
            opt(self.tpm.total),
            opt(self.tpm.context),
            opt(self.tpm.generated),
            opt(self.ttft.avg),
            opt(self.ttft.p95),
            opt(self.tbt.avg),
            opt(self.tbt.p95),
            opt(self.e2e.avg),
            opt(self.e2e.p95),
            percent(self.util.avg),
            percent(self.util.p95),
        )
    }
}
