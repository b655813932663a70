//! 周期统计任务
//!
//! 每秒从滑动窗口计算一次快照并输出到标准输出

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::snapshot::{Figure, Snapshot, TokenRate};
use super::stats::Summary;
use crate::common::{round_to, secs};
use crate::model::config::OutputFormat;
use crate::scheduler::context::RunContext;

/// 输出周期
pub const TICK: Duration = Duration::from_secs(1);

/// 计算 rpm 时窗口时长的下限，避免刚启动时外推出夸张的数值
const MIN_EFFECTIVE_WINDOW: Duration = Duration::from_secs(1);

pub struct StatsAggregator {
    context: Arc<RunContext>,
    format: OutputFormat,
}

impl StatsAggregator {
    pub fn new(context: Arc<RunContext>, format: OutputFormat) -> Self {
        Self { context, format }
    }

    /// 基于 `now` 时刻的窗口计算快照
    pub fn snapshot(&self, now: Instant) -> Snapshot {
        let window = self.context.window();
        let records = self.context.store.window(now, window);
        let counters = self.context.counters.load();
        let elapsed = self.context.elapsed(now);

        // 运行时间不足一个窗口时按实际时长外推
        let effective = elapsed.min(window).max(MIN_EFFECTIVE_WINDOW);
        let per_minute = |value: f64| value * 60.0 / secs(effective);

        let succeeded: Vec<_> = records.iter().filter(|r| r.is_success()).collect();
        let rpm = (!succeeded.is_empty())
            .then(|| round_to(per_minute(succeeded.len() as f64), 1));
        let context_tpm = (!succeeded.is_empty()).then(|| {
            round_to(
                per_minute(succeeded.iter().map(|r| r.context_tokens).sum::<u64>() as f64),
                0,
            )
        });
        let gen_tpm = (!succeeded.is_empty()).then(|| {
            round_to(
                per_minute(succeeded.iter().map(|r| r.generated_tokens).sum::<u64>() as f64),
                0,
            )
        });

        let mut ttft: Vec<f64> = records.iter().filter_map(|r| r.ttft).map(secs).collect();
        let mut tbt: Vec<f64> = records
            .iter()
            .flat_map(|r| r.token_gaps.iter().copied())
            .map(secs)
            .collect();
        let mut e2e: Vec<f64> = records.iter().map(|r| secs(r.e2e)).collect();
        let mut util: Vec<f64> = records.iter().filter_map(|r| r.utilization).collect();

        let latency = |samples: &mut [f64]| -> Figure {
            Summary::of(samples).map(|s| s.map(|v| round_to(v, 3))).into()
        };

        Snapshot {
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            run_seconds: elapsed.as_secs_f64().round() as u64,
            requests: counters.issued,
            completed: counters.completed,
            failures: counters.failed,
            throttled: counters.throttled,
            in_flight: counters.in_flight,
            rpm,
            tpm: TokenRate::new(context_tpm, gen_tpm),
            ttft: latency(&mut ttft),
            tbt: latency(&mut tbt),
            e2e: latency(&mut e2e),
            util: Summary::of(&mut util).map(|s| s.map(|v| round_to(v, 1))).into(),
        }
    }

    fn emit(&self, snapshot: &Snapshot) {
        println!("{}", snapshot.render(self.format));
    }

    /// 启动周期任务，`stop` 变为 true 后输出最终汇总并返回
    pub fn spawn(self, mut stop: watch::Receiver<bool>) -> JoinHandle<Snapshot> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // 第一次 tick 立即完成，跳过
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = Instant::now();
                        let snapshot = self.snapshot(now);
                        self.emit(&snapshot);
                        self.context.store.prune(now, self.context.window());
                    }
                    result = stop.changed() => {
                        if result.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }

            let snapshot = self.snapshot(Instant::now());
            tracing::info!("运行结束，最终统计:");
            self.emit(&snapshot);
            snapshot
        })
    }
}
