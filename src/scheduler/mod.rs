//! 开环速率调度
//!
//! 按固定间隔发起逻辑请求，不等待之前的请求完成；端点容量不足时进行中的请求数上升，
//! 完成速率低于目标速率

pub mod context;
pub mod warmup;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval};

use crate::executor::retry::RETRY_CEILING;
use crate::executor::RequestExecutor;
use crate::model::config::{LoadConfig, DEFAULT_CLIENTS_WITHOUT_RATE};
use crate::workload::MessageGenerator;
pub use context::RunContext;

/// 等待并发槽位超过该时长时提示速率跟不上
const LAG_WARNING_THRESHOLD: Duration = Duration::from_secs(1);
/// 发起间隔下限，`interval` 不接受 0
const MIN_TICK_PERIOD: Duration = Duration::from_micros(1);

/// 目标速率（每分钟）对应的发起间隔
fn tick_period(rpm: f64) -> Duration {
    Duration::try_from_secs_f64(60.0 / rpm)
        .unwrap_or(MIN_TICK_PERIOD)
        .max(MIN_TICK_PERIOD)
}

/// 调度参数
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 目标速率（每分钟）
    pub rate: Option<f64>,
    pub duration: Option<Duration>,
    /// 逻辑请求总数上限
    pub requests: Option<u64>,
    /// 并发上限
    pub clients: Option<usize>,
    /// 停止发起后等待进行中请求的最长时间
    pub drain_timeout: Duration,
}

impl SchedulerConfig {
    pub fn from_config(config: &LoadConfig) -> Self {
        Self {
            rate: config.rate_per_minute(),
            duration: config.run_duration(),
            requests: config.requests,
            clients: config.effective_clients(),
            drain_timeout: RETRY_CEILING + Duration::from_secs(config.request_timeout),
        }
    }
}

pub struct RateScheduler {
    executor: Arc<RequestExecutor>,
    generator: Arc<dyn MessageGenerator>,
    context: Arc<RunContext>,
    config: SchedulerConfig,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    if let Some(interval) = ticker {
        interval.tick().await;
    }
}

impl RateScheduler {
    pub fn new(
        executor: Arc<RequestExecutor>,
        generator: Arc<dyn MessageGenerator>,
        context: Arc<RunContext>,
        mut config: SchedulerConfig,
    ) -> Self {
        if config.rate.is_none() && config.clients.is_none() {
            config.clients = Some(DEFAULT_CLIENTS_WITHOUT_RATE);
        }
        Self {
            executor,
            generator,
            context,
            config,
        }
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.context
    }

    /// 运行调度循环，直到时长、请求数耗尽或收到停止信号，然后等待进行中的请求结束
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        let started_at = Instant::now();
        let run_end = self.config.duration.map(|d| started_at + d);
        // 运行结束后不再开始新的退避等待
        let retry_deadline = run_end.map(|end| end + RETRY_CEILING);
        let semaphore = self.config.clients.map(|n| Arc::new(Semaphore::new(n)));
        let mut ticker = self.config.rate.map(|rpm| {
            let mut interval = tokio::time::interval(tick_period(rpm));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);
            interval
        });

        tracing::info!(
            "开始调度: rate={:?} rpm, duration={:?}, requests={:?}, clients={:?}",
            self.config.rate,
            self.config.duration,
            self.config.requests,
            self.config.clients
        );

        let mut tasks = JoinSet::new();
        let mut issued: u64 = 0;

        loop {
            if *stop.borrow() {
                break;
            }
            if self.config.requests.is_some_and(|max| issued >= max) {
                tracing::info!("已发起 {} 个请求，达到上限", issued);
                break;
            }

            tokio::select! {
                biased;
                _ = stop.changed() => break,
                _ = sleep_until_opt(run_end) => break,
                _ = next_tick(&mut ticker) => {}
            }

            let permit = match &semaphore {
                Some(semaphore) => {
                    let wait_start = Instant::now();
                    let permit: Option<OwnedSemaphorePermit> = tokio::select! {
                        biased;
                        _ = stop.changed() => None,
                        _ = sleep_until_opt(run_end) => None,
                        permit = semaphore.clone().acquire_owned() => permit.ok(),
                    };
                    let Some(permit) = permit else {
                        break;
                    };
                    let waited = wait_start.elapsed();
                    if self.config.rate.is_some() && waited > LAG_WARNING_THRESHOLD {
                        tracing::warn!(
                            "等待并发槽位 {:.1} 秒，实际速率落后于目标速率，考虑增大 clients",
                            waited.as_secs_f64()
                        );
                    }
                    Some(permit)
                }
                None => None,
            };

            let spec = self.generator.generate();
            let executor = self.executor.clone();
            let context = self.context.clone();
            context.begin_request();
            issued += 1;
            tasks.spawn(async move {
                let record = executor.execute(spec, retry_deadline).await;
                context.complete(record);
                drop(permit);
            });

            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    tracing::error!("请求任务异常退出: {}", e);
                }
            }
        }

        self.drain(tasks).await;
    }

    async fn drain(&self, mut tasks: JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }
        tracing::info!("停止发起新请求，等待 {} 个进行中的请求完成", tasks.len());

        let deadline = Instant::now() + self.config.drain_timeout;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(()))) => {}
                Ok(Some(Err(e))) => tracing::error!("请求任务异常退出: {}", e),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "等待 {:?} 后仍有 {} 个请求未完成，放弃等待",
                        self.config.drain_timeout,
                        tasks.len()
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }
    }
}
