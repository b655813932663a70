//! load 子命令：组装各组件并运行一次压测

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use crate::executor::endpoint::{HttpEndpoint, SamplingParams};
use crate::executor::RequestExecutor;
use crate::metrics::StatsAggregator;
use crate::model::config::LoadConfig;
use crate::scheduler::warmup::warm_up;
use crate::scheduler::{RateScheduler, RunContext, SchedulerConfig};
use crate::workload::build_generator;

/// 监听 Ctrl-C：第一次停止调度并等待进行中的请求，第二次立即退出
fn spawn_interrupt_handler(stop: watch::Sender<bool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("收到中断信号，停止发起新请求并等待进行中的请求完成（再次 Ctrl-C 立即退出）");
        let _ = stop.send(true);

        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("再次收到中断信号，立即退出");
            std::process::exit(130);
        }
    });
}

pub async fn run(config: LoadConfig) -> anyhow::Result<()> {
    config.validate()?;
    let api_key = config.api_key()?;
    let url = config.request_url();

    if let Some(path) = config.config_path() {
        tracing::info!("使用配置文件: {}", path.display());
    }
    tracing::info!("目标地址: {}", url);
    #[cfg(feature = "sensitive-logs")]
    tracing::debug!("完整配置: {:?}", config);

    let client = crate::http_client::build_client(config.proxy_url.as_deref(), config.request_timeout)
        .context("创建 HTTP 客户端失败")?;
    let endpoint = Arc::new(HttpEndpoint::new(
        client,
        url,
        api_key,
        SamplingParams::from_config(&config),
    ));
    let generator = build_generator(&config)?;

    warm_up(endpoint.as_ref(), &generator.generate()).await?;

    let context = Arc::new(RunContext::new(config.window()));
    let executor = Arc::new(RequestExecutor::new(endpoint, config.retry));
    let scheduler = RateScheduler::new(
        executor,
        generator,
        context.clone(),
        SchedulerConfig::from_config(&config),
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    spawn_interrupt_handler(stop_tx);

    let (aggregator_stop_tx, aggregator_stop_rx) = watch::channel(false);
    let aggregator = StatsAggregator::new(context.clone(), config.output_format).spawn(aggregator_stop_rx);

    scheduler.run(stop_rx).await;

    let _ = aggregator_stop_tx.send(true);
    let summary = aggregator.await.context("统计任务异常退出")?;
    tracing::info!(
        "共发起 {} 个请求: 成功 {}，限流 {}，失败 {}",
        summary.requests,
        summary.completed,
        summary.throttled,
        summary.failures
    );
    Ok(())
}
