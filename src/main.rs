use clap::Parser;
use tracing_subscriber::EnvFilter;

use ptu_bench::model::arg::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志写到 stderr，stdout 只输出统计快照
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Load(args) => {
            let config = args.into_config()?;
            ptu_bench::load::run(config).await
        }
        Command::Tokenize(args) => ptu_bench::tokenize::run(args),
    }
}
