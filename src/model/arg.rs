use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::config::{ContextGenerationMethod, LoadConfig, OutputFormat, RetryPolicy, ShapeProfile};
use crate::token::DEFAULT_TOKENIZE_MODEL;

/// Provisioned throughput 压测工具
#[derive(Parser, Debug)]
#[command(name = "ptu-bench", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 运行负载生成
    Load(LoadArgs),
    /// 统计文本或 chat 消息的 token 数
    Tokenize(TokenizeArgs),
}

/// load 子命令参数
///
/// 所有选项均为可选覆盖项，未指定时使用配置文件或默认值
#[derive(Args, Debug, Default)]
pub struct LoadArgs {
    /// 部署的基础地址
    pub endpoint: Option<String>,

    /// 配置文件路径
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// 部署名称
    #[arg(short = 'e', long)]
    pub deployment: Option<String>,

    #[arg(short = 'a', long)]
    pub api_version: Option<String>,

    /// 存放 API 密钥的环境变量名
    #[arg(short = 'k', long)]
    pub api_key_env: Option<String>,

    /// 并发上限
    #[arg(short = 'c', long)]
    pub clients: Option<usize>,

    /// 逻辑请求总数
    #[arg(short = 'n', long)]
    pub requests: Option<u64>,

    /// 运行时长（秒）
    #[arg(short = 'd', long)]
    pub duration: Option<u64>,

    /// 目标速率（RPM）
    #[arg(short = 'r', long)]
    pub rate: Option<f64>,

    /// 统计滑动窗口（秒）
    #[arg(short = 'w', long)]
    pub aggregation_window: Option<f64>,

    #[arg(long, value_enum)]
    pub context_generation_method: Option<ContextGenerationMethod>,

    /// 回放消息 JSON 文件
    #[arg(long)]
    pub replay_path: Option<PathBuf>,

    #[arg(short = 's', long, value_enum)]
    pub shape_profile: Option<ShapeProfile>,

    #[arg(short = 'p', long)]
    pub context_tokens: Option<u32>,

    #[arg(short = 'm', long)]
    pub max_tokens: Option<u32>,

    #[arg(long)]
    pub prevent_server_caching: Option<bool>,

    #[arg(short = 'i', long)]
    pub completions: Option<u32>,

    #[arg(long, allow_hyphen_values = true)]
    pub frequency_penalty: Option<f32>,

    #[arg(long, allow_hyphen_values = true)]
    pub presence_penalty: Option<f32>,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub top_p: Option<f32>,

    #[arg(short = 'f', long, value_enum)]
    pub output_format: Option<OutputFormat>,

    #[arg(short = 't', long, value_enum)]
    pub retry: Option<RetryPolicy>,

    /// HTTP 代理地址
    #[arg(long = "proxy")]
    pub proxy_url: Option<String>,

    /// 单次 HTTP 调用超时（秒）
    #[arg(long)]
    pub request_timeout: Option<u64>,
}

/// tokenize 子命令参数
#[derive(Args, Debug)]
pub struct TokenizeArgs {
    /// 待统计的文本或 chat 消息 JSON，缺省时读取标准输入
    pub text: Option<String>,

    /// 按哪个模型的词表统计
    #[arg(short = 'm', long, default_value = DEFAULT_TOKENIZE_MODEL)]
    pub model: String,
}

macro_rules! override_some {
    ($config:ident, $args:ident, $($field:ident),+ $(,)?) => {
        $(
            if let Some(v) = $args.$field {
                $config.$field = v;
            }
        )+
    };
}

macro_rules! override_option {
    ($config:ident, $args:ident, $($field:ident),+ $(,)?) => {
        $(
            if $args.$field.is_some() {
                $config.$field = $args.$field;
            }
        )+
    };
}

impl LoadArgs {
    /// 加载配置文件（如果指定），再用命令行参数覆盖
    pub fn into_config(self) -> anyhow::Result<LoadConfig> {
        let mut config = match &self.config {
            Some(path) => LoadConfig::load(path)?,
            None => LoadConfig::default(),
        };
        self.apply_to(&mut config);
        Ok(config)
    }

    fn apply_to(self, config: &mut LoadConfig) {
        let args = self;
        override_some!(
            config,
            args,
            endpoint,
            deployment,
            api_version,
            api_key_env,
            aggregation_window,
            context_generation_method,
            shape_profile,
            prevent_server_caching,
            completions,
            output_format,
            retry,
            request_timeout,
        );
        override_option!(
            config,
            args,
            clients,
            requests,
            duration,
            rate,
            replay_path,
            context_tokens,
            max_tokens,
            frequency_penalty,
            presence_penalty,
            temperature,
            top_p,
            proxy_url,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_load_command() {
        let cli = Cli::try_parse_from([
            "ptu-bench",
            "load",
            "https://example.openai.azure.com",
            "--deployment",
            "gpt-4",
            "--rate",
            "120",
            "--retry",
            "exponential",
            "--shape-profile",
            "custom",
            "--context-tokens",
            "1000",
            "--frequency-penalty",
            "-1.5",
        ])
        .unwrap();

        let Command::Load(args) = cli.command else {
            panic!("应该解析为 load 子命令");
        };
        let config = args.into_config().unwrap();
        assert_eq!(config.endpoint, "https://example.openai.azure.com");
        assert_eq!(config.deployment, "gpt-4");
        assert_eq!(config.rate, Some(120.0));
        assert_eq!(config.retry, RetryPolicy::Exponential);
        assert_eq!(config.shape_profile, ShapeProfile::Custom);
        assert_eq!(config.context_tokens, Some(1000));
        assert_eq!(config.frequency_penalty, Some(-1.5));
        // 未指定的字段保持默认值
        assert_eq!(config.api_version, "2023-05-15");
        assert_eq!(config.aggregation_window, 60.0);
    }

    #[test]
    fn test_args_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.json");
        std::fs::write(&path, r#"{"deployment": "from-file", "rate": 30, "clients": 8}"#).unwrap();

        let args = LoadArgs {
            config: Some(path),
            rate: Some(90.0),
            ..Default::default()
        };
        let config = args.into_config().unwrap();
        assert_eq!(config.deployment, "from-file");
        assert_eq!(config.rate, Some(90.0));
        assert_eq!(config.clients, Some(8));
    }

    #[test]
    fn test_parse_tokenize_command() {
        let cli = Cli::try_parse_from(["ptu-bench", "tokenize", "hello world"]).unwrap();
        match cli.command {
            Command::Tokenize(args) => {
                assert_eq!(args.text.as_deref(), Some("hello world"));
                assert_eq!(args.model, "gpt-4");
            }
            _ => panic!("应该解析为 tokenize 子命令"),
        }
    }

    #[test]
    fn test_parse_tokenize_model() {
        let cli = Cli::try_parse_from(["ptu-bench", "tokenize", "-m", "gpt-3.5-turbo", "hi"]).unwrap();
        let Command::Tokenize(args) = cli.command else {
            panic!("应该解析为 tokenize 子命令");
        };
        assert_eq!(args.model, "gpt-3.5-turbo");
        assert_eq!(args.text.as_deref(), Some("hi"));
    }
}
