use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 重试策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RetryPolicy {
    /// 只尝试一次，任何非成功结果直接上报
    None,
    /// 指数退避重试，直到成功或累计耗时超过上限
    Exponential,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::None
    }
}

/// 请求形态预设（上下文 token 数 / 最大生成 token 数）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ShapeProfile {
    Balanced,
    Context,
    Generation,
    Custom,
}

impl Default for ShapeProfile {
    fn default() -> Self {
        Self::Balanced
    }
}

/// 上下文消息来源
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ContextGenerationMethod {
    /// 随机单词生成
    Generate,
    /// 从 JSON 文件回放
    Replay,
}

impl Default for ContextGenerationMethod {
    fn default() -> Self {
        Self::Generate
    }
}

/// 快照输出格式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    Human,
    Jsonl,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Human
    }
}

/// 解析后的请求形态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub context_tokens: u32,
    pub max_tokens: Option<u32>,
}

/// 压测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadConfig {
    /// 部署的基础地址，例如 https://xxx.openai.azure.com
    #[serde(default)]
    pub endpoint: String,

    /// 部署名称
    #[serde(default)]
    pub deployment: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// 存放 API 密钥的环境变量名
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// 并发上限（未配置时不限制）
    #[serde(default)]
    pub clients: Option<usize>,

    /// 逻辑请求总数上限
    #[serde(default)]
    pub requests: Option<u64>,

    /// 运行时长（秒），0 或未配置表示直到被中断
    #[serde(default)]
    pub duration: Option<u64>,

    /// 目标速率（每分钟请求数），未配置表示尽可能快
    #[serde(default)]
    pub rate: Option<f64>,

    /// 统计滑动窗口（秒）
    #[serde(default = "default_aggregation_window")]
    pub aggregation_window: f64,

    #[serde(default)]
    pub context_generation_method: ContextGenerationMethod,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_path: Option<PathBuf>,

    #[serde(default)]
    pub shape_profile: ShapeProfile,

    /// 上下文 token 数（仅 custom 形态）
    #[serde(default)]
    pub context_tokens: Option<u32>,

    /// 最大生成 token 数（仅 custom 形态）
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// 每条消息加时间戳前缀，避免服务端缓存
    #[serde(default = "default_prevent_server_caching")]
    pub prevent_server_caching: bool,

    #[serde(default = "default_completions")]
    pub completions: u32,

    #[serde(default)]
    pub frequency_penalty: Option<f32>,

    #[serde(default)]
    pub presence_penalty: Option<f32>,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub top_p: Option<f32>,

    #[serde(default)]
    pub output_format: OutputFormat,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// HTTP 代理地址（可选）
    /// 支持格式: http://host:port, https://host:port, socks5://host:port
    #[serde(default)]
    pub proxy_url: Option<String>,

    /// 单次 HTTP 调用超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// 配置文件路径（运行时元数据，不写入 JSON）
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_api_version() -> String {
    "2023-05-15".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_aggregation_window() -> f64 {
    60.0
}

fn default_prevent_server_caching() -> bool {
    true
}

fn default_completions() -> u32 {
    1
}

fn default_request_timeout() -> u64 {
    120
}

/// 既没有速率也没有并发上限时使用的默认并发
pub const DEFAULT_CLIENTS_WITHOUT_RATE: usize = 20;
/// 目标速率上限（RPM）
pub const MAX_RATE: f64 = 1_000_000.0;
/// 统计窗口上限（秒）
pub const MAX_AGGREGATION_WINDOW: f64 = 86_400.0;

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            deployment: String::new(),
            api_version: default_api_version(),
            api_key_env: default_api_key_env(),
            clients: None,
            requests: None,
            duration: None,
            rate: None,
            aggregation_window: default_aggregation_window(),
            context_generation_method: ContextGenerationMethod::default(),
            replay_path: None,
            shape_profile: ShapeProfile::default(),
            context_tokens: None,
            max_tokens: None,
            prevent_server_caching: default_prevent_server_caching(),
            completions: default_completions(),
            frequency_penalty: None,
            presence_penalty: None,
            temperature: None,
            top_p: None,
            output_format: OutputFormat::default(),
            retry: RetryPolicy::default(),
            proxy_url: None,
            request_timeout: default_request_timeout(),
            config_path: None,
        }
    }
}

impl LoadConfig {
    /// 从文件加载配置
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            // 配置文件不存在，返回默认配置
            let mut config = Self::default();
            config.config_path = Some(path.to_path_buf());
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let mut config: LoadConfig = serde_json::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// 获取配置文件路径（如果有）
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// 完整的 chat completions 地址
    pub fn request_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint.trim_end_matches('/'),
            urlencoding::encode(&self.deployment),
            urlencoding::encode(&self.api_version),
        )
    }

    /// 按形态预设解析上下文 / 生成 token 数
    pub fn shape(&self) -> Shape {
        match self.shape_profile {
            ShapeProfile::Balanced => Shape {
                context_tokens: 500,
                max_tokens: Some(500),
            },
            ShapeProfile::Context => Shape {
                context_tokens: 2000,
                max_tokens: Some(200),
            },
            ShapeProfile::Generation => Shape {
                context_tokens: 500,
                max_tokens: Some(1000),
            },
            ShapeProfile::Custom => Shape {
                context_tokens: self.context_tokens.unwrap_or(0),
                max_tokens: self.max_tokens,
            },
        }
    }

    /// 有效并发上限
    ///
    /// 配置了速率时默认不限并发；两者都未配置时回退到默认并发，避免无界发射
    pub fn effective_clients(&self) -> Option<usize> {
        match (self.clients, self.rate_per_minute()) {
            (Some(c), _) => Some(c),
            (None, Some(_)) => None,
            (None, None) => Some(DEFAULT_CLIENTS_WITHOUT_RATE),
        }
    }

    /// 有效速率，0 视为未配置
    pub fn rate_per_minute(&self) -> Option<f64> {
        self.rate.filter(|r| *r > 0.0)
    }

    /// 有效运行时长，0 视为未配置
    pub fn run_duration(&self) -> Option<Duration> {
        self.duration
            .filter(|d| *d > 0)
            .map(Duration::from_secs)
    }

    pub fn window(&self) -> Duration {
        Duration::try_from_secs_f64(self.aggregation_window.min(MAX_AGGREGATION_WINDOW))
            .unwrap_or(Duration::from_secs(60))
    }

    /// 从环境变量读取 API 密钥
    pub fn api_key(&self) -> anyhow::Result<String> {
        std::env::var(&self.api_key_env)
            .with_context(|| format!("环境变量 {} 未设置", self.api_key_env))
    }

    /// 校验配置
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.endpoint.trim().is_empty() {
            anyhow::bail!("endpoint 不能为空");
        }
        if self.deployment.trim().is_empty() {
            anyhow::bail!("deployment 不能为空");
        }
        if self.api_version.is_empty() {
            anyhow::bail!("api-version 不能为空");
        }
        if self.api_key_env.is_empty() {
            anyhow::bail!("api-key-env 不能为空");
        }
        if std::env::var_os(&self.api_key_env).is_none() {
            anyhow::bail!("api-key-env {} 未设置", self.api_key_env);
        }
        if matches!(self.clients, Some(c) if c < 1) {
            anyhow::bail!("clients 必须大于 0");
        }
        if matches!(self.duration, Some(d) if d != 0 && d < 30) {
            anyhow::bail!("duration 必须为 0 或不小于 30 秒");
        }
        if matches!(self.rate, Some(r) if !(0.0..=MAX_RATE).contains(&r)) {
            anyhow::bail!("rate 必须在 [0, {}] 范围内", MAX_RATE);
        }
        if !(self.aggregation_window > 0.0 && self.aggregation_window <= MAX_AGGREGATION_WINDOW) {
            anyhow::bail!("aggregation-window 必须在 (0, {}] 秒范围内", MAX_AGGREGATION_WINDOW);
        }
        if self.shape_profile == ShapeProfile::Custom
            && !matches!(self.context_tokens, Some(t) if t >= 1)
        {
            anyhow::bail!("shape-profile=custom 时必须指定 context-tokens");
        }
        if self.max_tokens == Some(0) {
            anyhow::bail!("max-tokens 必须大于 0");
        }
        if self.context_generation_method == ContextGenerationMethod::Replay
            && self.replay_path.is_none()
        {
            anyhow::bail!("context-generation-method=replay 时必须指定 replay-path");
        }
        if self.completions < 1 {
            anyhow::bail!("completions 必须大于 0");
        }
        check_range("frequency-penalty", self.frequency_penalty, -2.0, 2.0)?;
        check_range("presence-penalty", self.presence_penalty, -2.0, 2.0)?;
        check_range("temperature", self.temperature, 0.0, 2.0)?;
        check_range("top-p", self.top_p, 0.0, 1.0)?;
        Ok(())
    }
}

fn check_range(name: &str, value: Option<f32>, min: f32, max: f32) -> anyhow::Result<()> {
    match value {
        Some(v) if !(min..=max).contains(&v) => {
            anyhow::bail!("{} 必须在 {} 到 {} 之间", name, min, max)
        }
        _ => Ok(()),
    }
}
