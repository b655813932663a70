use std::path::Path;

use anyhow::Context;

use super::words::WORDS;
use super::{MessageGenerator, RequestSpec};
use crate::model::message::ChatMessage;
use crate::token::Tokenizer;

/// 时间戳前缀（如 "1704441942.868042 "）按 8 个 token 计
const ANTICACHE_PREFIX_TOKENS: u64 = 8;

/// 给每条消息加时间戳前缀，防止服务端 prompt 缓存命中
fn add_anticache_prefix(messages: &[ChatMessage], tokens: u64) -> (Vec<ChatMessage>, u64) {
    let now = chrono::Utc::now();
    let prefix = format!("{}.{:06}", now.timestamp(), now.timestamp_subsec_micros());
    let messages: Vec<ChatMessage> = messages
        .iter()
        .map(|m| ChatMessage {
            content: format!("{} {}", prefix, m.content),
            ..m.clone()
        })
        .collect();
    let tokens = tokens + ANTICACHE_PREFIX_TOKENS * messages.len() as u64;
    (messages, tokens)
}

fn random_words(count: usize) -> String {
    let mut out = String::with_capacity(count * 6);
    for _ in 0..count {
        out.push_str(WORDS[fastrand::usize(..WORDS.len())]);
        out.push(' ');
    }
    out
}

/// 随机单词 prompt 生成器
///
/// 构造时一次性生成目标长度的 prompt 并缓存，之后每次只追加防缓存前缀
pub struct RandomMessagesGenerator {
    messages: Vec<ChatMessage>,
    tokens: u64,
    max_tokens: Option<u32>,
    prevent_server_caching: bool,
}

impl RandomMessagesGenerator {
    pub fn new(
        tokenizer: &Tokenizer,
        context_tokens: u32,
        max_tokens: Option<u32>,
        prevent_server_caching: bool,
    ) -> Self {
        tracing::info!("预热 prompt 缓存（按 {} 统计 token）", tokenizer.model());
        let mut messages = vec![ChatMessage::user("")];
        if let Some(max) = max_tokens {
            messages.push(ChatMessage::user(format!(
                "write a long essay about life in at least {} tokens",
                max
            )));
        }

        // 预留前缀占用的 token，使实际发送时总数接近目标
        let reserved = if prevent_server_caching {
            ANTICACHE_PREFIX_TOKENS * messages.len() as u64
        } else {
            0
        };
        let target = u64::from(context_tokens).saturating_sub(reserved);

        let mut tokens = tokenizer.count_message_tokens(&messages);
        while tokens < target {
            let remaining = target - tokens;
            let batch = remaining.div_ceil(2) as usize;
            messages[0].content.push_str(&random_words(batch));
            tokens = tokenizer.count_message_tokens(&messages);
        }

        Self {
            messages,
            tokens,
            max_tokens,
            prevent_server_caching,
        }
    }

    /// 缓存的 prompt token 数（不含前缀）
    pub fn cached_tokens(&self) -> u64 {
        self.tokens
    }
}

impl MessageGenerator for RandomMessagesGenerator {
    fn generate(&self) -> RequestSpec {
        let (messages, context_tokens) = if self.prevent_server_caching {
            add_anticache_prefix(&self.messages, self.tokens)
        } else {
            (self.messages.clone(), self.tokens)
        };
        RequestSpec {
            context_tokens,
            max_tokens: self.max_tokens,
            messages,
        }
    }
}

/// 回放生成器：从 JSON 文件加载若干组消息，每次随机抽取一组
pub struct ReplayMessagesGenerator {
    entries: Vec<(Vec<ChatMessage>, u64)>,
    max_tokens: Option<u32>,
    prevent_server_caching: bool,
}

impl ReplayMessagesGenerator {
    pub fn from_file(
        path: &Path,
        tokenizer: &Tokenizer,
        max_tokens: Option<u32>,
        prevent_server_caching: bool,
    ) -> anyhow::Result<Self> {
        tracing::info!("从文件加载回放消息: {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("读取回放文件失败: {}", path.display()))?;
        Self::from_json(&content, tokenizer, max_tokens, prevent_server_caching)
    }

    pub fn from_json(
        content: &str,
        tokenizer: &Tokenizer,
        max_tokens: Option<u32>,
        prevent_server_caching: bool,
    ) -> anyhow::Result<Self> {
        let lists: Vec<Vec<ChatMessage>> = serde_json::from_str(content)
            .context("回放文件必须是消息数组的 JSON 数组")?;
        if lists.is_empty() {
            anyhow::bail!("回放文件至少需要包含一组消息");
        }
        if let Some(i) = lists.iter().position(|m| m.is_empty()) {
            anyhow::bail!("回放文件第 {} 组消息为空", i);
        }

        let entries = lists
            .into_iter()
            .map(|messages| {
                let tokens = tokenizer.count_message_tokens(&messages);
                (messages, tokens)
            })
            .collect();

        Ok(Self {
            entries,
            max_tokens,
            prevent_server_caching,
        })
    }
}

impl MessageGenerator for ReplayMessagesGenerator {
    fn generate(&self) -> RequestSpec {
        let (messages, tokens) = &self.entries[fastrand::usize(..self.entries.len())];
        let (messages, context_tokens) = if self.prevent_server_caching {
            add_anticache_prefix(messages, *tokens)
        } else {
            (messages.clone(), *tokens)
        };
        RequestSpec {
            context_tokens,
            max_tokens: self.max_tokens,
            messages,
        }
    }
}
