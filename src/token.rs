//! Token 计数
//!
//! 使用 tiktoken 的 BPE 词表，按模型选择编码；未知模型回退到 cl100k_base

use std::sync::Arc;

use tiktoken_rs::CoreBPE;

use crate::model::message::ChatMessage;

/// load 子命令统计 prompt 时假定的模型
pub const DEFAULT_LOAD_MODEL: &str = "gpt-4-0613";
/// tokenize 子命令的默认模型
pub const DEFAULT_TOKENIZE_MODEL: &str = "gpt-4";

/// 每条消息的固定开销（<|start|>{role}\n{content}<|end|>\n）
const TOKENS_PER_MESSAGE: u64 = 3;
/// 存在 name 字段时的额外开销
const TOKENS_PER_NAME: u64 = 1;
/// 回复前缀 <|start|>assistant<|message|>
const REPLY_PRIMING_TOKENS: u64 = 3;

/// 按模型加载的 BPE 分词器，克隆开销很小
#[derive(Clone)]
pub struct Tokenizer {
    model: String,
    bpe: Arc<CoreBPE>,
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer").field("model", &self.model).finish()
    }
}

impl Tokenizer {
    pub fn for_model(model: &str) -> anyhow::Result<Self> {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(e) => {
                tracing::warn!("模型 {} 没有对应的词表，使用 cl100k_base: {}", model, e);
                tiktoken_rs::cl100k_base()?
            }
        };
        Ok(Self {
            model: model.to_string(),
            bpe: Arc::new(bpe),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 文本的 token 数
    pub fn count_tokens(&self, text: &str) -> u64 {
        self.bpe.encode_with_special_tokens(text).len() as u64
    }

    /// chat 消息数组的 token 数（含消息开销和回复前缀）
    pub fn count_message_tokens(&self, messages: &[ChatMessage]) -> u64 {
        let mut total = REPLY_PRIMING_TOKENS;
        for message in messages {
            total += TOKENS_PER_MESSAGE;
            total += self.count_tokens(&message.role);
            total += self.count_tokens(&message.content);
            if let Some(name) = &message.name {
                total += self.count_tokens(name) + TOKENS_PER_NAME;
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpt4() -> Tokenizer {
        Tokenizer::for_model("gpt-4").unwrap()
    }

    #[test]
    fn test_count_tokens_empty() {
        assert_eq!(gpt4().count_tokens(""), 0);
    }

    #[test]
    fn test_count_tokens_words() {
        let tokenizer = gpt4();
        assert_eq!(tokenizer.count_tokens("hello world"), 2);
        assert_eq!(tokenizer.count_tokens("a"), 1);
        // 长单词拆成多个子词，但远少于字符数
        let n = tokenizer.count_tokens("internationalization");
        assert!(n >= 1 && n < 5, "got {}", n);
    }

    #[test]
    fn test_count_tokens_timestamp_prefix() {
        // 时间戳前缀（秒.微秒）不超过生成器预留的 8 个 token
        let n = gpt4().count_tokens("1704441942.868042");
        assert!(n >= 5 && n <= 8, "got {}", n);
    }

    #[test]
    fn test_special_tokens_are_counted() {
        assert_eq!(gpt4().count_tokens("<|endoftext|>"), 1);
    }

    #[test]
    fn test_unknown_model_falls_back_to_cl100k() {
        let fallback = Tokenizer::for_model("not-a-real-model").unwrap();
        let text = "The quick brown fox jumps over the lazy dog, 12345 times.";
        assert_eq!(fallback.count_tokens(text), gpt4().count_tokens(text));
        assert_eq!(fallback.model(), "not-a-real-model");
    }

    #[test]
    fn test_count_message_tokens() {
        let tokenizer = gpt4();
        let messages = vec![ChatMessage::user("hello world")];
        // 3（回复前缀）+ 3（消息开销）+ 1（role）+ 2（content）
        assert_eq!(tokenizer.count_message_tokens(&messages), 9);

        let mut named = ChatMessage::user("hello world");
        named.name = Some("bob".to_string());
        assert_eq!(tokenizer.count_message_tokens(&[named]), 11);
    }

    #[test]
    fn test_count_message_tokens_empty() {
        assert_eq!(gpt4().count_message_tokens(&[]), REPLY_PRIMING_TOKENS);
    }
}
