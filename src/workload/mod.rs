//! 压测负载来源
//!
//! 按请求形态生成 prompt，每个逻辑请求调用一次 [`MessageGenerator::generate`]

mod generator;
mod words;

use std::sync::Arc;

use crate::model::config::{ContextGenerationMethod, LoadConfig};
use crate::model::message::ChatMessage;
use crate::token::{Tokenizer, DEFAULT_LOAD_MODEL};

pub use generator::{RandomMessagesGenerator, ReplayMessagesGenerator};

/// 单个逻辑请求的不可变描述
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// 上下文 token 数（含消息开销）
    pub context_tokens: u64,
    /// 最大生成 token 数
    pub max_tokens: Option<u32>,
    /// prompt 消息
    pub messages: Vec<ChatMessage>,
}

/// prompt 生成器
pub trait MessageGenerator: Send + Sync {
    fn generate(&self) -> RequestSpec;
}

/// 按配置构建生成器
pub fn build_generator(config: &LoadConfig) -> anyhow::Result<Arc<dyn MessageGenerator>> {
    let shape = config.shape();
    let tokenizer = Tokenizer::for_model(DEFAULT_LOAD_MODEL)?;
    match config.context_generation_method {
        ContextGenerationMethod::Generate => {
            tracing::info!(
                "使用请求形态 {:?}: context tokens: {}, max tokens: {:?}",
                config.shape_profile,
                shape.context_tokens,
                shape.max_tokens
            );
            Ok(Arc::new(RandomMessagesGenerator::new(
                &tokenizer,
                shape.context_tokens,
                shape.max_tokens,
                config.prevent_server_caching,
            )))
        }
        ContextGenerationMethod::Replay => {
            let path = config
                .replay_path
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("replay 模式需要 replay-path"))?;
            Ok(Arc::new(ReplayMessagesGenerator::from_file(
                path,
                &tokenizer,
                shape.max_tokens,
                config.prevent_server_caching,
            )?))
        }
    }
}
