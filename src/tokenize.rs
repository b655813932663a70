//! tokenize 子命令

use std::io::Read;

use anyhow::Context;

use crate::model::arg::TokenizeArgs;
use crate::model::message::ChatMessage;
use crate::token::Tokenizer;

/// 统计输入的 token 数：能解析为消息数组时按 chat 消息计，否则按纯文本计
pub fn count_input(tokenizer: &Tokenizer, input: &str) -> u64 {
    match serde_json::from_str::<Vec<ChatMessage>>(input) {
        Ok(messages) => {
            tracing::debug!("按 {} 条 chat 消息统计", messages.len());
            tokenizer.count_message_tokens(&messages)
        }
        Err(_) => tokenizer.count_tokens(input),
    }
}

pub fn run(args: TokenizeArgs) -> anyhow::Result<()> {
    let tokenizer = Tokenizer::for_model(&args.model)?;
    let input = match args.text {
        Some(text) => text,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("读取标准输入失败")?;
            buffer
        }
    };
    println!("tokens: {}", count_input(&tokenizer, &input));
    Ok(())
}
