//! Offline provider that echoes the user's words back as tokens

use super::types::{ChatTurn, Role, StreamChunk, TokenStream, Usage};
use super::{ChatProvider, LlmError};
use async_trait::async_trait;
use futures::StreamExt;

pub struct EchoProvider;

#[async_trait]
impl ChatProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn stream_chat(&self, turns: &[ChatTurn], model: &str) -> Result<TokenStream, LlmError> {
        let user_content = turns
            .iter()
            .filter(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let mut chunks: Vec<Result<StreamChunk, LlmError>> = vec![Ok(StreamChunk::token(format!("[{model}]")))];
        chunks.extend(
            user_content
                .split_whitespace()
                .map(|word| Ok(StreamChunk::token(format!(" {word}")))),
        );
        let output_tokens = chunks.len() as u64;
        chunks.push(Ok(StreamChunk::Usage(Usage {
            input_tokens: user_content.split_whitespace().count() as u64,
            output_tokens,
        })));

        Ok(futures::stream::iter(chunks).boxed())
    }
}
