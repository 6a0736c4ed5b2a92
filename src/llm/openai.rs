//! `OpenAI` and `OpenAI`-compatible streaming provider

use super::sse::{SseDecoder, SseFrame};
use super::types::{ChatTurn, StreamChunk, TokenStream, Usage};
use super::{ChatProvider, LlmError};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Connection settings for an `OpenAI`-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    /// Base URL without the `/chat/completions` suffix
    pub api_base: String,
    pub connect_timeout: Duration,
    /// Maximum gap between two network reads of the response body
    pub read_timeout: Duration,
}

impl OpenAIConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// Streams chat completions with `stream: true`
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    url: String,
}

impl OpenAIProvider {
    pub fn new(config: OpenAIConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.api_key,
            url: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
        })
    }

    fn build_request(turns: &[ChatTurn], model: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: model.to_string(),
            messages: turns
                .iter()
                .map(|t| WireMessage {
                    role: t.role.as_str().to_string(),
                    content: t.content.clone(),
                })
                .collect(),
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream_chat(&self, turns: &[ChatTurn], model: &str) -> Result<TokenStream, LlmError> {
        let request = Self::build_request(turns, model);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            let error = LlmError::from_status(status.as_u16(), &body);
            return Err(match retry_after {
                Some(delay) => error.with_retry_after(delay),
                None => error,
            });
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Ok(into_token_stream(body))
    }
}

/// `Retry-After` in its delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let seconds = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(seconds))
}

struct StreamState {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<StreamChunk, LlmError>>,
    finished: bool,
}

impl StreamState {
    fn absorb(&mut self, frames: impl IntoIterator<Item = SseFrame>) {
        for frame in frames {
            match frame {
                SseFrame::Done => {
                    self.finished = true;
                    return;
                }
                SseFrame::Data(data) => match decode_chunk(&data) {
                    Ok(chunks) => self.pending.extend(chunks.into_iter().map(Ok)),
                    Err(e) => {
                        self.pending.push_back(Err(e));
                        self.finished = true;
                        return;
                    }
                },
            }
        }
    }
}

/// Turn a raw SSE body into chunks. The stream ends after `[DONE]`, at
/// end of body, or right after the first error item.
fn into_token_stream(body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>) -> TokenStream {
    let state = StreamState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    let frames = st.decoder.push(&bytes);
                    st.absorb(frames);
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.pending.push_back(Err(LlmError::from_transport(&e)));
                }
                None => {
                    let tail = st.decoder.finish();
                    st.absorb(tail);
                    st.finished = true;
                }
            }
        }
    })
    .boxed()
}

/// Decode one `data:` payload into zero or more chunks
pub(crate) fn decode_chunk(data: &str) -> Result<Vec<StreamChunk>, LlmError> {
    let chunk: ChatCompletionChunk = serde_json::from_str(data)
        .map_err(|e| LlmError::protocol(format!("Failed to parse stream chunk: {e} - data: {data}")))?;

    if let Some(error) = chunk.error {
        return Err(LlmError::server_error(error.message));
    }

    let mut out: Vec<StreamChunk> = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .filter(|text| !text.is_empty())
        .map(StreamChunk::Token)
        .collect();

    if let Some(usage) = chunk.usage {
        out.push(StreamChunk::Usage(Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }));
    }

    Ok(out)
}

// OpenAI wire types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionChunk {
    #[serde(default)]
    pub(crate) choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub(crate) usage: Option<ChunkUsage>,
    #[serde(default)]
    pub(crate) error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChunkChoice {
    #[serde(default)]
    pub(crate) delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChunkDelta {
    #[serde(default)]
    pub(crate) content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChunkUsage {
    pub(crate) prompt_tokens: u64,
    pub(crate) completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChunkError {
    pub(crate) message: String,
}
