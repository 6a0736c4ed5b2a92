//! Chat provider abstraction
//!
//! Provides a common streaming interface over model backends.

mod echo;
mod error;
mod openai;
#[cfg(test)]
mod proptests;
mod sse;
mod types;

pub use echo::EchoProvider;
pub use error::{LlmError, LlmErrorKind};
pub use openai::{OpenAIConfig, OpenAIProvider};
pub use types::*;

use crate::config::Config;
use crate::registry::ProviderRegistry;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

/// Common interface for model backends
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Registry key, e.g. `openai`
    fn name(&self) -> &str;

    /// Open a token stream for the given turns.
    ///
    /// Failures may surface either here (request rejected) or as an `Err`
    /// item in the returned stream (connection dropped mid-response).
    async fn stream_chat(&self, turns: &[ChatTurn], model: &str) -> Result<TokenStream, LlmError>;
}

/// Logging wrapper for providers
pub struct LoggingProvider {
    inner: Arc<dyn ChatProvider>,
    name: String,
}

impl LoggingProvider {
    pub fn new(inner: Arc<dyn ChatProvider>) -> Self {
        let name = inner.name().to_string();
        Self { inner, name }
    }
}

#[async_trait]
impl ChatProvider for LoggingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_chat(&self, turns: &[ChatTurn], model: &str) -> Result<TokenStream, LlmError> {
        let start = Instant::now();
        let result = self.inner.stream_chat(turns, model).await;
        let duration = start.elapsed();

        match result {
            Ok(stream) => {
                tracing::info!(
                    provider = %self.name,
                    model = %model,
                    turns = turns.len(),
                    duration_ms = %duration.as_millis(),
                    "Provider stream opened"
                );
                let provider = self.name.clone();
                let model = model.to_string();
                Ok(stream
                    .inspect(move |item| {
                        if let Err(e) = item {
                            tracing::error!(
                                provider = %provider,
                                model = %model,
                                error = %e.message,
                                retryable = e.kind.is_retryable(),
                                "Provider stream failed"
                            );
                        }
                    })
                    .boxed())
            }
            Err(e) => {
                tracing::error!(
                    provider = %self.name,
                    model = %model,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    retry_after_ms = ?e.retry_after.map(|d| d.as_millis()),
                    "Provider request failed"
                );
                Err(e)
            }
        }
    }
}

/// Register every provider whose prerequisites are met, each wrapped in
/// `LoggingProvider`. `echo` needs nothing; `openai` needs an API key.
pub fn register_providers(registry: &mut ProviderRegistry, config: &Config) {
    registry.register(Arc::new(LoggingProvider::new(Arc::new(EchoProvider))));

    let Some(api_key) = config.openai_api_key.clone() else {
        tracing::info!("OPENAI_API_KEY not set, openai provider disabled");
        return;
    };

    let mut openai = OpenAIConfig::new(api_key);
    if let Some(base) = &config.openai_api_base {
        openai.api_base.clone_from(base);
    }
    openai.connect_timeout = config.provider_connect_timeout;
    openai.read_timeout = config.provider_read_timeout;

    match OpenAIProvider::new(openai) {
        Ok(provider) => registry.register(Arc::new(LoggingProvider::new(Arc::new(provider)))),
        Err(e) => tracing::warn!(error = %e, "Failed to create openai provider"),
    }
}
