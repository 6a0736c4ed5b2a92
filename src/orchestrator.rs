//! Turn orchestration
//!
//! One turn: resolve the session, persist the user message, run the
//! requested tools in order, stream the model's reply, persist it, and
//! report everything through a bounded channel as it happens.
//!
//! Bookkeeping writes are best-effort. A failing store is logged and the
//! turn carries on unpersisted; only provider failures and (under
//! `UnknownToolPolicy::Abort`) unknown tools end a turn early.

mod event;
mod phase;
#[cfg(test)]
mod proptests;
mod request;

pub use event::{EndReason, TurnEvent};
pub use phase::{TurnOutcome, TurnPhase};
pub use request::{ToolCall, TurnRequest};

use crate::config::{Config, UnknownToolPolicy};
use crate::db::{NewMessage, Session, SessionDefaults};
use crate::llm::{Role, StreamChunk, Usage};
use crate::registry::{ProviderRegistry, ToolRegistry};
use crate::store::ConversationStore;
use crate::tools::ToolContext;
use crate::tracker::ExecutionTracker;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Used when a request names no provider
    pub default_provider: String,
    /// Used when a request names no model
    pub default_model: String,
    pub unknown_tool_policy: UnknownToolPolicy,
    /// Limit for tools without their own timeout
    pub tool_timeout: Duration,
    /// Event channel capacity per turn
    pub event_buffer: usize,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_provider: config.default_provider.clone(),
            default_model: config.default_model.clone(),
            unknown_tool_policy: config.unknown_tool_policy,
            tool_timeout: config.tool_timeout,
            event_buffer: config.event_buffer,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct Orchestrator {
    tools: Arc<ToolRegistry>,
    providers: Arc<ProviderRegistry>,
    store: Option<Arc<dyn ConversationStore>>,
    tracker: ExecutionTracker,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    /// `store` is `None` when persistence is disabled
    pub fn new(
        tools: Arc<ToolRegistry>,
        providers: Arc<ProviderRegistry>,
        store: Option<Arc<dyn ConversationStore>>,
        settings: OrchestratorSettings,
    ) -> Self {
        let tracker = ExecutionTracker::new(store.clone(), settings.tool_timeout);
        Self {
            tools,
            providers,
            store,
            tracker,
            settings,
        }
    }

    /// Spawn a turn and hand back its event receiver.
    ///
    /// Dropping the handle (or the stream made from it) cancels the turn.
    pub fn start_turn(self: &Arc<Self>, request: TurnRequest) -> TurnHandle {
        let (tx, rx) = mpsc::channel(self.settings.event_buffer.max(1));
        let cancel = CancellationToken::new();

        let this = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move { this.run_turn(request, tx, token).await });

        TurnHandle {
            events: rx,
            task,
            cancel: cancel.clone(),
            _guard: cancel.drop_guard(),
        }
    }

    /// Run one turn to completion, writing events into `events`.
    ///
    /// Returns once the turn has ended and every record it created is in a
    /// terminal state. Cancelling `cancel` or dropping the receiver stops
    /// the turn without emitting further events.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        events: mpsc::Sender<TurnEvent>,
        cancel: CancellationToken,
    ) -> TurnOutcome {
        let provider = request
            .provider
            .clone()
            .unwrap_or_else(|| self.settings.default_provider.clone());
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.settings.default_model.clone());
        let span = tracing::info_span!(
            "turn",
            session_id = request.session_id.as_deref().unwrap_or("-"),
            provider = %provider,
            model = %model,
        );

        // Cancel as soon as the receiver goes away, even mid-tool
        let done = CancellationToken::new();
        let watch = {
            let tx = events.clone();
            let cancel = cancel.clone();
            let done = done.clone();
            async move {
                tokio::select! {
                    () = tx.closed() => cancel.cancel(),
                    () = done.cancelled() => {}
                }
            }
        };

        let mut turn = Turn {
            sink: EventSink { tx: events, cancel },
            phase: TurnPhase::Start,
        };
        let run = async {
            tracing::info!(tool_calls = request.tool_calls.len(), "Turn started");
            let outcome = self.drive(&mut turn, &request, &provider, &model).await;
            turn.enter(outcome.phase());
            match &outcome {
                TurnOutcome::Completed => tracing::info!("Turn completed"),
                TurnOutcome::Failed { error } => tracing::warn!(error = %error, "Turn failed"),
                TurnOutcome::Cancelled => tracing::info!("Turn cancelled"),
            }
            done.cancel();
            outcome
        };

        let (outcome, ()) = async { tokio::join!(run, watch) }.instrument(span).await;
        outcome
    }

    async fn drive(
        &self,
        turn: &mut Turn,
        request: &TurnRequest,
        provider_name: &str,
        model: &str,
    ) -> TurnOutcome {
        let session = self.resolve_session(request).await;
        turn.enter(TurnPhase::SessionResolved);

        let user_message_id = match &session {
            Some(session) => self.persist_user_message(session, request).await,
            None => None,
        };

        turn.enter(TurnPhase::DispatchingTools);
        let ctx = ToolContext::new(
            turn.sink.cancel.clone(),
            session.as_ref().map(|s| s.id.clone()),
        );
        for call in &request.tool_calls {
            if turn.sink.is_cancelled() {
                return TurnOutcome::Cancelled;
            }

            let tool = match self.tools.get(&call.name) {
                Ok(tool) => Some(tool),
                Err(e) => match self.settings.unknown_tool_policy {
                    UnknownToolPolicy::Degrade => None,
                    UnknownToolPolicy::Abort => return turn.fail(e.to_string()).await,
                },
            };

            let event = self
                .tracker
                .execute(call, tool, user_message_id.as_deref(), ctx.clone())
                .await;
            if turn.sink.is_cancelled() || !turn.sink.emit(event).await {
                return TurnOutcome::Cancelled;
            }
        }

        turn.enter(TurnPhase::Streaming);
        let provider = match self.providers.get(provider_name) {
            Ok(provider) => provider,
            Err(e) => return turn.fail(e.to_string()).await,
        };

        let turns = request.provider_turns();
        let opened = tokio::select! {
            biased;
            () = turn.sink.cancelled() => return TurnOutcome::Cancelled,
            opened = provider.stream_chat(&turns, model) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return turn.fail(e.to_string()).await,
        };

        let mut text = String::new();
        let mut usage: Option<Usage> = None;
        loop {
            let item = tokio::select! {
                biased;
                () = turn.sink.cancelled() => return TurnOutcome::Cancelled,
                item = stream.next() => item,
            };
            match item {
                None => break,
                Some(Ok(StreamChunk::Token(token))) => {
                    text.push_str(&token);
                    if !turn.sink.emit(TurnEvent::Token { token }).await {
                        return TurnOutcome::Cancelled;
                    }
                }
                Some(Ok(StreamChunk::Usage(reported))) => usage = Some(reported),
                Some(Err(e)) => return turn.fail(e.to_string()).await,
            }
        }
        drop(stream);

        if let Some(session) = &session {
            turn.enter(TurnPhase::Persisting);
            self.persist_assistant_message(session, text, usage).await;
        }

        if turn.sink.emit(TurnEvent::end()).await {
            TurnOutcome::Completed
        } else {
            TurnOutcome::Cancelled
        }
    }

    async fn resolve_session(&self, request: &TurnRequest) -> Option<Session> {
        let store = self.store.as_ref()?;
        let session_id = request.session_id.as_deref()?;

        let defaults = SessionDefaults {
            user_id: request.user_id.clone(),
            title: SessionDefaults::title_from(&request.user_message),
            metadata: None,
        };
        match store.resolve_or_create_session(session_id, defaults).await {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::error!(error = %e, "Failed to resolve session, continuing unpersisted");
                None
            }
        }
    }

    async fn persist_user_message(&self, session: &Session, request: &TurnRequest) -> Option<String> {
        let store = self.store.as_ref()?;
        let message = NewMessage::new(&session.id, Role::User, request.user_message.clone());
        match store.append_message(message).await {
            Ok(message) => Some(message.id),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist user message");
                None
            }
        }
    }

    async fn persist_assistant_message(&self, session: &Session, text: String, usage: Option<Usage>) {
        let Some(store) = &self.store else {
            return;
        };
        let mut message = NewMessage::new(&session.id, Role::Assistant, text);
        if let Some(usage) = usage {
            message = message.with_usage(saturating_i64(usage.input_tokens), saturating_i64(usage.output_tokens));
        }
        if let Err(e) = store.append_message(message).await {
            tracing::warn!(error = %e, "Failed to persist assistant message");
        }
    }
}

fn saturating_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

struct Turn {
    sink: EventSink,
    phase: TurnPhase,
}

impl Turn {
    fn enter(&mut self, next: TurnPhase) {
        tracing::debug!(from = %self.phase, to = %next, "Turn phase");
        self.phase = next;
    }

    /// Emit the single `error` event that ends a failed turn
    async fn fail(&mut self, error: String) -> TurnOutcome {
        self.sink
            .emit(TurnEvent::Error {
                error: error.clone(),
            })
            .await;
        TurnOutcome::Failed { error }
    }
}

struct EventSink {
    tx: mpsc::Sender<TurnEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    /// Deliver one event, waiting for channel capacity. Returns `false`
    /// if the turn was cancelled or the receiver is gone.
    async fn emit(&self, event: TurnEvent) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => {
                if sent.is_err() {
                    self.cancel.cancel();
                }
                sent.is_ok()
            }
        }
    }

    /// Resolves once the turn should stop
    async fn cancelled(&self) {
        tokio::select! {
            () = self.cancel.cancelled() => {}
            () = self.tx.closed() => self.cancel.cancel(),
        }
    }

    fn is_cancelled(&self) -> bool {
        if self.tx.is_closed() {
            self.cancel.cancel();
        }
        self.cancel.is_cancelled()
    }
}

/// A running turn
pub struct TurnHandle {
    events: mpsc::Receiver<TurnEvent>,
    task: JoinHandle<TurnOutcome>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl TurnHandle {
    /// Stop the turn; no further events are delivered
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next event, or `None` once the turn has ended
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        self.events.recv().await
    }

    /// Drain every event, then wait for the turn's outcome
    pub async fn collect(mut self) -> (Vec<TurnEvent>, TurnOutcome) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let outcome = match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => TurnOutcome::Failed {
                error: format!("turn task failed: {e}"),
            },
        };
        (events, outcome)
    }

    /// Events as a `Stream`; dropping the stream cancels the turn
    pub fn into_stream(self) -> TurnEventStream {
        TurnEventStream {
            inner: ReceiverStream::new(self.events),
            _guard: self._guard,
        }
    }
}

pub struct TurnEventStream {
    inner: ReceiverStream<TurnEvent>,
    _guard: DropGuard,
}

impl Stream for TurnEventStream {
    type Item = TurnEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
