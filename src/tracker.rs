//! Lifecycle of one tool invocation
//!
//! Every call gets a record that starts `pending` and ends `completed` or
//! `failed`, and produces exactly one event. Persistence is best-effort:
//! a store failure is logged and never hides the tool's result.

use crate::db::{ExecutionOutcome, NewToolExecution};
use crate::orchestrator::{ToolCall, TurnEvent};
use crate::store::ConversationStore;
use crate::tools::{schema, Tool, ToolContext, ToolError};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct ExecutionTracker {
    store: Option<Arc<dyn ConversationStore>>,
    default_timeout: Duration,
}

impl ExecutionTracker {
    pub fn new(store: Option<Arc<dyn ConversationStore>>, default_timeout: Duration) -> Self {
        Self {
            store,
            default_timeout,
        }
    }

    /// Record and run one call. `tool` is `None` when the name is not
    /// registered; the call is then recorded as failed without running.
    pub async fn execute(
        &self,
        call: &ToolCall,
        tool: Option<Arc<dyn Tool>>,
        message_id: Option<&str>,
        ctx: ToolContext,
    ) -> TurnEvent {
        let execution_id = self.begin(call, message_id).await;
        let start = Instant::now();

        let result = match tool {
            None => Err(ToolError::NotFound(call.name.clone())),
            Some(tool) => self.invoke(tool.as_ref(), &call.params, ctx).await,
        };

        let duration_ms = start.elapsed().as_millis();
        match &result {
            Ok(_) => tracing::info!(
                tool = %call.name,
                execution_id = %execution_id,
                duration_ms = %duration_ms,
                "Tool completed"
            ),
            Err(e) => tracing::warn!(
                tool = %call.name,
                execution_id = %execution_id,
                duration_ms = %duration_ms,
                error = %e,
                "Tool failed"
            ),
        }

        let outcome = match &result {
            Ok(output) => ExecutionOutcome::Completed {
                output: output.clone(),
            },
            Err(e) => ExecutionOutcome::Failed {
                error: e.to_string(),
            },
        };
        self.finish(&execution_id, outcome).await;

        match result {
            Ok(data) => TurnEvent::ToolResult {
                tool: call.name.clone(),
                data,
                execution_id,
            },
            Err(e) => TurnEvent::ToolError {
                tool: call.name.clone(),
                error: e.to_string(),
                execution_id,
            },
        }
    }

    /// Create the pending record, falling back to a local id when the
    /// store is absent or unavailable.
    async fn begin(&self, call: &ToolCall, message_id: Option<&str>) -> String {
        let Some(store) = &self.store else {
            return uuid::Uuid::new_v4().to_string();
        };

        let record = NewToolExecution {
            message_id: message_id.map(String::from),
            tool_name: call.name.clone(),
            input_json: call.params.clone(),
        };
        match store.create_tool_execution(record).await {
            Ok(execution) => execution.id,
            Err(e) => {
                let id = uuid::Uuid::new_v4().to_string();
                tracing::warn!(
                    tool = %call.name,
                    execution_id = %id,
                    error = %e,
                    "Failed to record tool execution, continuing unpersisted"
                );
                id
            }
        }
    }

    async fn finish(&self, execution_id: &str, outcome: ExecutionOutcome) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.update_tool_execution(execution_id, outcome).await {
            tracing::warn!(
                execution_id = %execution_id,
                error = %e,
                "Failed to finalize tool execution"
            );
        }
    }

    async fn invoke(&self, tool: &dyn Tool, params: &Value, ctx: ToolContext) -> Result<Value, ToolError> {
        let args = arguments(params)?;
        schema::validate(&tool.input_schema(), &args).map_err(ToolError::InvalidArguments)?;

        let limit = tool.timeout().unwrap_or(self.default_timeout);
        let cancel = ctx.cancel.clone();

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ToolError::Cancelled),
            result = tokio::time::timeout(limit, tool.run(args, ctx)) => {
                result.unwrap_or(Err(ToolError::TimedOut(limit)))
            }
        }
    }
}

/// Tool arguments must be a JSON object; `null` means no arguments
fn arguments(params: &Value) -> Result<Map<String, Value>, ToolError> {
    match params {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        other => Err(ToolError::InvalidArguments(format!(
            "arguments must be a JSON object, got {other}"
        ))),
    }
}
