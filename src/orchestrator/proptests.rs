//! Property-based tests for turn event ordering
//!
//! For any mix of known, failing and unknown tool calls followed by any
//! token script:
//! - one tool event per call, in request order, before the first token
//! - tokens arrive in script order and the turn ends with a single `end`
//! - every execution id is distinct and its record is terminal

use super::*;
use crate::testing::{EchoTool, FailingTool, InMemoryStore, ScriptedProvider};
use crate::tools::Tool;
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy)]
enum CallKind {
    Echo,
    Fail,
    Missing,
}

impl CallKind {
    fn name(self) -> &'static str {
        match self {
            CallKind::Echo => "echo",
            CallKind::Fail => "fail",
            CallKind::Missing => "missing",
        }
    }
}

fn arb_call() -> impl Strategy<Value = CallKind> {
    prop_oneof![Just(CallKind::Echo), Just(CallKind::Fail), Just(CallKind::Missing)]
}

fn run(calls: &[CallKind], tokens: &[String]) -> (Vec<TurnEvent>, TurnOutcome, Arc<InMemoryStore>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let store = Arc::new(InMemoryStore::new());
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool) as Arc<dyn Tool>);
        tools.register(Arc::new(FailingTool::named("fail", "nope")) as Arc<dyn Tool>);
        let mut providers = ProviderRegistry::new();
        providers.register(Arc::new(ScriptedProvider::new("scripted").tokens(tokens.to_vec())));

        let settings = OrchestratorSettings {
            default_provider: "scripted".to_string(),
            ..OrchestratorSettings::default()
        };
        let orch = Arc::new(Orchestrator::new(
            Arc::new(tools),
            Arc::new(providers),
            Some(store.clone() as Arc<dyn ConversationStore>),
            settings,
        ));

        let mut request = TurnRequest::new("go").with_session("prop");
        for (i, call) in calls.iter().enumerate() {
            request = request.with_tool_call(call.name(), json!({"i": i}));
        }
        let (events, outcome) = orch.start_turn(request).collect().await;
        (events, outcome, store)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_tool_events_precede_tokens(
        calls in prop::collection::vec(arb_call(), 0..6),
        tokens in prop::collection::vec("[a-z ]{1,6}", 0..6),
    ) {
        let (events, outcome, store) = run(&calls, &tokens);
        prop_assert_eq!(outcome, TurnOutcome::Completed);
        prop_assert_eq!(events.len(), calls.len() + tokens.len() + 1);

        let (tool_events, rest) = events.split_at(calls.len());
        for (event, call) in tool_events.iter().zip(&calls) {
            match (event, call) {
                (TurnEvent::ToolResult { tool, .. }, CallKind::Echo) => prop_assert_eq!(tool.as_str(), "echo"),
                (TurnEvent::ToolError { tool, .. }, CallKind::Fail | CallKind::Missing) => {
                    prop_assert_eq!(tool.as_str(), call.name());
                }
                (other, _) => prop_assert!(false, "unexpected {:?} for {:?}", other, call),
            }
        }

        let streamed: Vec<_> = rest[..tokens.len()]
            .iter()
            .map(|e| match e {
                TurnEvent::Token { token } => Some(token.clone()),
                _ => None,
            })
            .collect();
        prop_assert_eq!(streamed, tokens.iter().cloned().map(Some).collect::<Vec<_>>());
        prop_assert_eq!(rest.last(), Some(&TurnEvent::end()));
        prop_assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

        let ids: HashSet<_> = tool_events.iter().filter_map(TurnEvent::execution_id).collect();
        prop_assert_eq!(ids.len(), calls.len());

        let executions = store.all_executions();
        prop_assert_eq!(executions.len(), calls.len());
        prop_assert!(executions.iter().all(|e| e.status.is_terminal()));
        prop_assert!(executions.iter().all(|e| ids.contains(e.id.as_str())));
    }
}
