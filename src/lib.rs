//! Chat turn orchestration
//!
//! Runs one conversational turn at a time: requested tools first, then a
//! streamed model reply, with sessions, messages and tool executions kept
//! in SQLite.

pub mod config;
pub mod db;
pub mod llm;
pub mod orchestrator;
pub mod registry;
pub mod store;
#[cfg(test)]
pub mod testing;
pub mod tools;
pub mod tracker;

pub use config::Config;
pub use orchestrator::{Orchestrator, OrchestratorSettings, TurnEvent, TurnHandle, TurnOutcome, TurnRequest};
