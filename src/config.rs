//! Runtime configuration read from environment variables

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// What a turn does when a tool call names an unregistered tool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownToolPolicy {
    /// Record a failed execution, emit `tool_error`, keep going
    #[default]
    Degrade,
    /// Emit a single `error` event and end the turn
    Abort,
}

impl FromStr for UnknownToolPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "degrade" => Ok(Self::Degrade),
            "abort" => Ok(Self::Abort),
            other => Err(format!("expected 'degrade' or 'abort', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite file backing the conversation store
    pub db_path: PathBuf,
    pub enable_persistence: bool,
    /// Fail pending tool executions when the store opens. Only safe when
    /// no other process is using the same database file.
    pub recover_pending: bool,
    pub default_model: String,
    pub default_provider: String,
    pub openai_api_key: Option<String>,
    pub openai_api_base: Option<String>,
    pub provider_connect_timeout: Duration,
    pub provider_read_timeout: Duration,
    /// Applied to tools that do not declare their own timeout
    pub tool_timeout: Duration,
    pub unknown_tool_policy: UnknownToolPolicy,
    /// Sandbox root for filesystem and git tools
    pub allow_fs_base: PathBuf,
    pub enable_terminal: bool,
    pub enable_git: bool,
    /// When set, only these tools are registered
    pub allowed_tools: Option<Vec<String>>,
    /// Upper bound for `list_messages` reads
    pub history_limit: usize,
    /// Capacity of each turn's event channel
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/orchestrator.db"),
            enable_persistence: true,
            recover_pending: false,
            default_model: "gpt-4o-mini".to_string(),
            default_provider: "openai".to_string(),
            openai_api_key: None,
            openai_api_base: None,
            provider_connect_timeout: Duration::from_secs(10),
            provider_read_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(60),
            unknown_tool_policy: UnknownToolPolicy::Degrade,
            allow_fs_base: PathBuf::from("/workspaces"),
            enable_terminal: true,
            enable_git: true,
            allowed_tools: None,
            history_limit: 50,
            event_buffer: 64,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or blank keys keep their
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("ORCHESTRATOR_DB_PATH") {
            config.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("ENABLE_PERSISTENCE") {
            config.enable_persistence = parse_bool("ENABLE_PERSISTENCE", &v)?;
        }
        if let Some(v) = get("RECOVER_PENDING") {
            config.recover_pending = parse_bool("RECOVER_PENDING", &v)?;
        }
        if let Some(v) = get("DEFAULT_MODEL") {
            config.default_model = v;
        }
        if let Some(v) = get("DEFAULT_PROVIDER") {
            config.default_provider = v;
        }
        config.openai_api_key = get("OPENAI_API_KEY");
        config.openai_api_base = get("OPENAI_API_BASE");
        if let Some(v) = get("PROVIDER_CONNECT_TIMEOUT_SECS") {
            config.provider_connect_timeout = parse_secs("PROVIDER_CONNECT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("PROVIDER_READ_TIMEOUT_SECS") {
            config.provider_read_timeout = parse_secs("PROVIDER_READ_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("TOOL_TIMEOUT_SECS") {
            config.tool_timeout = parse_secs("TOOL_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("UNKNOWN_TOOL_POLICY") {
            config.unknown_tool_policy = v.parse().map_err(|reason| ConfigError::Invalid {
                key: "UNKNOWN_TOOL_POLICY",
                value: v.clone(),
                reason,
            })?;
        }
        if let Some(v) = get("ALLOW_FS_BASE") {
            config.allow_fs_base = PathBuf::from(v);
        }
        if let Some(v) = get("ENABLE_TERMINAL") {
            config.enable_terminal = parse_bool("ENABLE_TERMINAL", &v)?;
        }
        if let Some(v) = get("ENABLE_GIT") {
            config.enable_git = parse_bool("ENABLE_GIT", &v)?;
        }
        if let Some(v) = get("ALLOWED_TOOLS") {
            config.allowed_tools = Some(parse_list(&v));
        }
        if let Some(v) = get("HISTORY_LIMIT") {
            config.history_limit = parse_positive("HISTORY_LIMIT", &v)?;
        }
        if let Some(v) = get("EVENT_BUFFER") {
            config.event_buffer = parse_positive("EVENT_BUFFER", &v)?;
        }

        Ok(config)
    }
}

fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean")),
    }
}

fn parse_secs(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = value
        .trim()
        .parse()
        .map_err(|e| invalid(key, value, format!("{e}")))?;
    if secs == 0 {
        return Err(invalid(key, value, "must be at least 1 second"));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_positive(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err(invalid(key, value, "must be positive")),
        Ok(n) => Ok(n),
        Err(e) => Err(invalid(key, value, format!("{e}"))),
    }
}

/// Accepts `a,b,c` or a JSON array such as `["a","b"]`
fn parse_list(value: &str) -> Vec<String> {
    if let Ok(items) = serde_json::from_str::<Vec<String>>(value) {
        return items;
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
