//! Orchestrator settings: layered sources with validation.
//!
//! Every knob resolves per key at read time, in priority order: process
//! environment, then `.env` in the working directory, then
//! `~/.config/steward/config.toml`. File sources never mutate the process
//! environment. Invalid values are a fatal [`ConfigError`] at startup,
//! never a silent fallback.
//!
//! `.env` lines use the variable names themselves (`GATEWAY_BASE=...`);
//! `config.toml` is a flat table keyed by the lowercase variable name, with
//! scalar TOML values mapped onto the same parsers the environment uses:
//!
//! ```toml
//! gateway_base = "http://127.0.0.1:5455"
//! agent_model = "openai:gpt-4.1-mini"
//! agent_max_tool_steps = 8
//! tool_cache_enabled = true
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Fatal configuration problem; the process exits with the message.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("config file {path}: {reason}")]
    ConfigFile { path: PathBuf, reason: String },
    #[error("embedding dimension mismatch: store expects {expected}, model produces {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// File-backed settings sources, consulted when a variable is absent from
/// the process environment: `.env` first, then the XDG config table.
#[derive(Debug, Default)]
pub struct SettingsSources {
    dotenv: HashMap<String, String>,
    config_file: HashMap<String, String>,
}

impl SettingsSources {
    /// Discovers the standard locations: `./.env` and
    /// `$XDG_CONFIG_HOME/steward/config.toml`. Missing files are fine;
    /// unreadable or malformed ones are fatal.
    pub fn discover() -> Result<Self, ConfigError> {
        let dotenv = match std::env::current_dir() {
            Ok(dir) => read_dotenv(&dir.join(".env"))?,
            Err(_) => HashMap::new(),
        };
        let config_file = match dirs::config_dir() {
            Some(base) => read_config_table(&base.join("steward").join("config.toml"))?,
            None => HashMap::new(),
        };
        Ok(Self {
            dotenv,
            config_file,
        })
    }

    /// Sources rooted in one directory: `<dir>/.env` and
    /// `<dir>/config.toml`. Used by tests.
    pub fn from_dir(dir: &Path) -> Result<Self, ConfigError> {
        Ok(Self {
            dotenv: read_dotenv(&dir.join(".env"))?,
            config_file: read_config_table(&dir.join("config.toml"))?,
        })
    }

    /// No file sources: the environment alone decides.
    pub fn empty() -> Self {
        Self::default()
    }

    fn get(&self, var: &str) -> Option<String> {
        self.dotenv
            .get(var)
            .or_else(|| self.config_file.get(&var.to_lowercase()))
            .cloned()
    }
}

/// Minimal `.env` reader: one `KEY=VALUE` per line, `#` comments, an
/// optional `export ` prefix, matching single or double quotes stripped
/// (double quotes unescape `\"`). Missing file reads as empty.
fn read_dotenv(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(content.lines().filter_map(parse_env_line).collect())
}

fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), unquote(value.trim())))
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        if bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"' {
            return value[1..value.len() - 1].replace("\\\"", "\"");
        }
        if bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'' {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

/// Reads the flat `config.toml` table into string values. Scalars only
/// (strings, integers, floats, booleans); nested tables or arrays name the
/// offending key in the error instead of being silently dropped.
fn read_config_table(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table: toml::Table = content.parse().map_err(|e: toml::de::Error| {
        ConfigError::ConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;

    let mut out = HashMap::new();
    for (key, value) in table {
        let rendered = match value {
            toml::Value::String(s) => s,
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            other => {
                return Err(ConfigError::ConfigFile {
                    path: path.to_path_buf(),
                    reason: format!("key {key}: expected a scalar, found {}", other.type_str()),
                })
            }
        };
        out.insert(key, rendered);
    }
    Ok(out)
}

/// Spawn configuration for one MCP server subprocess.
#[derive(Clone, Debug, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Per-tool call deadline override in seconds.
    #[serde(default)]
    pub tool_timeout_s: Option<f64>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Deserialize)]
struct McpServersFile {
    #[serde(default)]
    servers: Vec<McpServerConfig>,
}

/// Loads the MCP servers file: `{"servers": [{name, command, args, env, ...}]}`.
pub fn load_mcp_servers(path: &Path) -> Result<Vec<McpServerConfig>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: McpServersFile =
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(file.servers)
}

/// All orchestrator settings. Built once at startup and shared immutably.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Base URL of the OpenAI-compatible gateway.
    pub gateway_base: String,
    /// Model doing the reasoning and tool calling.
    pub agent_model: String,
    /// Model used by the tool-selection classifier.
    pub intent_model: String,
    /// Model used for embeddings.
    pub embedding_model: String,
    /// Sandbox root; persistence lives under `<root>/agent_data`.
    pub agent_fs_root: PathBuf,
    pub max_tool_steps: u32,
    pub http_timeout: Duration,
    /// Bearer token required on inbound requests when set.
    pub auth_token: Option<String>,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
    pub tool_cache_enabled: bool,
    pub tool_cache_ttl: Duration,
    /// Default per-call deadline for MCP tool calls.
    pub tool_call_timeout: Duration,
    pub max_parallel_tools: usize,
    /// Cap on the classifier-narrowed tool subset.
    pub selection_cap: usize,
    /// Path to the MCP servers JSON file, when configured.
    pub mcp_servers_file: Option<PathBuf>,
    /// Rewrite the last user message into a standalone search query.
    pub query_refinement: bool,
    /// Pre-populate the classification cache for common patterns at startup.
    pub precompute_intents: bool,
    pub listen_addr: SocketAddr,
}

impl Settings {
    /// Full layered load: process env, `./.env`, XDG `config.toml`.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(&SettingsSources::discover()?)
    }

    /// Environment-only load (no file sources).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(&SettingsSources::empty())
    }

    /// Resolves every knob against the given sources. Each variable has a
    /// default; a value that is present but does not parse is fatal.
    pub fn resolve(sources: &SettingsSources) -> Result<Self, ConfigError> {
        let gateway_base = string_setting(sources, "GATEWAY_BASE", "http://127.0.0.1:5455")
            .trim_end_matches('/')
            .to_string();
        let agent_model = string_setting(sources, "AGENT_MODEL", "openai:gpt-4.1-mini");
        let intent_model = string_setting(sources, "INTENT_MODEL", &agent_model);
        let embedding_model = string_setting(sources, "EMBEDDING_MODEL", "embeddinggemma:300m");
        let agent_fs_root = PathBuf::from(string_setting(
            sources,
            "AGENT_FS_ROOT",
            &default_fs_root().to_string_lossy(),
        ));

        Ok(Self {
            gateway_base,
            agent_model,
            intent_model,
            embedding_model,
            agent_fs_root,
            max_tool_steps: parse_setting(sources, "AGENT_MAX_TOOL_STEPS", 8u32)?,
            http_timeout: Duration::from_secs_f64(parse_setting(
                sources,
                "AGENT_HTTP_TIMEOUT_S",
                120.0f64,
            )?),
            auth_token: lookup(sources, "ROUTER_AUTH_TOKEN"),
            breaker_threshold: parse_setting(sources, "MCP_CIRCUIT_BREAKER_THRESHOLD", 5u32)?,
            breaker_cooldown: Duration::from_secs_f64(parse_setting(
                sources,
                "MCP_CIRCUIT_BREAKER_TIMEOUT",
                60.0f64,
            )?),
            tool_cache_enabled: parse_setting(sources, "TOOL_CACHE_ENABLED", true)?,
            tool_cache_ttl: Duration::from_secs_f64(parse_setting(
                sources,
                "TOOL_CACHE_TTL",
                300.0f64,
            )?),
            tool_call_timeout: Duration::from_secs_f64(parse_setting(
                sources,
                "MCP_TOOL_TIMEOUT_S",
                30.0f64,
            )?),
            max_parallel_tools: parse_setting(sources, "AGENT_MAX_PARALLEL_TOOLS", 5usize)?,
            selection_cap: parse_setting(sources, "AGENT_TOOL_SELECTION_CAP", 15usize)?,
            mcp_servers_file: lookup(sources, "MCP_SERVERS").map(PathBuf::from),
            query_refinement: parse_setting(sources, "STEWARD_QUERY_REFINEMENT", false)?,
            precompute_intents: parse_setting(sources, "STEWARD_PRECOMPUTE_INTENTS", false)?,
            listen_addr: parse_setting(sources, "STEWARD_LISTEN", default_listen())?,
        })
    }

    /// Directory for the feedback and classification cache files.
    pub fn persistence_dir(&self) -> PathBuf {
        self.agent_fs_root.join("agent_data")
    }
}

fn default_fs_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ai")
        .join("agent_fs_root")
}

fn default_listen() -> SocketAddr {
    // The agent-runner's traditional port.
    "127.0.0.1:5460".parse().expect("static addr parses")
}

/// Non-empty value for `var`: env first, then the file sources.
fn lookup(sources: &SettingsSources, var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| sources.get(var).filter(|v| !v.is_empty()))
}

fn string_setting(sources: &SettingsSources, var: &'static str, default: &str) -> String {
    lookup(sources, var).unwrap_or_else(|| default.to_string())
}

fn parse_setting<T: std::str::FromStr>(
    sources: &SettingsSources,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(sources, var) {
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
            var,
            value: raw,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
