//! Engine: constructs and owns the orchestrator's state.
//!
//! All shared state (caches, breaker maps, the memory initialization signal)
//! lives in explicit objects built here and passed into the components at
//! construction, with no globals. [`Engine::bootstrap`] wires the production
//! parts from [`Settings`]; [`Engine::with_parts`] lets tests substitute
//! mock LLMs and tool sources.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{AgentError, AgentEvent, AgentLoop, AgentOutcome};
use crate::cache::ToolCache;
use crate::llm::{ChatGateway, LlmClient};
use crate::mcp::{CircuitBreaker, McpRegistry};
use crate::memory::{GatewayEmbedder, InMemoryVectorStore, MemoryHandle, ToolIndex};
use crate::message::Message;
use crate::select::{FeedbackStore, IntentCache, ToolSelector};
use crate::settings::{load_mcp_servers, ConfigError, Settings};
use crate::tool::ToolSource;

/// Barrier wait for components that depend on memory.
const MEMORY_BARRIER_TIMEOUT: Duration = Duration::from_secs(30);
/// Declared embedding dimension before the startup probe runs.
const DEFAULT_EMBEDDING_DIM: usize = 768;

/// The request orchestration engine.
pub struct Engine {
    settings: Settings,
    agent: AgentLoop,
    source: Arc<dyn ToolSource>,
    registry: Option<Arc<McpRegistry>>,
    selector: Option<Arc<ToolSelector>>,
    intent_cache: Option<Arc<IntentCache>>,
    tool_cache: Option<Arc<ToolCache>>,
    breaker: Option<Arc<CircuitBreaker>>,
    tool_index: Option<Arc<ToolIndex>>,
    shutdown: CancellationToken,
}

impl Engine {
    /// Builds the production engine: gateway clients, MCP registry with
    /// supervisors, memory with the embedding-dimension probe, selection
    /// pipeline, and the agent loop.
    pub async fn bootstrap(settings: Settings) -> Result<Self, ConfigError> {
        let shutdown = CancellationToken::new();

        let agent_llm: Arc<dyn LlmClient> = Arc::new(
            ChatGateway::new(
                &settings.gateway_base,
                &settings.agent_model,
                settings.http_timeout,
            )
            .map_err(|e| ConfigError::Invalid {
                var: "GATEWAY_BASE",
                value: settings.gateway_base.clone(),
                reason: e.to_string(),
            })?,
        );
        let classifier_llm: Arc<dyn LlmClient> = Arc::new(
            ChatGateway::new(
                &settings.gateway_base,
                &settings.intent_model,
                settings.http_timeout,
            )
            .map_err(|e| ConfigError::Invalid {
                var: "GATEWAY_BASE",
                value: settings.gateway_base.clone(),
                reason: e.to_string(),
            })?,
        );

        let breaker = Arc::new(CircuitBreaker::new(
            settings.breaker_threshold,
            settings.breaker_cooldown,
        ));
        let tool_cache = Arc::new(ToolCache::new(
            settings.tool_cache_enabled,
            settings.tool_cache_ttl,
            10_000,
        ));

        let registry = match &settings.mcp_servers_file {
            Some(path) => {
                let configs = load_mcp_servers(path)?;
                McpRegistry::connect(
                    configs,
                    Arc::clone(&breaker),
                    Arc::clone(&tool_cache),
                    settings.tool_call_timeout,
                    &shutdown,
                )
                .await
            }
            None => {
                info!("no MCP_SERVERS file configured; starting with an empty tool registry");
                McpRegistry::empty(Arc::clone(&breaker), Arc::clone(&tool_cache))
            }
        };

        // Memory: probe the embedding model, then verify against the store
        // schema. An unreachable embedder degrades; a dimension mismatch is
        // fatal.
        let mut embedder = GatewayEmbedder::new(
            &settings.gateway_base,
            &settings.embedding_model,
            DEFAULT_EMBEDDING_DIM,
            settings.http_timeout,
        )
        .map_err(|e| ConfigError::Invalid {
            var: "GATEWAY_BASE",
            value: settings.gateway_base.clone(),
            reason: e.to_string(),
        })?;
        let probed = embedder.probe().await;
        let memory = Arc::new(MemoryHandle::new(
            Arc::new(InMemoryVectorStore::new(None)),
            Arc::new(embedder),
            MEMORY_BARRIER_TIMEOUT,
        ));
        match probed {
            Ok(dim) => {
                if let Err(e) = memory.initialize().await {
                    if let crate::memory::StoreError::DimensionMismatch { expected, actual } = e {
                        return Err(ConfigError::DimensionMismatch { expected, actual });
                    }
                    warn!(error = %e, "memory initialization failed; running degraded");
                } else {
                    info!(dimension = dim, "memory ready");
                }
            }
            Err(e) => {
                warn!(error = %e, "embedding model unreachable; semantic retrieval degraded");
            }
        }

        let tool_index = Arc::new(ToolIndex::new(Arc::clone(&memory)));
        let persistence_dir = settings.persistence_dir();
        let intent_cache = Arc::new(IntentCache::open(&persistence_dir));
        let feedback = Arc::new(FeedbackStore::new(&persistence_dir));

        let selector = Arc::new(ToolSelector::new(
            classifier_llm,
            settings.intent_model.clone(),
            Arc::clone(&breaker),
            Arc::clone(&intent_cache),
            Arc::clone(&feedback),
            Arc::clone(&tool_index),
            settings.selection_cap,
            settings.query_refinement,
        ));

        let source: Arc<dyn ToolSource> = registry.clone();
        let agent = AgentLoop::new(
            agent_llm,
            Some(Arc::clone(&selector)),
            Arc::clone(&source),
            settings.max_parallel_tools,
            Some(feedback),
            settings.max_tool_steps,
        );

        let engine = Self {
            settings,
            agent,
            source,
            registry: Some(registry),
            selector: Some(selector),
            intent_cache: Some(intent_cache),
            tool_cache: Some(tool_cache),
            breaker: Some(breaker),
            tool_index: Some(tool_index),
            shutdown,
        };
        engine.start_background_tasks().await;
        Ok(engine)
    }

    /// Minimal engine over explicit parts; used by tests and embedders.
    pub fn with_parts(
        settings: Settings,
        llm: Arc<dyn LlmClient>,
        source: Arc<dyn ToolSource>,
        selector: Option<Arc<ToolSelector>>,
    ) -> Self {
        let agent = AgentLoop::new(
            llm,
            selector.clone(),
            Arc::clone(&source),
            settings.max_parallel_tools,
            None,
            settings.max_tool_steps,
        );
        Self {
            settings,
            agent,
            source,
            registry: None,
            selector,
            intent_cache: None,
            tool_cache: None,
            breaker: None,
            tool_index: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Runs one chat request through the agent loop.
    pub async fn chat(
        &self,
        messages: Vec<Message>,
        events: Option<mpsc::Sender<AgentEvent>>,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome, AgentError> {
        self.agent.run(messages, events, cancel).await
    }

    /// Identity/health snapshot for `GET /`.
    pub async fn health(&self) -> Value {
        let tools: Vec<String> = self
            .source
            .list_tools()
            .await
            .into_iter()
            .map(|d| d.name)
            .collect();
        let mut body = json!({
            "name": "steward",
            "ok": true,
            "gateway_base": self.settings.gateway_base,
            "agent_model": self.settings.agent_model,
            "fs_root": self.settings.agent_fs_root.to_string_lossy(),
            "tools": tools,
            "max_tool_steps": self.settings.max_tool_steps,
        });
        if let Some(registry) = &self.registry {
            let servers: Vec<Value> = registry
                .server_states()
                .into_iter()
                .map(|(name, state)| json!({ "name": name, "state": state }))
                .collect();
            body["servers"] = Value::Array(servers);
        }
        body
    }

    /// Cache, breaker, and classification statistics for `GET /stats`.
    pub fn stats(&self) -> Value {
        let mut body = json!({});
        if let Some(cache) = &self.tool_cache {
            body["tool_cache"] = serde_json::to_value(cache.stats()).unwrap_or(Value::Null);
        }
        if let Some(intent) = &self.intent_cache {
            body["intent_cache"] = serde_json::to_value(intent.stats()).unwrap_or(Value::Null);
        }
        if let Some(breaker) = &self.breaker {
            body["circuit_breakers"] =
                serde_json::to_value(breaker.snapshot()).unwrap_or(Value::Null);
        }
        body
    }

    /// Starts maintenance tasks: classification-cache pruning, tool-cache
    /// sweeping, and periodic tool re-indexing (plus the optional intent
    /// warm-up). They log and swallow their own errors and stop on shutdown.
    async fn start_background_tasks(&self) {
        let cancel = self.shutdown.clone();

        if let Some(intent_cache) = self.intent_cache.clone() {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(3600));
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = interval.tick() => {
                            let removed = intent_cache.prune_expired();
                            if removed > 0 {
                                info!(removed, "pruned expired intent classifications");
                            }
                        }
                    }
                }
            });
        }

        if let Some(tool_cache) = self.tool_cache.clone() {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = interval.tick() => {
                            tool_cache.sweep_expired();
                        }
                    }
                }
            });
        }

        if let (Some(tool_index), Some(registry)) = (self.tool_index.clone(), self.registry.clone())
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(3600));
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = interval.tick() => {
                            let tools = registry.union_tools();
                            tool_index.index_tools(&tools).await;
                        }
                    }
                }
            });
        }

        if self.settings.precompute_intents {
            if let (Some(selector), Some(registry)) =
                (self.selector.clone(), self.registry.clone())
            {
                tokio::spawn(async move {
                    let menu = registry.union_tools();
                    selector.precompute_common_intents(&menu).await;
                });
            }
        }
    }

    /// Cancels background tasks and stops MCP sessions.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(registry) = &self.registry {
            registry.shutdown().await;
        }
    }
}
