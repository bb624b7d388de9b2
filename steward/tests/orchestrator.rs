//! End-to-end orchestration tests: selection pipeline + agent loop + tool
//! execution against mock collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use steward::memory::{InMemoryVectorStore, MemoryHandle, ToolIndex};
use steward::select::{FeedbackStore, IntentCache, ToolSelector};
use steward::{
    AgentLoop, CircuitBreaker, Embedder, LlmClient, Message, MockLlm, StoreError, ToolCall,
    ToolDescriptor, ToolResult, ToolSource,
};
use tokio_util::sync::CancellationToken;

/// Word-bucket embedder: shared words produce high cosine similarity.
struct BagEmbedder;

#[async_trait]
impl Embedder for BagEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0f32; 64];
                for word in t.to_lowercase().split_whitespace() {
                    let mut slot = 0usize;
                    for b in word.bytes() {
                        slot = (slot * 31 + b as usize) % 64;
                    }
                    v[slot] += 1.0;
                }
                v
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        64
    }
}

struct RecordingSource {
    descriptors: Vec<ToolDescriptor>,
    calls: AtomicUsize,
}

impl RecordingSource {
    fn new() -> Self {
        let mk = |name: &str, server: &str, side_effect: bool| ToolDescriptor {
            name: name.into(),
            description: format!("{name} on {server}"),
            input_schema: serde_json::json!({"type":"object"}),
            server: server.into(),
            cacheable: !side_effect,
            side_effect,
        };
        Self {
            descriptors: vec![
                mk("list_dir", "filesystem", false),
                mk("read_text", "filesystem", false),
                mk("write_text", "filesystem", true),
                mk("web_search", "tavily-search", false),
            ],
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ToolSource for RecordingSource {
    async fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.descriptors.clone()
    }

    async fn call_tool(&self, call: &ToolCall) -> ToolResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ToolResult::success(&call.id, serde_json::json!({"entries": ["a.txt"]}), 2.0)
    }
}

struct Fixture {
    agent: AgentLoop,
    agent_llm: Arc<MockLlm>,
    classifier_llm: Arc<MockLlm>,
    source: Arc<RecordingSource>,
    feedback: Arc<FeedbackStore>,
    _dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let agent_llm = Arc::new(MockLlm::new());
    let classifier_llm = Arc::new(MockLlm::new());
    let source = Arc::new(RecordingSource::new());

    let memory = Arc::new(MemoryHandle::new(
        Arc::new(InMemoryVectorStore::new(None)),
        Arc::new(BagEmbedder),
        Duration::from_millis(100),
    ));
    memory.initialize().await.unwrap();
    let tool_index = Arc::new(ToolIndex::new(memory));
    tool_index.index_tools(&source.list_tools().await).await;

    let feedback = Arc::new(FeedbackStore::new(dir.path()));
    let selector = Arc::new(ToolSelector::new(
        classifier_llm.clone() as Arc<dyn LlmClient>,
        "intent-model",
        Arc::new(CircuitBreaker::new(5, Duration::from_secs(60))),
        Arc::new(IntentCache::open(dir.path())),
        Arc::clone(&feedback),
        tool_index,
        15,
        false,
    ));

    let agent = AgentLoop::new(
        agent_llm.clone() as Arc<dyn LlmClient>,
        Some(selector),
        source.clone() as Arc<dyn ToolSource>,
        5,
        Some(Arc::clone(&feedback)),
        8,
    );

    Fixture {
        agent,
        agent_llm,
        classifier_llm,
        source,
        feedback,
        _dir: dir,
    }
}

fn classification(servers: &[&str]) -> String {
    format!(
        r#"{{"target_servers": {}, "complexity": "low", "auto_execute": null}}"#,
        serde_json::to_string(servers).unwrap()
    )
}

fn list_dir_call(id: &str) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: "list_dir".into(),
        arguments: r#"{"path":"."}"#.into(),
    }
}

/// **Scenario**: "list files in ." selects the filesystem server,
/// dispatches list_dir, and completes with assistant text; the feedback
/// store then knows the filesystem server for that query.
#[tokio::test]
async fn list_files_selects_and_executes() {
    let f = fixture().await;
    f.classifier_llm.push_text(&classification(&["filesystem"]));
    f.agent_llm
        .push_tool_calls("", vec![list_dir_call("call_1")]);
    f.agent_llm.push_text("There is one file: a.txt");

    let outcome = f
        .agent
        .run(
            vec![Message::user("list files in .")],
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.tool_calls_executed, 1);
    assert_eq!(f.source.calls.load(Ordering::SeqCst), 1);
    assert!(outcome.message.text().contains("a.txt"));

    let suggestions = f.feedback.suggest("list files in .", 5).await;
    assert_eq!(suggestions, vec!["filesystem".to_string()]);
}

/// **Scenario**: Repeating the same query serves the classification from
/// the persistent cache — the classifier model is not called again.
#[tokio::test]
async fn repeated_query_skips_classifier() {
    let f = fixture().await;
    f.classifier_llm.push_text(&classification(&["filesystem"]));
    f.agent_llm.push_text("done");
    f.agent_llm.push_text("done again");

    let _ = f
        .agent
        .run(
            vec![Message::user("list files in .")],
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    let classifier_calls = f.classifier_llm.invocations();

    let _ = f
        .agent
        .run(
            vec![Message::user("List FILES in '.'")],
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(f.classifier_llm.invocations(), classifier_calls);
}

/// **Scenario**: The selected subset is always drawn from the
/// discovered menu and respects the cap.
#[tokio::test]
async fn selection_is_subset_of_menu() {
    let f = fixture().await;
    f.classifier_llm.push_text(&classification(&["filesystem"]));
    f.agent_llm
        .push_tool_calls("", vec![list_dir_call("c1")]);
    f.agent_llm.push_text("ok");

    let outcome = f
        .agent
        .run(
            vec![Message::user("list files in .")],
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    // The web_search tool was outside the narrowed subset, so the only
    // executed call is the filesystem one.
    assert_eq!(outcome.tool_calls_executed, 1);
}

/// **Scenario**: A garbage classifier reply degrades to the full menu and
/// the request still completes.
#[tokio::test]
async fn degraded_classifier_still_serves() {
    let f = fixture().await;
    f.classifier_llm.push_text("no json here, sorry");
    f.agent_llm.push_text("plain answer");

    let outcome = f
        .agent
        .run(
            vec![Message::user("tell me something")],
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.message.text(), "plain answer");
}

/// **Scenario**: A mixed read/write batch preserves input order in the
/// appended tool messages even though reads run first.
#[tokio::test]
async fn batch_results_preserve_input_order() {
    let f = fixture().await;
    f.classifier_llm.push_text(&classification(&["filesystem"]));
    f.agent_llm.push_tool_calls(
        "",
        vec![
            ToolCall {
                id: "read_a".into(),
                name: "read_text".into(),
                arguments: r#"{"path":"a"}"#.into(),
            },
            ToolCall {
                id: "write_b".into(),
                name: "write_text".into(),
                arguments: r#"{"path":"b","content":"x"}"#.into(),
            },
            ToolCall {
                id: "read_c".into(),
                name: "read_text".into(),
                arguments: r#"{"path":"c"}"#.into(),
            },
        ],
    );
    f.agent_llm.push_text("all done");

    let outcome = f
        .agent
        .run(
            vec![Message::user("read a, write b, read c files")],
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.tool_calls_executed, 3);
    assert_eq!(f.source.calls.load(Ordering::SeqCst), 3);
    // The second gateway call sees: system, user, assistant, then the three
    // tool messages in input order.
    assert_eq!(f.agent_llm.seen_message_counts(), vec![2, 6]);
}
