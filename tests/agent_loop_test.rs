//! Agent 循环集成测试：步数上限、重复调用、推理失败、会话记录

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use nectar::config::AppConfig;
use nectar::llm::{HashEmbedder, MockLlmClient};
use nectar::react::SessionOutcome;
use nectar::tools::{LocalToolSession, ToolSession, ToolSpec};
use nectar::{AgentBuilder, AgentRuntime};
use serde_json::Value;

const PERCEPTION_JSON: &str = r#"{"intent": "compute", "entities": ["2"], "tool_hint": "calculate"}"#;

/// 包装进程内 Session，统计真正到达的调用次数
struct CountingSession {
    inner: LocalToolSession,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolSession for CountingSession {
    async fn list_tools(&self) -> Vec<ToolSpec> {
        self.inner.list_tools().await
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.call_tool(name, args).await
    }
}

fn is_perception(prompt: &str) -> bool {
    prompt.starts_with("Extract facts")
}

/// 感知固定返回 JSON，规划按顺序回放 plans（用尽后重复最后一条）
fn planner_script(plans: Vec<&'static str>) -> (Arc<MockLlmClient>, Arc<AtomicUsize>) {
    let plan_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&plan_calls);
    let llm = MockLlmClient::new(move |prompt| {
        if is_perception(prompt) {
            return Some(PERCEPTION_JSON.to_string());
        }
        let i = counter.fetch_add(1, Ordering::SeqCst);
        plans.get(i).or_else(|| plans.last()).map(|p| p.to_string())
    });
    (Arc::new(llm), plan_calls)
}

async fn runtime(llm: Arc<MockLlmClient>, max_steps: usize) -> (AgentRuntime, Arc<AtomicUsize>) {
    let mut cfg = AppConfig::default();
    cfg.agent.max_steps = max_steps;
    cfg.memory.chunk_size = 200;
    cfg.memory.chunk_overlap = 20;
    cfg.embedding.dimension = 128;

    // search_documents 指向独立的空存储，这些用例不涉及文档检索
    let embedder = Arc::new(HashEmbedder::new(128));
    let calls = Arc::new(AtomicUsize::new(0));
    let search_store = Arc::new(nectar::memory::MemoryStore::in_memory(
        nectar::memory::FlatIndex::new(),
        embedder.clone(),
        nectar::memory::Chunker::new(200, 20).unwrap(),
    ));
    let session = CountingSession {
        inner: LocalToolSession::with_builtin_tools(search_store, 3),
        calls: Arc::clone(&calls),
    };

    let runtime = AgentBuilder::new(cfg)
        .ephemeral()
        .with_llm(llm)
        .with_embedder(embedder)
        .with_tool_session(Arc::new(session))
        .build()
        .await
        .unwrap();
    (runtime, calls)
}

#[tokio::test]
async fn test_terminates_at_exactly_max_steps() {
    let (llm, plan_calls) = planner_script(vec![
        "FUNCTION_CALL: calculate|expression=1+1",
        "FUNCTION_CALL: calculate|expression=2+2",
        "FUNCTION_CALL: calculate|expression=3+3",
        "FUNCTION_CALL: calculate|expression=4+4",
    ]);
    let (rt, calls) = runtime(llm, 3).await;

    let report = rt.ask("never finishes").await;
    assert_eq!(report.steps, 3);
    assert_eq!(report.outcome, SessionOutcome::StepBudgetExceeded(3));
    assert_eq!(report.answer, "unknown");
    assert_eq!(plan_calls.load(Ordering::SeqCst), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    rt.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_call_rejected_without_session() {
    let (llm, _) = planner_script(vec![
        "FUNCTION_CALL: calculate|expression=2+2",
        "FUNCTION_CALL: calculate|expression=2+2",
        "FINAL_ANSWER: [4]",
    ]);
    let (rt, calls) = runtime(Arc::clone(&llm), 3).await;

    let report = rt.ask("what is 2+2").await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.steps, 3);
    assert_eq!(report.answer, "4");
    assert_eq!(report.tool_results.len(), 1);
    assert_eq!(report.tool_results[0].output, r#"{"result":4}"#);

    // 拒绝信息经 framing 进入下一轮感知
    assert!(llm
        .prompts()
        .iter()
        .any(|p| is_perception(p) && p.contains("repeats the previous call")));
    rt.shutdown().await;
}

#[tokio::test]
async fn test_tool_output_carried_by_framing() {
    let (llm, _) = planner_script(vec![
        "FUNCTION_CALL: calculate|expression=6*7",
        "FINAL_ANSWER: [42]",
    ]);
    let (rt, _) = runtime(Arc::clone(&llm), 3).await;

    let report = rt.ask("what is six times seven").await;
    assert_eq!(report.answer, "42");
    assert_eq!(report.steps, 2);
    assert!(llm.prompts().iter().any(|p| p.contains(
        "Original task: what is six times seven\nPrevious output: {\"result\":42}\nWhat should I do next?"
    )));
    rt.shutdown().await;
}

#[tokio::test]
async fn test_reasoning_failure_is_unknown() {
    let llm = Arc::new(MockLlmClient::new(|_| None));
    let (rt, calls) = runtime(llm, 3).await;

    let report = rt.ask("anything").await;
    assert_eq!(report.outcome, SessionOutcome::Unknown);
    assert_eq!(report.answer, "unknown");
    assert_eq!(report.steps, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    rt.shutdown().await;
}

#[tokio::test]
async fn test_malformed_plan_is_unknown() {
    let (llm, _) = planner_script(vec!["FUNCTION_CALL: calculate|expression=[1, 2"]);
    let (rt, calls) = runtime(llm, 3).await;

    let report = rt.ask("broken").await;
    assert_eq!(report.outcome, SessionOutcome::Unknown);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    rt.shutdown().await;
}

#[tokio::test]
async fn test_session_history_visible_to_later_steps() {
    let (llm, _) = planner_script(vec![
        "FUNCTION_CALL: calculate|expression=2+2",
        "FINAL_ANSWER: [4]",
    ]);
    let (rt, _) = runtime(Arc::clone(&llm), 3).await;
    let report = rt.ask("what is 2+2").await;

    // 第二次规划的提示词中能看到本会话之前的记录
    let plan_prompts: Vec<String> = llm.prompts().into_iter().filter(|p| !is_perception(p)).collect();
    assert_eq!(plan_prompts.len(), 2);
    assert!(plan_prompts[1].contains(&format!("session://{}/", report.session_id)));

    let own = rt
        .store()
        .retrieve("calculate returned result", 50, Some(&report.session_id))
        .await
        .unwrap();
    assert!(own.iter().any(|m| m.record.source_url.ends_with("/tool_result")));

    let other = rt
        .store()
        .retrieve("calculate returned result", 50, Some("session_other"))
        .await
        .unwrap();
    assert!(other.is_empty());
    rt.shutdown().await;
}

#[tokio::test]
async fn test_documents_survive_session_history() {
    let (llm, _) = planner_script(vec![
        "FUNCTION_CALL: calculate|expression=12*12",
        "FINAL_ANSWER: [144]",
    ]);
    let (rt, _) = runtime(Arc::clone(&llm), 3).await;
    rt.ingest("a gross is twelve dozen, which is 144 items", "doc://units")
        .await
        .unwrap();

    let report = rt.ask("how many items are in a gross").await;
    assert_eq!(report.answer, "144");

    // 第一步之后会话记录多于 top_k 条，文档仍在第二次规划的提示词中
    let plan_prompts: Vec<String> = llm.prompts().into_iter().filter(|p| !is_perception(p)).collect();
    assert_eq!(plan_prompts.len(), 2);
    assert!(plan_prompts[0].contains("doc://units"));
    assert!(plan_prompts[1].contains("doc://units"));
    rt.shutdown().await;
}
