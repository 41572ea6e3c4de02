//! Agent 主循环：感知 → 检索 → 规划 → {执行 → 感知 | 结束}
//!
//! 检索时外部文档与本会话记录各占 top_k 个名额。
//!
//! 每次规划消耗一步，步数到达 max_steps 即结束。上一步的输出只通过 `framing` 带入下一轮感知；
//! 每个完成的感知、检索、规划和工具结果都经 IngestWorker 写入记忆并打上会话标签，后续步骤可以检索到。
//! 任何错误都不会传给调用方：非 FinalAnswer 的结束一律给出 "unknown"。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::core::{IngestRequest, IngestWorker, RecoveryAction, RecoveryEngine};
use crate::memory::{FlatIndex, MemoryStore, RetrievedMemory, VectorIndex};
use crate::react::events::ReactEvent;
use crate::react::perception::{PerceptionResult, PerceptionUnit};
use crate::react::planner::{PlanStep, Planner};
use crate::react::session::{framing, AgentSession, SessionOutcome, SessionReport};
use crate::tools::{ToolExecutor, ToolResult};

/// 事件与日志中工具输出预览的最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 300;

fn send_event(tx: &Option<UnboundedSender<ReactEvent>>, ev: ReactEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= OBSERVATION_PREVIEW_CHARS {
        return text.to_string();
    }
    let mut s: String = text.chars().take(OBSERVATION_PREVIEW_CHARS).collect();
    s.push_str("...");
    s
}

/// 一次查询的执行器；自身不持有会话状态，可并发服务多个查询
pub struct AgentLoop<I: VectorIndex = FlatIndex> {
    perception: PerceptionUnit,
    planner: Planner,
    executor: ToolExecutor,
    recovery: RecoveryEngine,
    store: Arc<MemoryStore<I>>,
    worker: IngestWorker,
    top_k: usize,
    max_steps: usize,
    event_tx: Option<UnboundedSender<ReactEvent>>,
}

impl<I: VectorIndex + 'static> AgentLoop<I> {
    pub fn new(
        perception: PerceptionUnit,
        planner: Planner,
        executor: ToolExecutor,
        store: Arc<MemoryStore<I>>,
        worker: IngestWorker,
    ) -> Self {
        Self {
            perception,
            planner,
            executor,
            recovery: RecoveryEngine::new(),
            store,
            worker,
            top_k: 3,
            max_steps: 3,
            event_tx: None,
        }
    }

    /// 检索条数与步数上限（步数至少为 1）
    pub fn with_limits(mut self, top_k: usize, max_steps: usize) -> Self {
        self.top_k = top_k;
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// 运行一次完整会话
    pub async fn run(&self, query: &str) -> SessionReport {
        let mut session = AgentSession::new(query);
        let mut executor = self.executor.for_session();
        let catalog = executor.catalog().to_vec();
        let mut tool_results: Vec<ToolResult> = Vec::new();
        let mut input = query.to_string();

        tracing::info!(session_id = %session.session_id, max_steps = self.max_steps, "session started");

        while !session.is_terminal() {
            // PERCEIVE
            let perception = self.perception.perceive(&input, &catalog).await;
            send_event(
                &self.event_tx,
                ReactEvent::Perception {
                    intent: perception.intent.clone(),
                    entities: perception.entities.clone(),
                    tool_hint: perception.tool_hint.clone(),
                },
            );

            // RETRIEVE，在写入本轮感知记录之前
            let memories = self.retrieve(&session, &input).await;
            send_event(&self.event_tx, ReactEvent::Retrieval { hits: memories.len() });
            self.remember(&session, "perception", &describe_perception(&perception))
                .await;
            if !memories.is_empty() {
                self.remember(&session, "retrieval", &describe_retrieval(&input, &memories))
                    .await;
            }

            // PLAN
            session.step_count += 1;
            let step = session.step_count;
            send_event(
                &self.event_tx,
                ReactEvent::StepUpdate {
                    step,
                    max_steps: self.max_steps,
                },
            );
            let (plan, raw) = self
                .planner
                .plan(&perception, &memories, &catalog, step, self.max_steps)
                .await;
            tracing::info!(session_id = %session.session_id, step, plan = %plan, "plan decided");
            send_event(&self.event_tx, ReactEvent::Plan { text: raw });
            self.remember(&session, "plan", &plan.to_string()).await;

            // ACT / TERMINATE
            match plan {
                PlanStep::FinalAnswer { value } => {
                    session.terminate(SessionOutcome::FinalAnswer(value));
                }
                PlanStep::Unknown => {
                    session.terminate(SessionOutcome::Unknown);
                }
                PlanStep::ToolCall(call) => {
                    send_event(
                        &self.event_tx,
                        ReactEvent::ToolCall {
                            tool: call.name.clone(),
                            args: call.args.clone(),
                        },
                    );
                    match executor.dispatch(&call).await {
                        Ok(result) => {
                            send_event(
                                &self.event_tx,
                                ReactEvent::Observation {
                                    tool: result.tool_name.clone(),
                                    preview: preview(&result.output),
                                },
                            );
                            if let Some(err) = &result.error {
                                tracing::info!(tool = %result.tool_name, error = %err, "tool reported an error");
                            }
                            self.remember(
                                &session,
                                "tool_result",
                                &format!("{} returned {}", call, result.output),
                            )
                            .await;
                            input = framing(&session.original_query, &result.output);
                            tool_results.push(result);
                        }
                        Err(e) => {
                            send_event(
                                &self.event_tx,
                                ReactEvent::ToolFailure {
                                    tool: call.name.clone(),
                                    reason: e.to_string(),
                                },
                            );
                            match self.recovery.handle(&e) {
                                RecoveryAction::Replan(message) => {
                                    tracing::warn!(session_id = %session.session_id, error = %e, "replanning");
                                    send_event(
                                        &self.event_tx,
                                        ReactEvent::Recovery {
                                            action: "replan".to_string(),
                                            detail: message.clone(),
                                        },
                                    );
                                    input = framing(&session.original_query, &message);
                                }
                                RecoveryAction::Terminate => {
                                    tracing::warn!(session_id = %session.session_id, error = %e, "tool dispatch failed, terminating");
                                    send_event(
                                        &self.event_tx,
                                        ReactEvent::Recovery {
                                            action: "terminate".to_string(),
                                            detail: e.to_string(),
                                        },
                                    );
                                    session.terminate(SessionOutcome::ToolFailure(e.to_string()));
                                }
                            }
                        }
                    }
                }
            }

            if !session.is_terminal() && session.step_count >= self.max_steps {
                tracing::warn!(session_id = %session.session_id, steps = session.step_count, "step budget exhausted");
                session.terminate(SessionOutcome::StepBudgetExceeded(self.max_steps));
            }
        }

        let outcome = session.terminal.take().unwrap_or(SessionOutcome::Unknown);
        let answer = outcome.answer().to_string();
        tracing::info!(
            session_id = %session.session_id,
            outcome = outcome.label(),
            steps = session.step_count,
            "session finished"
        );
        send_event(
            &self.event_tx,
            ReactEvent::Terminated {
                outcome: outcome.label().to_string(),
                answer: answer.clone(),
            },
        );

        SessionReport {
            session_id: session.session_id,
            answer,
            outcome,
            steps: session.step_count,
            tool_results,
        }
    }

    async fn retrieve(&self, session: &AgentSession, input: &str) -> Vec<RetrievedMemory> {
        match self
            .store
            .retrieve(input, self.top_k, Some(&session.session_id))
            .await
        {
            Ok(memories) => memories,
            Err(e) => {
                tracing::warn!(session_id = %session.session_id, error = %e, "retrieval failed, planning without memories");
                Vec::new()
            }
        }
    }

    /// 会话记录写入记忆；等待完成以便后续步骤可检索，失败只记日志
    async fn remember(&self, session: &AgentSession, kind: &str, text: &str) {
        let req = IngestRequest {
            text: text.to_string(),
            source_url: format!("session://{}/{}", session.session_id, kind),
            session: Some(session.session_id.clone()),
        };
        if let Err(e) = self.worker.submit_and_wait(req).await {
            tracing::warn!(session_id = %session.session_id, kind, error = %e, "session note not stored");
        }
    }
}

fn describe_perception(p: &PerceptionResult) -> String {
    format!(
        "Perceived input: {} | intent: {} | entities: {} | tool hint: {}",
        p.raw_input,
        p.intent,
        p.entities.join(", "),
        p.tool_hint.as_deref().unwrap_or("none")
    )
}

fn describe_retrieval(query: &str, memories: &[RetrievedMemory]) -> String {
    let sources = memories
        .iter()
        .map(|m| m.record.source_url.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!("Retrieved {} memories for '{}' from {}", memories.len(), query, sources)
}
