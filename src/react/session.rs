//! 单次查询的会话状态与结束报告

use serde::Serialize;

use crate::tools::ToolResult;

/// 会话结束方式
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SessionOutcome {
    FinalAnswer(String),
    Unknown,
    ToolFailure(String),
    StepBudgetExceeded(usize),
}

impl SessionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SessionOutcome::FinalAnswer(_) => "final_answer",
            SessionOutcome::Unknown => "unknown",
            SessionOutcome::ToolFailure(_) => "tool_failure",
            SessionOutcome::StepBudgetExceeded(_) => "step_budget_exceeded",
        }
    }

    /// 对调用方展示的答案；非 FinalAnswer 一律为 "unknown"
    pub fn answer(&self) -> &str {
        match self {
            SessionOutcome::FinalAnswer(value) => value,
            _ => "unknown",
        }
    }
}

/// 每次查询新建，结束即丢弃
#[derive(Debug, Clone)]
pub struct AgentSession {
    pub session_id: String,
    pub original_query: String,
    pub step_count: usize,
    pub terminal: Option<SessionOutcome>,
}

impl AgentSession {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            session_id: format!("session_{}", uuid::Uuid::new_v4()),
            original_query: query.into(),
            step_count: 0,
            terminal: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn terminate(&mut self, outcome: SessionOutcome) {
        if self.terminal.is_none() {
            self.terminal = Some(outcome);
        }
    }
}

/// run 的返回值
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub answer: String,
    pub outcome: SessionOutcome,
    pub steps: usize,
    pub tool_results: Vec<ToolResult>,
}

/// 把上一步输出带入下一轮感知的唯一方式
pub fn framing(original_query: &str, previous_output: &str) -> String {
    format!(
        "Original task: {}\nPrevious output: {}\nWhat should I do next?",
        original_query, previous_output
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing() {
        assert_eq!(
            framing("what is 2+2", "{\"result\": 4}"),
            "Original task: what is 2+2\nPrevious output: {\"result\": 4}\nWhat should I do next?"
        );
    }

    #[test]
    fn test_terminal_is_set_once() {
        let mut s = AgentSession::new("q");
        assert!(s.session_id.starts_with("session_"));
        s.terminate(SessionOutcome::Unknown);
        s.terminate(SessionOutcome::FinalAnswer("4".to_string()));
        assert_eq!(s.terminal, Some(SessionOutcome::Unknown));
    }

    #[test]
    fn test_non_final_answer_is_unknown() {
        assert_eq!(SessionOutcome::FinalAnswer("4".into()).answer(), "4");
        assert_eq!(SessionOutcome::StepBudgetExceeded(3).answer(), "unknown");
        assert_eq!(SessionOutcome::ToolFailure("x".into()).answer(), "unknown");
    }
}
