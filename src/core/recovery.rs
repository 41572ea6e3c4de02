//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供 Agent 循环决定是重新规划还是终止。

use crate::core::{AgentError, RecoveryAction};

/// 将错误映射为可执行动作：只有重复调用允许重新规划，其余一律终止（不做无界重试）
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::DuplicateCall(call) => RecoveryAction::Replan(format!(
                "The call {call} was rejected because it repeats the previous call exactly. \
                 Use the previous output or choose a different action."
            )),
            _ => RecoveryAction::Terminate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_duplicate_call() {
        let engine = RecoveryEngine::new();
        let err = AgentError::DuplicateCall("calculate|expression=1+1".to_string());
        match engine.handle(&err) {
            RecoveryAction::Replan(msg) => {
                assert!(msg.contains("calculate|expression=1+1"));
            }
            _ => panic!("Expected Replan"),
        }
    }

    #[test]
    fn test_recovery_unknown_tool() {
        let engine = RecoveryEngine::new();
        let err = AgentError::UnknownTool("open_browser".to_string());
        assert_eq!(engine.handle(&err), RecoveryAction::Terminate);
    }

    #[test]
    fn test_recovery_tool_timeout() {
        let engine = RecoveryEngine::new();
        let err = AgentError::ToolTimeout("calculate".to_string());
        assert_eq!(engine.handle(&err), RecoveryAction::Terminate);
    }

    #[test]
    fn test_recovery_reasoning_timeout() {
        let engine = RecoveryEngine::new();
        assert_eq!(
            engine.handle(&AgentError::ReasoningTimeout(20)),
            RecoveryAction::Terminate
        );
    }
}
