//! Agent 循环过程事件：用于流式展示感知、检索、规划、工具调用与终止

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 规划步数更新（当前第几步）
    StepUpdate { step: usize, max_steps: usize },
    /// 感知结果
    Perception {
        intent: String,
        entities: Vec<String>,
        tool_hint: Option<String>,
    },
    /// 检索到的记忆条数
    Retrieval { hits: usize },
    /// 规划器原始输出的首个有效行
    Plan { text: String },
    /// 调用工具
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation { tool: String, preview: String },
    /// 工具执行失败
    ToolFailure { tool: String, reason: String },
    /// 恢复动作（replan / terminate）
    Recovery { action: String, detail: String },
    /// 会话结束
    Terminated { outcome: String, answer: String },
}
