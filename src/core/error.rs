//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 Replan（重新规划）或 Terminate（终止会话）。

use thiserror::Error;

/// 记忆引擎与 Agent 循环中可能出现的错误（配置、维度、嵌入/推理服务、工具、存储等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Config error: {0}")]
    ConfigError(String),

    /// 向量维度与索引固定维度不一致
    #[error("Dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// 向量含 NaN 或无穷分量
    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    /// URL 任务抓取失败（网络错误、非 2xx、超时）
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Embedding service error: {0}")]
    EmbeddingServiceError(String),

    #[error("Reasoning service error: {0}")]
    ReasoningServiceError(String),

    #[error("Reasoning timeout after {0}s")]
    ReasoningTimeout(u64),

    /// 工具不在目录中（不会凭空编造工具）
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// 与上一次派发的调用完全相同（名称 + 参数）
    #[error("Duplicate call: {0}")]
    DuplicateCall(String),

    /// 持久化的索引/元数据缺失或数量不一致
    #[error("Storage corruption: {0}")]
    StorageCorruption(String),

    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("Step budget exceeded ({0} steps)")]
    StepBudgetExceeded(usize),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 摄取 worker 已停止，无法接收任务
    #[error("Ingest worker unavailable")]
    WorkerUnavailable,
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 把提示写入下一轮感知输入，要求重新规划
    Replan(String),
    /// 终止当前会话
    Terminate,
}
