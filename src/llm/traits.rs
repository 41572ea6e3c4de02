//! 推理服务抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient::complete；规划器只依赖此 trait。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 带超时的 complete：超时返回 ReasoningTimeout，服务失败返回 ReasoningServiceError
pub async fn complete_with_timeout(
    llm: &dyn LlmClient,
    messages: &[Message],
    timeout: std::time::Duration,
) -> Result<String, crate::core::AgentError> {
    match tokio::time::timeout(timeout, llm.complete(messages)).await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(crate::core::AgentError::ReasoningServiceError(e)),
        Err(_) => Err(crate::core::AgentError::ReasoningTimeout(timeout.as_secs())),
    }
}
