//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 由闭包根据最后一条 User 消息决定回复；闭包返回 None 时模拟服务失败。
//! 默认实现把规划提示中的用户输入（无则首行）作为 FINAL_ANSWER 回显，便于离线跑通 Agent 流程。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

type Responder = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Mock 客户端：闭包应答，记录调用次数与收到的提示
pub struct MockLlmClient {
    responder: Arc<Responder>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 按顺序回放固定回复，用尽后重复最后一条
    pub fn scripted<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        let replies: Vec<String> = replies.into_iter().map(Into::into).collect();
        let cursor = AtomicUsize::new(0);
        Self::new(move |_| {
            let i = cursor.fetch_add(1, Ordering::SeqCst);
            replies.get(i).or_else(|| replies.last()).cloned()
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 收到过的所有 User 提示（按调用顺序）
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new(|prompt| {
            let input = prompt
                .lines()
                .find_map(|l| l.trim().strip_prefix("- User input:"))
                .or_else(|| prompt.lines().next())
                .unwrap_or("(no input)")
                .trim();
            Some(format!("FINAL_ANSWER: [Echo from Mock: {}]", input))
        })
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(last_user.to_string());
        }
        (self.responder)(last_user).ok_or_else(|| "mock reasoning service unavailable".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replays_then_repeats() {
        let mock = MockLlmClient::scripted(["one", "two"]);
        let msgs = [Message::user("hi")];
        assert_eq!(mock.complete(&msgs).await.unwrap(), "one");
        assert_eq!(mock.complete(&msgs).await.unwrap(), "two");
        assert_eq!(mock.complete(&msgs).await.unwrap(), "two");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_none_is_failure() {
        let mock = MockLlmClient::new(|_| None);
        assert!(mock.complete(&[Message::user("x")]).await.is_err());
    }

    #[tokio::test]
    async fn test_default_echoes_final_answer() {
        let mock = MockLlmClient::default();
        let reply = mock
            .complete(&[Message::system("sys"), Message::user("hello\nmore")])
            .await
            .unwrap();
        assert_eq!(reply, "FINAL_ANSWER: [Echo from Mock: hello]");
        assert_eq!(mock.prompts(), vec!["hello\nmore".to_string()]);
    }
}
