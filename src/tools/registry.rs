//! 工具注册表与 Tool Session 边界
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册；
//! `ToolSession` 是执行器看到的外部边界（list_tools / call_tool），`LocalToolSession` 在进程内用注册表实现它。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::{MemoryStore, VectorIndex};
use crate::tools::{CalculateTool, CheckConsistencyTool, SearchDocumentsTool, ShowReasoningTool, VerifyTool};

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认表示无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 工具目录条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Tool Session 边界：列出工具、按名调用；调用失败以 Err 字符串返回
#[async_trait]
pub trait ToolSession: Send + Sync {
    async fn list_tools(&self) -> Vec<ToolSpec>;

    async fn call_tool(&self, name: &str, args: Value) -> Result<String, String>;
}

/// 工具注册表：按名称有序存储 Arc<dyn Tool>（目录顺序稳定，便于生成确定的提示词）
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|(name, tool)| ToolSpec {
                name: name.clone(),
                description: tool.description().to_string(),
                input_schema: tool.parameters_schema(),
            })
            .collect()
    }
}

/// 进程内 Tool Session
#[derive(Clone, Default)]
pub struct LocalToolSession {
    registry: ToolRegistry,
}

impl LocalToolSession {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// 内置工具：calculate / verify / show_reasoning / check_consistency / search_documents
    pub fn with_builtin_tools<I>(store: Arc<MemoryStore<I>>, default_k: usize) -> Self
    where
        I: VectorIndex + 'static,
    {
        let mut registry = ToolRegistry::new();
        registry.register(CalculateTool);
        registry.register(VerifyTool);
        registry.register(ShowReasoningTool);
        registry.register(CheckConsistencyTool);
        registry.register(SearchDocumentsTool::new(store, default_k));
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

#[async_trait]
impl ToolSession for LocalToolSession {
    async fn list_tools(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<String, String> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| format!("Unknown tool: {name}"))?;
        tool.execute(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashEmbedder;
    use crate::memory::{Chunker, FlatIndex};

    fn session() -> LocalToolSession {
        let store = Arc::new(MemoryStore::in_memory(
            FlatIndex::new(),
            Arc::new(HashEmbedder::new(16)),
            Chunker::new(10, 2).unwrap(),
        ));
        LocalToolSession::with_builtin_tools(store, 3)
    }

    #[tokio::test]
    async fn test_builtin_catalog() {
        let names: Vec<String> = session().list_tools().await.into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec!["calculate", "check_consistency", "search_documents", "show_reasoning", "verify"]
        );
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let err = session().call_tool("open_website", serde_json::json!({})).await.unwrap_err();
        assert!(err.contains("open_website"));
    }

    #[tokio::test]
    async fn test_call_calculate() {
        let out = session()
            .call_tool("calculate", serde_json::json!({"expression": "2 + 3 * 4"}))
            .await
            .unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["result"], 14);
    }
}
