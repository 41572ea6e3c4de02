//! search_documents 工具：在向量记忆中检索与查询最相近的内容
//!
//! 每条结果包含 content / url / distance；content 超过上限时截断并追加 ...[truncated]。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::memory::{MemoryStore, VectorIndex};
use crate::tools::schema::schema_value;
use crate::tools::Tool;

const MAX_CONTENT_CHARS: usize = 2000;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchDocumentsArgs {
    /// 检索短语
    pub query: String,
    /// 返回条数，缺省用配置的 top_k
    pub k: Option<usize>,
}

pub struct SearchDocumentsTool<I: VectorIndex> {
    store: Arc<MemoryStore<I>>,
    default_k: usize,
}

impl<I: VectorIndex> SearchDocumentsTool<I> {
    pub fn new(store: Arc<MemoryStore<I>>, default_k: usize) -> Self {
        Self {
            store,
            default_k: default_k.max(1),
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...[truncated]", s.chars().take(max).collect::<String>())
    }
}

#[async_trait]
impl<I: VectorIndex + 'static> Tool for SearchDocumentsTool<I> {
    fn name(&self) -> &str {
        "search_documents"
    }

    fn description(&self) -> &str {
        "Search ingested documents and past session notes for passages relevant to a query."
    }

    fn parameters_schema(&self) -> Value {
        schema_value::<SearchDocumentsArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: SearchDocumentsArgs = serde_json::from_value(args).map_err(|e| e.to_string())?;
        let k = args.k.unwrap_or(self.default_k);
        let hits = self
            .store
            .retrieve(&args.query, k, None)
            .await
            .map_err(|e| e.to_string())?;

        if hits.is_empty() {
            return Ok(json!({
                "status": "no_results",
                "message": "No relevant results found"
            })
            .to_string());
        }

        let results: Vec<Value> = hits
            .iter()
            .map(|m| {
                json!({
                    "content": truncate_chars(&m.record.chunk.text, MAX_CONTENT_CHARS),
                    "url": m.record.source_url,
                    "distance": m.distance,
                })
            })
            .collect();
        Ok(json!({
            "status": "success",
            "total_results": results.len(),
            "results": results,
        })
        .to_string())
    }
}
