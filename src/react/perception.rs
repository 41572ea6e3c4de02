//! 感知：从输入文本中提取意图、实体与工具提示
//!
//! 请求推理服务输出严格 JSON；服务失败、超时或输出无法解析时退化为 intent = "unknown" 的结果，
//! 不中断会话。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::llm::{complete_with_timeout, LlmClient, Message};
use crate::react::planner::strip_markdown;
use crate::tools::ToolSpec;

/// 感知结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptionResult {
    pub raw_input: String,
    pub intent: String,
    pub entities: Vec<String>,
    pub tool_hint: Option<String>,
}

impl PerceptionResult {
    /// 无法感知时的退化结果
    pub fn fallback(raw_input: &str) -> Self {
        Self {
            raw_input: raw_input.to_string(),
            intent: "unknown".to_string(),
            entities: Vec::new(),
            tool_hint: None,
        }
    }
}

#[derive(Deserialize)]
struct RawPerception {
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    entities: Vec<serde_json::Value>,
    #[serde(default)]
    tool_hint: Option<String>,
}

pub struct PerceptionUnit {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl PerceptionUnit {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub fn build_prompt(input: &str, catalog: &[ToolSpec]) -> String {
        let tools = catalog
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Extract facts about the user input below.\n\
             Return ONLY a JSON object with keys:\n\
             - intent: short description of what the user wants\n\
             - entities: list of strings (numbers, names, keywords)\n\
             - tool_hint: name of the most useful tool from [{tools}], or null\n\
             Do not wrap the JSON in markdown.\n\n\
             Input: \"{input}\""
        )
    }

    /// 感知一次输入；失败时返回 fallback
    pub async fn perceive(&self, input: &str, catalog: &[ToolSpec]) -> PerceptionResult {
        let prompt = Self::build_prompt(input, catalog);
        let text = match complete_with_timeout(self.llm.as_ref(), &[Message::user(prompt)], self.timeout).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "perception failed, using fallback");
                return PerceptionResult::fallback(input);
            }
        };

        match parse_perception(input, &text, catalog) {
            Some(result) => result,
            None => {
                tracing::warn!(output = %text, "perception output not valid JSON, using fallback");
                PerceptionResult::fallback(input)
            }
        }
    }
}

/// 解析感知输出；tool_hint 不在目录中时丢弃
pub fn parse_perception(input: &str, text: &str, catalog: &[ToolSpec]) -> Option<PerceptionResult> {
    let cleaned = strip_markdown(text);
    let json = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => return None,
    };
    let raw: RawPerception = serde_json::from_str(json).ok()?;

    let intent = raw
        .intent
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    let entities = raw
        .entities
        .into_iter()
        .map(|v| match v {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .collect();
    let tool_hint = raw
        .tool_hint
        .map(|s| s.trim().to_string())
        .filter(|hint| catalog.iter().any(|t| &t.name == hint));

    Some(PerceptionResult {
        raw_input: input.to_string(),
        intent,
        entities,
        tool_hint,
    })
}
