//! Planner：构造推理提示词、调用推理服务、把输出解码为 PlanStep
//!
//! 推理服务只需输出一行 `FUNCTION_CALL: tool|k=v|...` 或 `FINAL_ANSWER: [...]`。
//! 解码只看第一条以这两个前缀开头的行（先去掉 markdown 代码围栏）；其余情况、超时或服务失败都是 Unknown。
//! Planner 不重试，也不对模型输出做任何求值。

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;

use crate::llm::{complete_with_timeout, LlmClient, Message};
use crate::memory::RetrievedMemory;
use crate::react::args::decode_call;
use crate::react::perception::PerceptionResult;
use crate::tools::{conform_args, describe_params, ToolCall, ToolSpec};

const FUNCTION_CALL_PREFIX: &str = "FUNCTION_CALL:";
const FINAL_ANSWER_PREFIX: &str = "FINAL_ANSWER:";

/// 提示词中每条记忆最多展示的字符数
const MEMORY_PREVIEW_CHARS: usize = 500;

const SYSTEM_PROMPT: &str = "You are a reasoning-driven task agent. \
Respond with EXACTLY ONE line in one of these formats:\n\
FUNCTION_CALL: tool_name|param1=value1|param2=value2\n\
FINAL_ANSWER: [answer]\n\
Use dotted keys for nested parameters (input.string=abc) and [a, b] for lists. \
Do NOT repeat function calls with the same parameters. \
Do not add explanations or markdown.";

/// 规划结果：恰好一种
#[derive(Debug, Clone, PartialEq)]
pub enum PlanStep {
    ToolCall(ToolCall),
    FinalAnswer { value: String },
    Unknown,
}

impl std::fmt::Display for PlanStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanStep::ToolCall(call) => write!(f, "call {}", call),
            PlanStep::FinalAnswer { value } => write!(f, "final answer: {}", value),
            PlanStep::Unknown => write!(f, "unknown"),
        }
    }
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"(?m)^[ \t]*```[^\n]*$").ok()).as_ref()
}

/// 去掉 markdown 代码围栏行（```json 与结尾的 ```），保留其中内容
pub fn strip_markdown(text: &str) -> String {
    match fence_regex() {
        Some(re) => re.replace_all(text, "").trim().to_string(),
        None => text
            .lines()
            .filter(|l| !l.trim_start().starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
    }
}

/// 把推理输出解码为 PlanStep；目录中的工具按其 schema 校验参数
pub fn decode_plan(text: &str, catalog: &[ToolSpec]) -> PlanStep {
    let cleaned = strip_markdown(text);
    let line = cleaned
        .lines()
        .map(|l| l.trim().trim_matches('`').trim())
        .find(|l| l.starts_with(FUNCTION_CALL_PREFIX) || l.starts_with(FINAL_ANSWER_PREFIX));

    let Some(line) = line else {
        tracing::debug!(output = %text, "no plan line in reasoning output");
        return PlanStep::Unknown;
    };

    if let Some(body) = line.strip_prefix(FINAL_ANSWER_PREFIX) {
        return decode_final_answer(body);
    }

    let body = line.strip_prefix(FUNCTION_CALL_PREFIX).unwrap_or_default();
    let (name, args) = match decode_call(body) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(error = %e, line = %line, "malformed function call");
            return PlanStep::Unknown;
        }
    };

    let args = match catalog.iter().find(|t| t.name == name) {
        Some(spec) => match conform_args(&spec.input_schema, args) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "function call arguments rejected");
                return PlanStep::Unknown;
            }
        },
        // 未知工具交给执行器报 UnknownTool
        None => args,
    };
    PlanStep::ToolCall(ToolCall::new(name, args))
}

fn decode_final_answer(body: &str) -> PlanStep {
    let mut value = body.trim();
    if let Some(inner) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        value = inner.trim();
    }
    if value.is_empty() || value.eq_ignore_ascii_case("unknown") {
        return PlanStep::Unknown;
    }
    PlanStep::FinalAnswer {
        value: value.to_string(),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut s: String = text.chars().take(max_chars).collect();
    s.push_str("...");
    s
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub fn build_prompt(
        perception: &PerceptionResult,
        memories: &[RetrievedMemory],
        catalog: &[ToolSpec],
        step: usize,
        max_steps: usize,
    ) -> String {
        let mut prompt = String::from("Decide the next action for the task below.\n\n");

        prompt.push_str("Available tools:\n");
        if catalog.is_empty() {
            prompt.push_str("(none)\n");
        }
        for (i, tool) in catalog.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. {}({}) - {}\n",
                i + 1,
                tool.name,
                describe_params(&tool.input_schema),
                tool.description
            ));
        }

        prompt.push_str("\nRelevant memories:\n");
        if memories.is_empty() {
            prompt.push_str("(none)\n");
        }
        for m in memories {
            prompt.push_str(&format!(
                "- [{}] {}\n",
                m.record.source_url,
                preview(&m.record.chunk.text, MEMORY_PREVIEW_CHARS)
            ));
        }

        prompt.push_str("\nInput summary:\n");
        prompt.push_str(&format!("- User input: {}\n", perception.raw_input));
        prompt.push_str(&format!("- Intent: {}\n", perception.intent));
        prompt.push_str(&format!(
            "- Entities: {}\n",
            if perception.entities.is_empty() {
                "(none)".to_string()
            } else {
                perception.entities.join(", ")
            }
        ));
        prompt.push_str(&format!(
            "- Tool hint: {}\n",
            perception.tool_hint.as_deref().unwrap_or("None")
        ));

        prompt.push_str(&format!("\nThis is attempt {} of {}.", step, max_steps));
        if step >= max_steps {
            prompt.push_str(" This is the final attempt: respond with FINAL_ANSWER.");
        }
        prompt
    }

    /// 规划一步；服务失败或超时返回 Unknown，不重试
    pub async fn plan(
        &self,
        perception: &PerceptionResult,
        memories: &[RetrievedMemory],
        catalog: &[ToolSpec],
        step: usize,
        max_steps: usize,
    ) -> (PlanStep, String) {
        let prompt = Self::build_prompt(perception, memories, catalog, step, max_steps);
        let messages = [Message::system(SYSTEM_PROMPT), Message::user(prompt)];
        match complete_with_timeout(self.llm.as_ref(), &messages, self.timeout).await {
            Ok(text) => (decode_plan(&text, catalog), text),
            Err(e) => {
                tracing::warn!(error = %e, step, "planning failed");
                (PlanStep::Unknown, String::new())
            }
        }
    }
}
