//! 工具执行器
//!
//! 持有 Tool Session、工具目录与超时。dispatch 依次：目录查找（UnknownTool）→ 与上一次派发比较（DuplicateCall，
//! 不触达 Session）→ 超时内调用 Session（ToolTimeout / ToolExecutionFailed）。每次调用输出结构化审计日志（JSON）。
//! 重复检测只针对同一会话：每个会话通过 `for_session` 取得独立副本。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{ToolSession, ToolSpec};

/// 解码后的工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub args: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

impl std::fmt::Display for ToolCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.args)
    }
}

/// 工具调用结果；`error` 为工具自身报告的软错误（输出为含 error 键的 JSON 对象）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub arguments: Value,
    pub output: String,
    pub error: Option<String>,
}

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
#[derive(Clone)]
pub struct ToolExecutor {
    session: Arc<dyn ToolSession>,
    catalog: Arc<Vec<ToolSpec>>,
    timeout: Duration,
    last_call: Option<ToolCall>,
}

impl ToolExecutor {
    /// 创建执行器并缓存 Session 的工具目录
    pub async fn new(session: Arc<dyn ToolSession>, timeout_secs: u64) -> Self {
        let catalog = session.list_tools().await;
        tracing::debug!(tools = catalog.len(), "tool catalog loaded");
        Self {
            session,
            catalog: Arc::new(catalog),
            timeout: Duration::from_secs(timeout_secs),
            last_call: None,
        }
    }

    /// 为新会话复制执行器：共享 Session 与目录，重复检测状态清空
    pub fn for_session(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            catalog: Arc::clone(&self.catalog),
            timeout: self.timeout,
            last_call: None,
        }
    }

    pub fn catalog(&self) -> &[ToolSpec] {
        &self.catalog
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.catalog.iter().map(|t| t.name.clone()).collect()
    }

    /// 派发一次工具调用
    pub async fn dispatch(&mut self, call: &ToolCall) -> Result<ToolResult, AgentError> {
        if !self.catalog.iter().any(|t| t.name == call.name) {
            audit(&call.name, &call.args, "unknown_tool", 0);
            return Err(AgentError::UnknownTool(call.name.clone()));
        }
        if self.last_call.as_ref() == Some(call) {
            audit(&call.name, &call.args, "duplicate", 0);
            return Err(AgentError::DuplicateCall(call.to_string()));
        }
        self.last_call = Some(call.clone());

        let start = Instant::now();
        let result = timeout(
            self.timeout,
            self.session.call_tool(&call.name, call.args.clone()),
        )
        .await;

        let outcome = match &result {
            Ok(Ok(_)) => "ok",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };
        audit(&call.name, &call.args, outcome, start.elapsed().as_millis() as u64);

        match result {
            Ok(Ok(output)) => {
                let error = soft_error(&output);
                Ok(ToolResult {
                    tool_name: call.name.clone(),
                    arguments: call.args.clone(),
                    output,
                    error,
                })
            }
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(format!("{}: {}", call.name, e))),
            Err(_) => Err(AgentError::ToolTimeout(call.name.clone())),
        }
    }
}

fn audit(tool: &str, args: &Value, outcome: &str, duration_ms: u64) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool,
        "ok": outcome == "ok",
        "outcome": outcome,
        "duration_ms": duration_ms,
        "args_preview": args_preview(args),
    });
    tracing::info!(audit = %audit, "tool");
}

/// 输出是含 error 键的 JSON 对象时取出错误信息
fn soft_error(output: &str) -> Option<String> {
    match serde_json::from_str::<Value>(output) {
        Ok(Value::Object(obj)) => obj.get("error").map(|e| match e {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
        _ => None,
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
