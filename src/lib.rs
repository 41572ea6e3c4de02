//! Nectar - 检索增强的任务执行 Agent
//!
//! 模块划分：
//! - **agent**: 运行时上下文（AgentBuilder → AgentRuntime）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、恢复策略、ingest worker
//! - **llm**: 推理服务客户端（OpenAI 兼容 / Mock）与嵌入服务
//! - **memory**: 分块、向量索引、持久化与记忆存储
//! - **observability**: tracing 初始化
//! - **react**: 感知、规划、Agent 主循环
//! - **tools**: Tool Session 边界、内置工具与执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::{AgentBuilder, AgentRuntime};
