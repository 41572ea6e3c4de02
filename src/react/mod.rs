//! 认知层：感知、规划（含调用解码）、会话状态与 Agent 主循环

pub mod args;
pub mod events;
pub mod loop_;
pub mod perception;
pub mod planner;
pub mod session;

pub use args::{decode_call, decode_value, DecodeError};
pub use events::ReactEvent;
pub use loop_::AgentLoop;
pub use perception::{PerceptionResult, PerceptionUnit};
pub use planner::{decode_plan, strip_markdown, PlanStep, Planner};
pub use session::{framing, AgentSession, SessionOutcome, SessionReport};
