//! 工具层：Tool Session 边界、内置工具、执行器

pub mod calculator;
pub mod executor;
pub mod reasoning;
pub mod registry;
pub mod schema;
pub mod search;

pub use calculator::{evaluate, CalculateTool, VerifyTool};
pub use executor::{ToolCall, ToolExecutor, ToolResult};
pub use reasoning::{CheckConsistencyTool, ShowReasoningTool};
pub use registry::{LocalToolSession, Tool, ToolRegistry, ToolSession, ToolSpec};
pub use schema::{conform_args, describe_params, schema_value};
pub use search::SearchDocumentsTool;
