//! 核心层：错误与恢复、串行摄取 worker、网页抓取

pub mod error;
pub mod ingest_worker;
pub mod page_fetcher;
pub mod recovery;

pub use error::{AgentError, RecoveryAction};
pub use ingest_worker::{IngestRequest, IngestWorker, Task, TaskId, TaskKind, TaskPoll, TaskStatus};
pub use page_fetcher::{html_to_text, HttpFetcher, PageFetcher};
pub use recovery::RecoveryEngine;
