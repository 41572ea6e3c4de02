//! 串行摄取 worker
//!
//! 所有对 MemoryStore 的写入（add + persist）都经由这里的单个消费者任务，一次只处理一个任务，
//! 保证索引只有一个写者。提交方立即拿到 TaskId，之后通过 `poll` 查询，或用 `submit_and_wait` 等待结果。
//!
//! 完成结果写入以 TaskId 为键的完成表（RwLock 保护）；单个任务失败（含 panic）只影响该任务。
//! URL 任务在 worker 内按截止时间抓取并转为纯文本后写入，抓取失败时任务进入 Error。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::page_fetcher::{html_to_text, HttpFetcher, PageFetcher};
use crate::core::AgentError;
use crate::memory::{MemoryStore, VectorIndex};

/// 任务 ID
pub type TaskId = String;

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// 外部文档
    Document,
    /// 会话过程记录（带 session 标签）
    SessionNote,
    /// 待抓取的网页，payload.source_url 为地址
    Url,
}

/// 任务状态（只前进：Pending → Running → Done | Error）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl TaskStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Done | Self::Error => 2,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// 摄取请求载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub text: String,
    pub source_url: String,
    /// Some 时写入的记录带会话标签
    pub session: Option<String>,
}

/// 摄取任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub payload: IngestRequest,
    pub status: TaskStatus,
    /// 成功时写入的块数
    pub result: Option<usize>,
    pub error: Option<String>,
    /// 创建时间（毫秒时间戳）
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

impl Task {
    fn new(kind: TaskKind, payload: IngestRequest) -> Self {
        Self {
            id: format!("ingest_{}", uuid::Uuid::new_v4()),
            kind,
            payload,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: chrono::Utc::now().timestamp_millis(),
            completed_at: None,
        }
    }

    /// 状态只允许前进；回退请求被忽略并返回 false
    fn advance(&mut self, next: TaskStatus) -> bool {
        if next.rank() <= self.status.rank() {
            return false;
        }
        self.status = next;
        true
    }
}

/// `poll` 的查询结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskPoll {
    /// 未知、排队中或执行中
    Processing,
    Done { chunks: usize },
    Error { message: String },
}

struct Job {
    id: TaskId,
    reply: Option<oneshot::Sender<Result<usize, AgentError>>>,
}

type TaskTable = Arc<RwLock<HashMap<TaskId, Task>>>;

/// URL 任务默认抓取截止时间
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// 串行摄取 worker 句柄（可 clone，共享同一个消费者）
#[derive(Clone)]
pub struct IngestWorker {
    tasks: TaskTable,
    job_tx: mpsc::UnboundedSender<Job>,
    cancel: CancellationToken,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl IngestWorker {
    /// 启动消费者任务，URL 任务使用 HTTP 抓取与默认截止时间
    pub fn spawn<I>(store: Arc<MemoryStore<I>>) -> Self
    where
        I: VectorIndex + 'static,
    {
        Self::spawn_with_fetcher(
            store,
            Arc::new(HttpFetcher::new(DEFAULT_FETCH_TIMEOUT)),
            DEFAULT_FETCH_TIMEOUT,
        )
    }

    pub fn spawn_with_fetcher<I>(
        store: Arc<MemoryStore<I>>,
        fetcher: Arc<dyn PageFetcher>,
        fetch_timeout: Duration,
    ) -> Self
    where
        I: VectorIndex + 'static,
    {
        let tasks: TaskTable = Arc::new(RwLock::new(HashMap::new()));
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let fetch = Fetch {
            fetcher,
            timeout: fetch_timeout,
        };
        let handle = tokio::spawn(run_worker(
            store,
            fetch,
            Arc::clone(&tasks),
            job_rx,
            cancel.clone(),
        ));

        Self {
            tasks,
            job_tx,
            cancel,
            handle: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// 提交外部文档，立即返回 TaskId
    pub async fn submit(
        &self,
        document: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Result<TaskId, AgentError> {
        let req = IngestRequest {
            text: document.into(),
            source_url: source_url.into(),
            session: None,
        };
        self.enqueue(TaskKind::Document, req, None).await
    }

    /// 提交会话记录
    pub async fn submit_note(
        &self,
        session: impl Into<String>,
        text: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Result<TaskId, AgentError> {
        let req = IngestRequest {
            text: text.into(),
            source_url: source_url.into(),
            session: Some(session.into()),
        };
        self.enqueue(TaskKind::SessionNote, req, None).await
    }

    /// 提交网页地址，worker 抓取后按外部文档写入
    pub async fn submit_url(&self, url: impl Into<String>) -> Result<TaskId, AgentError> {
        self.enqueue(TaskKind::Url, url_request(url.into()), None).await
    }

    /// 抓取网页并等待写入完成
    pub async fn fetch_and_wait(&self, url: impl Into<String>) -> Result<usize, AgentError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(TaskKind::Url, url_request(url.into()), Some(tx))
            .await?;
        rx.await.map_err(|_| AgentError::WorkerUnavailable)?
    }

    /// 提交并等待完成，返回写入的块数
    pub async fn submit_and_wait(&self, req: IngestRequest) -> Result<usize, AgentError> {
        let kind = if req.session.is_some() {
            TaskKind::SessionNote
        } else {
            TaskKind::Document
        };
        let (tx, rx) = oneshot::channel();
        self.enqueue(kind, req, Some(tx)).await?;
        rx.await.map_err(|_| AgentError::WorkerUnavailable)?
    }

    async fn enqueue(
        &self,
        kind: TaskKind,
        payload: IngestRequest,
        reply: Option<oneshot::Sender<Result<usize, AgentError>>>,
    ) -> Result<TaskId, AgentError> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::WorkerUnavailable);
        }
        let task = Task::new(kind, payload);
        let id = task.id.clone();
        self.tasks.write().await.insert(id.clone(), task);

        if self
            .job_tx
            .send(Job {
                id: id.clone(),
                reply,
            })
            .is_err()
        {
            self.tasks.write().await.remove(&id);
            return Err(AgentError::WorkerUnavailable);
        }
        tracing::debug!(task_id = %id, ?kind, "ingest task queued");
        Ok(id)
    }

    /// 查询任务；未知 / 排队 / 执行中一律返回 Processing，完成结果可重复读取
    pub async fn poll(&self, task_id: &str) -> TaskPoll {
        let tasks = self.tasks.read().await;
        match tasks.get(task_id) {
            Some(task) => to_poll(task),
            None => TaskPoll::Processing,
        }
    }

    /// 取走已完成的任务结果；未完成时不移除并返回 None
    pub async fn drain(&self, task_id: &str) -> Option<TaskPoll> {
        let mut tasks = self.tasks.write().await;
        if !tasks.get(task_id)?.status.is_finished() {
            return None;
        }
        tasks.remove(task_id).map(|t| to_poll(&t))
    }

    /// 查看任务完整信息
    pub async fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// 停止 worker 并等待其退出；队列中尚未开始的任务不再执行
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!("ingest worker join failed: {}", e);
            }
        }
    }
}

fn url_request(url: String) -> IngestRequest {
    IngestRequest {
        text: String::new(),
        source_url: url,
        session: None,
    }
}

struct Fetch {
    fetcher: Arc<dyn PageFetcher>,
    timeout: Duration,
}

fn to_poll(task: &Task) -> TaskPoll {
    match task.status {
        TaskStatus::Pending | TaskStatus::Running => TaskPoll::Processing,
        TaskStatus::Done => TaskPoll::Done {
            chunks: task.result.unwrap_or(0),
        },
        TaskStatus::Error => TaskPoll::Error {
            message: task.error.clone().unwrap_or_default(),
        },
    }
}

async fn run_worker<I>(
    store: Arc<MemoryStore<I>>,
    fetch: Fetch,
    tasks: TaskTable,
    mut job_rx: mpsc::UnboundedReceiver<Job>,
    cancel: CancellationToken,
) where
    I: VectorIndex + 'static,
{
    tracing::info!("ingest worker started");
    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = job_rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let (kind, payload) = {
            let mut guard = tasks.write().await;
            match guard.get_mut(&job.id) {
                Some(task) => {
                    task.advance(TaskStatus::Running);
                    (task.kind, task.payload.clone())
                }
                None => continue,
            }
        };

        let outcome = process(&store, &fetch, kind, &payload).await;

        {
            let mut guard = tasks.write().await;
            if let Some(task) = guard.get_mut(&job.id) {
                match &outcome {
                    Ok(n) => {
                        task.advance(TaskStatus::Done);
                        task.result = Some(*n);
                        tracing::info!(task_id = %job.id, chunks = n, "ingest task done");
                    }
                    Err(e) => {
                        task.advance(TaskStatus::Error);
                        task.error = Some(e.to_string());
                        tracing::warn!(task_id = %job.id, error = %e, "ingest task failed");
                    }
                }
                task.completed_at = Some(chrono::Utc::now().timestamp_millis());
            }
        }

        // 同步等待的任务直接拿到结果，不留在完成表中
        if let Some(reply) = job.reply {
            tasks.write().await.remove(&job.id);
            let _ = reply.send(outcome);
        }
    }
    tracing::info!("ingest worker stopped");
}

/// 执行单个任务；panic 被捕获并转为错误
async fn process<I>(
    store: &MemoryStore<I>,
    fetch: &Fetch,
    kind: TaskKind,
    req: &IngestRequest,
) -> Result<usize, AgentError>
where
    I: VectorIndex + 'static,
{
    let fut = async {
        match (kind, &req.session) {
            (TaskKind::Url, _) => fetch_and_ingest(store, fetch, &req.source_url).await,
            (_, Some(session)) => store.ingest_note(session, &req.text, &req.source_url).await,
            (_, None) => store.ingest(&req.text, &req.source_url).await,
        }
    };
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(AgentError::ToolExecutionFailed(format!("ingest task panicked: {msg}")))
        }
    }
}

async fn fetch_and_ingest<I>(store: &MemoryStore<I>, fetch: &Fetch, url: &str) -> Result<usize, AgentError>
where
    I: VectorIndex + 'static,
{
    let html = tokio::time::timeout(fetch.timeout, fetch.fetcher.fetch(url))
        .await
        .map_err(|_| {
            AgentError::FetchFailed(format!(
                "{url}: no response within {}s",
                fetch.timeout.as_secs_f32()
            ))
        })??;
    let text = html_to_text(&html);
    tracing::debug!(url, chars = text.len(), "page fetched");
    store.ingest(&text, url).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{EmbeddingProvider, HashEmbedder};
    use crate::memory::{Chunker, FlatIndex};
    use async_trait::async_trait;

    fn store() -> Arc<MemoryStore<FlatIndex>> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::new(32));
        Arc::new(MemoryStore::in_memory(
            FlatIndex::new(),
            embedder,
            Chunker::new(4, 1).unwrap(),
        ))
    }

    /// 遇到 "boom" 时 panic，遇到 "fail" 时报错
    struct FlakyEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, AgentError> {
            if text.contains("boom") {
                panic!("embedder exploded");
            }
            if text.contains("fail") {
                return Err(AgentError::EmbeddingServiceError("offline".into()));
            }
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    /// 按 URL 返回固定页面；"slow" 永不返回，"missing" 模拟 404
    struct StubFetcher;

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch(&self, url: &str) -> Result<String, AgentError> {
            if url.contains("slow") {
                std::future::pending::<()>().await;
            }
            if url.contains("missing") {
                return Err(AgentError::FetchFailed(format!("{url}: HTTP 404 Not Found")));
            }
            Ok("<html><body><p>Worker bees <em>forage</em> for nectar</p></body></html>".to_string())
        }
    }

    fn url_worker(s: &Arc<MemoryStore<FlatIndex>>) -> IngestWorker {
        IngestWorker::spawn_with_fetcher(
            Arc::clone(s),
            Arc::new(StubFetcher),
            Duration::from_millis(50),
        )
    }

    async fn wait_finished(worker: &IngestWorker, id: &str) -> TaskPoll {
        for _ in 0..200 {
            let p = worker.poll(id).await;
            if p != TaskPoll::Processing {
                return p;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("task {id} did not finish");
    }

    #[tokio::test]
    async fn test_poll_unknown_is_processing() {
        let worker = IngestWorker::spawn(store());
        assert_eq!(worker.poll("nope").await, TaskPoll::Processing);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_and_poll() {
        let worker = IngestWorker::spawn(store());
        let id = worker.submit("a b c d e f", "doc://1").await.unwrap();
        assert_eq!(wait_finished(&worker, &id).await, TaskPoll::Done { chunks: 2 });
        // 结果可重复读取
        assert_eq!(worker.poll(&id).await, TaskPoll::Done { chunks: 2 });
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_fifo_completion_order() {
        let s = store();
        let worker = IngestWorker::spawn(Arc::clone(&s));
        let mut ids = Vec::new();
        for i in 0..10 {
            ids.push(worker.submit(format!("doc number {i}"), format!("doc://{i}")).await.unwrap());
        }
        let last = ids.last().unwrap().clone();
        wait_finished(&worker, &last).await;

        let mut completed: Vec<(i64, usize)> = Vec::new();
        for (i, id) in ids.iter().enumerate() {
            let task = worker.get(id).await.unwrap();
            assert_eq!(task.status, TaskStatus::Done);
            completed.push((task.completed_at.unwrap(), i));
        }
        assert!(completed.windows(2).all(|w| w[0].0 <= w[1].0));

        // 记录顺序即提交顺序
        let urls: Vec<String> = s.records().await.into_iter().map(|r| r.source_url).collect();
        let expected: Vec<String> = (0..10).map(|i| format!("doc://{i}")).collect();
        assert_eq!(urls, expected);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_and_panic_do_not_stop_worker() {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(FlakyEmbedder);
        let s = Arc::new(MemoryStore::in_memory(
            FlatIndex::new(),
            embedder,
            Chunker::new(10, 0).unwrap(),
        ));
        let worker = IngestWorker::spawn(Arc::clone(&s));

        let failing = worker.submit("this will fail", "doc://f").await.unwrap();
        let panicking = worker.submit("boom goes here", "doc://p").await.unwrap();
        let good = worker.submit("fine text", "doc://g").await.unwrap();

        assert!(matches!(wait_finished(&worker, &failing).await, TaskPoll::Error { .. }));
        match wait_finished(&worker, &panicking).await {
            TaskPoll::Error { message } => assert!(message.contains("panicked")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(wait_finished(&worker, &good).await, TaskPoll::Done { chunks: 1 });
        assert_eq!(s.len().await, 1);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_and_wait_note() {
        let s = store();
        let worker = IngestWorker::spawn(Arc::clone(&s));
        let n = worker
            .submit_and_wait(IngestRequest {
                text: "perceived intent compute".into(),
                source_url: "session://s1".into(),
                session: Some("s1".into()),
            })
            .await
            .unwrap();
        assert_eq!(n, 1);
        let records = s.records().await;
        assert_eq!(records[0].session.as_deref(), Some("s1"));
        assert!(worker.tasks.read().await.is_empty());
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_url_task_ingests_page_text() {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::new(32));
        let s = Arc::new(MemoryStore::in_memory(
            FlatIndex::new(),
            embedder,
            Chunker::new(50, 5).unwrap(),
        ));
        let worker = url_worker(&s);
        let id = worker.submit_url("https://example.com/bees").await.unwrap();
        assert_eq!(wait_finished(&worker, &id).await, TaskPoll::Done { chunks: 1 });
        assert_eq!(worker.get(&id).await.unwrap().kind, TaskKind::Url);

        let records = s.records().await;
        assert_eq!(records[0].source_url, "https://example.com/bees");
        assert!(records[0].chunk.text.contains("forage"));
        assert!(!records[0].chunk.text.contains("<em>"));
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_url_fetch_failure_marks_error() {
        let s = store();
        let worker = url_worker(&s);
        let missing = worker.submit_url("https://example.com/missing").await.unwrap();
        let slow = worker.submit_url("https://example.com/slow").await.unwrap();
        let after = worker.submit("still works", "doc://after").await.unwrap();

        match wait_finished(&worker, &missing).await {
            TaskPoll::Error { message } => assert!(message.contains("404")),
            other => panic!("expected error, got {other:?}"),
        }
        match wait_finished(&worker, &slow).await {
            TaskPoll::Error { message } => assert!(message.contains("no response")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(wait_finished(&worker, &after).await, TaskPoll::Done { chunks: 1 });
        assert_eq!(s.len().await, 1);
        assert!(matches!(
            worker.fetch_and_wait("https://example.com/missing").await,
            Err(AgentError::FetchFailed(_))
        ));
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_drain_removes_finished() {
        let worker = IngestWorker::spawn(store());
        let id = worker.submit("x y", "doc://x").await.unwrap();
        wait_finished(&worker, &id).await;
        assert_eq!(worker.drain(&id).await, Some(TaskPoll::Done { chunks: 1 }));
        assert_eq!(worker.drain(&id).await, None);
        assert_eq!(worker.poll(&id).await, TaskPoll::Processing);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let worker = IngestWorker::spawn(store());
        worker.shutdown().await;
        assert_eq!(
            worker.submit("late", "doc://late").await,
            Err(AgentError::WorkerUnavailable)
        );
    }

    #[test]
    fn test_status_only_moves_forward() {
        let mut task = Task::new(
            TaskKind::Document,
            IngestRequest {
                text: String::new(),
                source_url: String::new(),
                session: None,
            },
        );
        assert!(task.advance(TaskStatus::Running));
        assert!(task.advance(TaskStatus::Done));
        assert!(!task.advance(TaskStatus::Pending));
        assert!(!task.advance(TaskStatus::Error));
        assert_eq!(task.status, TaskStatus::Done);
    }
}
