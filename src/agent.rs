//! Agent 运行时（显式上下文对象）
//!
//! `AgentBuilder` 按配置装配记忆存储、ingest worker、推理服务、Tool Session 与 Agent 循环，
//! 得到 `AgentRuntime`；调用方通过它写入文档、查询任务、提交问题。进程内不存在全局单例。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use crate::config::AppConfig;
use crate::core::{AgentError, HttpFetcher, IngestRequest, IngestWorker, TaskId, TaskPoll};
use crate::llm::{create_embedder_from_config, EmbeddingProvider, LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{Chunker, FlatIndex, MemoryStore};
use crate::react::{AgentLoop, PerceptionUnit, Planner, ReactEvent, SessionReport};
use crate::tools::{LocalToolSession, ToolExecutor, ToolSession};

/// 按 `[llm].provider` 创建推理服务客户端；openai 未设置 OPENAI_API_KEY 时退回 Mock
pub(crate) fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, AgentError> {
    match cfg.llm.provider.to_lowercase().as_str() {
        "mock" => {
            tracing::info!("Using Mock LLM");
            Ok(Arc::new(MockLlmClient::default()))
        }
        "openai" => match std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()) {
            Some(key) => {
                tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
                Ok(Arc::new(OpenAiClient::new(
                    cfg.llm.base_url.as_deref(),
                    &cfg.llm.model,
                    Some(&key),
                )))
            }
            None => {
                tracing::warn!("OPENAI_API_KEY not set, using Mock LLM");
                Ok(Arc::new(MockLlmClient::default()))
            }
        },
        other => Err(AgentError::ConfigError(format!("unknown llm provider '{other}'"))),
    }
}

/// 运行时构建器；未显式注入的组件按配置创建
pub struct AgentBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    tool_session: Option<Arc<dyn ToolSession>>,
    event_tx: Option<UnboundedSender<ReactEvent>>,
    ephemeral: bool,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            embedder: None,
            tool_session: None,
            event_tx: None,
            ephemeral: false,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// 替换内置的进程内 Tool Session（如接入远端工具服务）
    pub fn with_tool_session(mut self, session: Arc<dyn ToolSession>) -> Self {
        self.tool_session = Some(session);
        self
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 不读写 data_dir，记忆只保存在内存中
    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub async fn build(self) -> Result<AgentRuntime, AgentError> {
        let cfg = self.config;
        cfg.validate()?;

        let embedder = self
            .embedder
            .unwrap_or_else(|| create_embedder_from_config(&cfg.embedding));
        let store = if self.ephemeral {
            let chunker = Chunker::new(cfg.memory.chunk_size, cfg.memory.chunk_overlap)?;
            MemoryStore::in_memory(FlatIndex::new(), embedder, chunker)
        } else {
            MemoryStore::open(&cfg, embedder)?
        };
        let store = Arc::new(store);
        let fetch_timeout = Duration::from_secs(cfg.memory.fetch_timeout_secs);
        let worker = IngestWorker::spawn_with_fetcher(
            Arc::clone(&store),
            Arc::new(HttpFetcher::new(fetch_timeout)),
            fetch_timeout,
        );

        let llm = match self.llm {
            Some(llm) => llm,
            None => create_llm_from_config(&cfg)?,
        };
        let session: Arc<dyn ToolSession> = match self.tool_session {
            Some(session) => session,
            None => Arc::new(LocalToolSession::with_builtin_tools(
                Arc::clone(&store),
                cfg.memory.top_k,
            )),
        };
        let executor = ToolExecutor::new(session, cfg.tools.tool_timeout_secs).await;

        let timeout = Duration::from_secs(cfg.llm.timeouts.request);
        let mut agent_loop = AgentLoop::new(
            PerceptionUnit::new(Arc::clone(&llm), timeout),
            Planner::new(Arc::clone(&llm), timeout),
            executor,
            Arc::clone(&store),
            worker.clone(),
        )
        .with_limits(cfg.memory.top_k, cfg.agent.max_steps);
        if let Some(tx) = self.event_tx {
            agent_loop = agent_loop.with_event_tx(tx);
        }

        tracing::info!(
            data_dir = %cfg.app.data_dir.display(),
            ephemeral = self.ephemeral,
            max_steps = cfg.agent.max_steps,
            "agent runtime ready"
        );
        Ok(AgentRuntime {
            config: cfg,
            store,
            worker,
            llm,
            agent_loop,
        })
    }
}

/// 进程内唯一的运行时上下文
pub struct AgentRuntime {
    config: AppConfig,
    store: Arc<MemoryStore<FlatIndex>>,
    worker: IngestWorker,
    llm: Arc<dyn LlmClient>,
    agent_loop: AgentLoop<FlatIndex>,
}

impl AgentRuntime {
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MemoryStore<FlatIndex>> {
        &self.store
    }

    /// 经 worker 写入文档并等待完成，返回块数
    pub async fn ingest(&self, document: &str, source_url: &str) -> Result<usize, AgentError> {
        self.worker
            .submit_and_wait(IngestRequest {
                text: document.to_string(),
                source_url: source_url.to_string(),
                session: None,
            })
            .await
    }

    /// 异步提交文档，返回任务 ID
    pub async fn submit(&self, document: &str, source_url: &str) -> Result<TaskId, AgentError> {
        self.worker.submit(document, source_url).await
    }

    /// 异步提交网页地址，返回任务 ID；抓取与写入在 worker 中完成
    pub async fn submit_url(&self, url: &str) -> Result<TaskId, AgentError> {
        self.worker.submit_url(url).await
    }

    /// 抓取网页并等待写入完成，返回块数
    pub async fn ingest_url(&self, url: &str) -> Result<usize, AgentError> {
        self.worker.fetch_and_wait(url).await
    }

    pub async fn poll(&self, task_id: &str) -> TaskPoll {
        self.worker.poll(task_id).await
    }

    pub async fn ask(&self, query: &str) -> SessionReport {
        self.agent_loop.run(query).await
    }

    /// (prompt_tokens, completion_tokens, total_tokens)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn shutdown(&self) {
        self.worker.shutdown().await;
    }
}
