//! 向量记忆存储
//!
//! 持有 {索引, 有序记录} 并保证两者等长；记录在索引中的位置即其身份。
//! 写入：分块 → 逐块嵌入（锁外）→ 一次性原子提交并序列化快照 → 锁外落盘。任一块嵌入失败则整批不提交。
//! 检索：嵌入查询 → 索引检索 → 映射回记录 → 按会话过滤。
//! 外部文档与会话记录各有 k 个名额，合并后按距离排序，会话笔记不会挤掉文档。

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::EmbeddingProvider;
use crate::memory::persistence::{encode_snapshot, load_snapshot, write_snapshot, SnapshotPaths};
use crate::memory::{Chunk, Chunker, FlatIndex, VectorIndex};

/// 一条记忆记录（向量保存在索引的同一位置）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub chunk: Chunk,
    pub source_url: String,
    /// 写入时间（毫秒时间戳）
    pub inserted_at: i64,
    /// 会话记录的标签；外部文档为 None
    #[serde(default)]
    pub session: Option<String>,
}

/// 检索命中
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedMemory {
    pub record: MemoryRecord,
    /// 与查询的欧氏距离
    pub distance: f32,
}

struct StoreState<I> {
    index: I,
    records: Vec<MemoryRecord>,
}

/// 向量记忆存储；读取走读锁，写入只由 IngestWorker 串行发起
pub struct MemoryStore<I: VectorIndex = FlatIndex> {
    state: RwLock<StoreState<I>>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Chunker,
    snapshot: Option<SnapshotPaths>,
    /// 在释放写锁前获取，保证快照按提交顺序落盘
    persist_gate: Mutex<()>,
}

impl<I: VectorIndex> MemoryStore<I> {
    /// 不落盘的存储（测试与临时会话）
    pub fn in_memory(index: I, embedder: Arc<dyn EmbeddingProvider>, chunker: Chunker) -> Self {
        Self {
            state: RwLock::new(StoreState {
                index,
                records: Vec::new(),
            }),
            embedder,
            chunker,
            snapshot: None,
            persist_gate: Mutex::new(()),
        }
    }

    /// 按配置打开：从 `data_dir` 加载快照；两文件都不存在时为空存储；
    /// 损坏时记录 StorageCorruption 并回退为空存储
    pub fn open(config: &AppConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self, AgentError> {
        let chunker = Chunker::new(config.memory.chunk_size, config.memory.chunk_overlap)?;
        Ok(Self::open_at(&config.app.data_dir, chunker, embedder))
    }

    pub fn open_at(
        data_dir: impl Into<PathBuf>,
        chunker: Chunker,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let data_dir = data_dir.into();
        let paths = SnapshotPaths::new(&data_dir);
        let (index, records) = match load_snapshot::<I>(&paths) {
            Ok(Some((index, records))) => {
                tracing::info!(dir = %data_dir.display(), records = records.len(), "memory loaded");
                (index, records)
            }
            Ok(None) => {
                tracing::info!(dir = %data_dir.display(), "no persisted memory, starting empty");
                (I::default(), Vec::new())
            }
            Err(e) => {
                tracing::error!(dir = %data_dir.display(), error = %e, "memory snapshot unusable, starting empty");
                (I::default(), Vec::new())
            }
        };

        Self {
            state: RwLock::new(StoreState { index, records }),
            embedder,
            chunker,
            snapshot: Some(paths),
            persist_gate: Mutex::new(()),
        }
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// 写入外部文档，返回块数
    pub async fn ingest(&self, document: &str, source_url: &str) -> Result<usize, AgentError> {
        self.ingest_batch(document, source_url, None).await
    }

    /// 写入带会话标签的记录
    pub async fn ingest_note(
        &self,
        session: &str,
        text: &str,
        source_url: &str,
    ) -> Result<usize, AgentError> {
        self.ingest_batch(text, source_url, Some(session.to_string())).await
    }

    async fn ingest_batch(
        &self,
        text: &str,
        source_url: &str,
        session: Option<String>,
    ) -> Result<usize, AgentError> {
        let source_id = format!("src_{}", uuid::Uuid::new_v4());
        let chunks = self.chunker.chunk(&source_id, text);
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            vectors.push(self.embedder.embed(&chunk.text).await?);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let count = chunks.len();
        let mut state = self.state.write().await;
        state.index.add(&vectors)?;
        state.records.extend(chunks.into_iter().map(|chunk| MemoryRecord {
            chunk,
            source_url: source_url.to_string(),
            inserted_at: now,
            session: session.clone(),
        }));
        tracing::debug!(source_url, chunks = count, total = state.records.len(), "memory batch committed");

        let Some(paths) = self.snapshot.clone() else {
            return Ok(count);
        };
        // 持久化失败时内存中的批次仍保留，错误返回给调用方
        let bytes = match encode_snapshot(&state.index, &state.records) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "memory snapshot encode failed");
                return Err(e);
            }
        };
        let _gate = self.persist_gate.lock().await;
        drop(state);

        let written = tokio::task::spawn_blocking(move || write_snapshot(&paths, &bytes))
            .await
            .map_err(|e| AgentError::PersistenceFailed(e.to_string()))
            .and_then(|r| r);
        if let Err(e) = &written {
            tracing::error!(error = %e, "memory persist failed");
        }
        written.map(|_| count)
    }

    /// 检索与查询最近的记录，按距离升序
    ///
    /// `session_filter` 为 None 时返回所有记录中最近的至多 k 条；
    /// 为 Some(s) 时外部文档至多 k 条、会话 s 的记录至多 k 条，合并后至多 2k 条，
    /// 其他会话的记录不可见。
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        session_filter: Option<&str>,
    ) -> Result<Vec<RetrievedMemory>, AgentError> {
        if k == 0 || self.is_empty().await {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed(query).await?;

        let state = self.state.read().await;
        let Some(want) = session_filter else {
            let hits = state.index.search(&query_vec, k)?;
            return Ok(hits
                .into_iter()
                .filter_map(|(pos, distance)| to_memory(&state.records, pos, distance))
                .collect());
        };

        // 有过滤时先取全量，再按来源分别截断，避免一类记录挤掉另一类的名额
        let hits = state.index.search(&query_vec, state.index.len())?;
        let (mut documents, mut notes) = (0usize, 0usize);
        let mut merged = Vec::with_capacity(2 * k);
        for (pos, distance) in hits {
            if documents >= k && notes >= k {
                break;
            }
            let Some(memory) = to_memory(&state.records, pos, distance) else {
                continue;
            };
            let slot = match memory.record.session.as_deref() {
                None => &mut documents,
                Some(tag) if tag == want => &mut notes,
                Some(_) => continue,
            };
            if *slot < k {
                *slot += 1;
                merged.push(memory);
            }
        }
        Ok(merged)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 所有记录的副本（按写入顺序）
    pub async fn records(&self) -> Vec<MemoryRecord> {
        self.state.read().await.records.clone()
    }
}

fn to_memory(records: &[MemoryRecord], pos: usize, distance: f32) -> Option<RetrievedMemory> {
    records.get(pos).map(|record| RetrievedMemory {
        record: record.clone(),
        distance,
    })
}
