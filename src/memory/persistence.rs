//! 记忆持久化
//!
//! 索引与元数据成对落盘：`<dir>/memory.index`（二进制向量）+ `<dir>/memory.meta.json`（有序记录）。
//! 写入时先写临时文件再 rename，两者都成功才算一次完整快照。
//! 序列化（`encode_snapshot`）与落盘（`write_snapshot`）分开：前者在存储锁内完成，
//! 后者是阻塞 I/O，由调用方放到 `spawn_blocking` 中执行。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::index::write_synced;
use crate::memory::{MemoryRecord, VectorIndex};

pub const INDEX_FILE: &str = "memory.index";
pub const META_FILE: &str = "memory.meta.json";

const META_VERSION: u32 = 1;

#[derive(Deserialize)]
struct MetaFile {
    version: u32,
    records: Vec<MemoryRecord>,
}

/// 快照目录
#[derive(Debug, Clone)]
pub struct SnapshotPaths {
    pub index: PathBuf,
    pub meta: PathBuf,
}

impl SnapshotPaths {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            index: dir.join(INDEX_FILE),
            meta: dir.join(META_FILE),
        }
    }
}

/// 已序列化、待落盘的一次快照
#[derive(Debug, Clone)]
pub struct SnapshotBytes {
    pub index: Vec<u8>,
    pub meta: Vec<u8>,
}

#[derive(Serialize)]
struct MetaFileRef<'a> {
    version: u32,
    records: &'a [MemoryRecord],
}

pub fn encode_snapshot<I: VectorIndex>(
    index: &I,
    records: &[MemoryRecord],
) -> Result<SnapshotBytes, AgentError> {
    let meta = serde_json::to_vec_pretty(&MetaFileRef {
        version: META_VERSION,
        records,
    })
    .map_err(|e| AgentError::PersistenceFailed(e.to_string()))?;
    Ok(SnapshotBytes {
        index: index.encode()?,
        meta,
    })
}

/// 落盘；父目录不存在时自动创建
pub fn write_snapshot(paths: &SnapshotPaths, bytes: &SnapshotBytes) -> Result<(), AgentError> {
    let failed = |path: &Path, e: std::io::Error| {
        AgentError::PersistenceFailed(format!("{}: {}", path.display(), e))
    };

    if let Some(parent) = paths.index.parent() {
        std::fs::create_dir_all(parent).map_err(|e| failed(parent, e))?;
    }

    let index_tmp = with_tmp_suffix(&paths.index);
    let meta_tmp = with_tmp_suffix(&paths.meta);

    write_synced(&index_tmp, &bytes.index)?;
    write_synced(&meta_tmp, &bytes.meta)?;

    std::fs::rename(&index_tmp, &paths.index).map_err(|e| failed(&paths.index, e))?;
    std::fs::rename(&meta_tmp, &paths.meta).map_err(|e| failed(&paths.meta, e))?;
    Ok(())
}

pub fn save_snapshot<I: VectorIndex>(
    paths: &SnapshotPaths,
    index: &I,
    records: &[MemoryRecord],
) -> Result<(), AgentError> {
    write_snapshot(paths, &encode_snapshot(index, records)?)
}

/// 读取快照：两个文件都不存在时返回 Ok(None)；缺一个、无法解析或数量不一致返回 StorageCorruption
pub fn load_snapshot<I: VectorIndex>(
    paths: &SnapshotPaths,
) -> Result<Option<(I, Vec<MemoryRecord>)>, AgentError> {
    match (paths.index.exists(), paths.meta.exists()) {
        (false, false) => return Ok(None),
        (true, false) => {
            return Err(AgentError::StorageCorruption(format!(
                "{} exists but {} is missing",
                paths.index.display(),
                paths.meta.display()
            )))
        }
        (false, true) => {
            return Err(AgentError::StorageCorruption(format!(
                "{} exists but {} is missing",
                paths.meta.display(),
                paths.index.display()
            )))
        }
        (true, true) => {}
    }

    let index = I::load(&paths.index)?;
    let data = std::fs::read_to_string(&paths.meta)
        .map_err(|e| AgentError::StorageCorruption(format!("{}: {}", paths.meta.display(), e)))?;
    let meta: MetaFile = serde_json::from_str(&data)
        .map_err(|e| AgentError::StorageCorruption(format!("{}: {}", paths.meta.display(), e)))?;

    if meta.records.len() != index.len() {
        return Err(AgentError::StorageCorruption(format!(
            "index holds {} vectors but metadata holds {} records",
            index.len(),
            meta.records.len()
        )));
    }
    Ok(Some((index, meta.records)))
}

fn with_tmp_suffix(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Chunk, FlatIndex};
    use tempfile::TempDir;

    fn record(text: &str) -> MemoryRecord {
        MemoryRecord {
            chunk: Chunk {
                source_id: "doc_1".to_string(),
                text: text.to_string(),
                ordinal: 0,
            },
            source_url: "https://example.com".to_string(),
            inserted_at: 1,
            session: None,
        }
    }

    #[test]
    fn test_missing_both_is_fresh() {
        let dir = TempDir::new().unwrap();
        let paths = SnapshotPaths::new(dir.path());
        assert!(load_snapshot::<FlatIndex>(&paths).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let paths = SnapshotPaths::new(dir.path().join("nested"));
        let mut index = FlatIndex::new();
        index.add(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        let records = vec![record("alpha"), record("beta")];
        save_snapshot(&paths, &index, &records).unwrap();

        let (loaded, loaded_records) = load_snapshot::<FlatIndex>(&paths).unwrap().unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded_records, records);
        assert!(!dir.path().join("nested").join("memory.index.tmp").exists());
    }

    #[test]
    fn test_one_file_missing_is_corruption() {
        let dir = TempDir::new().unwrap();
        let paths = SnapshotPaths::new(dir.path());
        let mut index = FlatIndex::new();
        index.add(&[vec![1.0]]).unwrap();
        save_snapshot(&paths, &index, &[record("x")]).unwrap();
        std::fs::remove_file(&paths.meta).unwrap();
        assert!(matches!(
            load_snapshot::<FlatIndex>(&paths),
            Err(AgentError::StorageCorruption(_))
        ));
    }

    #[test]
    fn test_count_mismatch_is_corruption() {
        let dir = TempDir::new().unwrap();
        let paths = SnapshotPaths::new(dir.path());
        let mut index = FlatIndex::new();
        index.add(&[vec![1.0], vec![2.0]]).unwrap();
        save_snapshot(&paths, &index, &[record("only one")]).unwrap();
        assert!(matches!(
            load_snapshot::<FlatIndex>(&paths),
            Err(AgentError::StorageCorruption(_))
        ));
    }
}
