//! 向量索引
//!
//! `VectorIndex` 约定能力集 {add, search, persist, load}；`FlatIndex` 为精确暴力检索实现。
//! 维度由第一次插入的向量确定，之后所有向量与查询都必须匹配。
//!
//! 非有限分量（NaN / 无穷）在 `add` 时被拒绝，保证距离比较是全序。
//!
//! 持久化格式（小端）：
//! `b"NCTRIDX1"` | dimension: u32 | count: u64 | count * dimension 个 f32

use std::io::{Read, Write};
use std::path::Path;

use crate::core::AgentError;

const MAGIC: &[u8; 8] = b"NCTRIDX1";

/// 可替换的向量索引（暴力 / 近似实现都应满足相同语义）
pub trait VectorIndex: Default + Send + Sync {
    /// 原子追加：任一向量维度不符或含非有限分量则整体失败，不写入任何向量
    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), AgentError>;

    /// 返回至多 k 个 (位置, 欧氏距离)，按距离升序，距离相同按位置升序
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, AgentError>;

    /// 序列化为持久化字节，可在持有锁时调用，文件写入另行完成
    fn encode(&self) -> Result<Vec<u8>, AgentError>;

    fn persist(&self, path: &Path) -> Result<(), AgentError> {
        let buf = self.encode()?;
        write_synced(path, &buf)
    }

    fn load(path: &Path) -> Result<Self, AgentError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 尚未插入任何向量时为 None
    fn dimension(&self) -> Option<usize>;
}

/// 精确暴力检索索引，向量按行连续存放
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatIndex {
    dimension: Option<usize>,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定维度的空索引
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            data: Vec::new(),
        }
    }

    fn row(&self, position: usize, dim: usize) -> &[f32] {
        &self.data[position * dim..(position + 1) * dim]
    }
}

impl VectorIndex for FlatIndex {
    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), AgentError> {
        let Some(first) = vectors.first() else {
            return Ok(());
        };
        let dim = self.dimension.unwrap_or(first.len());
        if dim == 0 {
            return Err(AgentError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(AgentError::DimensionMismatch {
                expected: dim,
                actual: bad.len(),
            });
        }
        if let Some(row) = vectors.iter().position(|v| v.iter().any(|x| !x.is_finite())) {
            return Err(AgentError::InvalidVector(format!(
                "vector {} of batch has a non-finite component",
                row
            )));
        }

        self.dimension = Some(dim);
        self.data.reserve(vectors.len() * dim);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, AgentError> {
        let Some(dim) = self.dimension else {
            return Ok(Vec::new());
        };
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != dim {
            return Err(AgentError::DimensionMismatch {
                expected: dim,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .map(|pos| (pos, euclidean_distance(query, self.row(pos, dim))))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    fn encode(&self) -> Result<Vec<u8>, AgentError> {
        let mut buf = Vec::with_capacity(MAGIC.len() + 12 + self.data.len() * 4);
        buf.extend_from_slice(&encode_header(self.dimension.unwrap_or(0), self.len())?);
        for x in &self.data {
            buf.extend_from_slice(&x.to_le_bytes());
        }
        Ok(buf)
    }

    fn load(path: &Path) -> Result<Self, AgentError> {
        let corrupt = |msg: String| AgentError::StorageCorruption(format!("{}: {}", path.display(), msg));

        let mut bytes = Vec::new();
        std::fs::File::open(path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(|e| corrupt(e.to_string()))?;

        if bytes.len() < MAGIC.len() + 12 || &bytes[..MAGIC.len()] != MAGIC {
            return Err(corrupt("bad index header".to_string()));
        }
        let mut dim_bytes = [0u8; 4];
        dim_bytes.copy_from_slice(&bytes[8..12]);
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[12..20]);
        let dim = u32::from_le_bytes(dim_bytes) as usize;
        let count = u64::from_le_bytes(count_bytes) as usize;

        let body = &bytes[20..];
        let expected = count
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| corrupt("index size overflow".to_string()))?;
        if body.len() != expected {
            return Err(corrupt(format!(
                "expected {} bytes of vectors, found {}",
                expected,
                body.len()
            )));
        }
        if count > 0 && dim == 0 {
            return Err(corrupt("zero dimension with stored vectors".to_string()));
        }

        let data = body
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self {
            dimension: (dim > 0).then_some(dim),
            data,
        })
    }

    fn len(&self) -> usize {
        match self.dimension {
            Some(dim) if dim > 0 => self.data.len() / dim,
            _ => 0,
        }
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}

/// 魔数 + 维度 + 数量；维度超出 u32 时拒绝写入而不是截断
fn encode_header(dim: usize, count: usize) -> Result<Vec<u8>, AgentError> {
    let dim = u32::try_from(dim).map_err(|_| {
        AgentError::PersistenceFailed(format!("dimension {} does not fit the index header", dim))
    })?;
    let mut header = Vec::with_capacity(MAGIC.len() + 12);
    header.extend_from_slice(MAGIC);
    header.extend_from_slice(&dim.to_le_bytes());
    header.extend_from_slice(&(count as u64).to_le_bytes());
    Ok(header)
}

/// 写入并 fsync
pub(crate) fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), AgentError> {
    let mut file = std::fs::File::create(path)
        .map_err(|e| AgentError::PersistenceFailed(format!("{}: {}", path.display(), e)))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| AgentError::PersistenceFailed(format!("{}: {}", path.display(), e)))
}

/// 欧氏距离
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
