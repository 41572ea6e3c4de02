//! 记忆层：分块、向量索引、持久化快照、向量记忆存储

pub mod chunker;
pub mod index;
pub mod persistence;
pub mod store;
pub mod tokenizer;

pub use chunker::{chunk, Chunk, Chunker, WordWindows};
pub use index::{euclidean_distance, FlatIndex, VectorIndex};
pub use persistence::{SnapshotPaths, INDEX_FILE, META_FILE};
pub use store::{MemoryRecord, MemoryStore, RetrievedMemory};
