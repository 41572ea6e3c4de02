//! 嵌入服务边界
//!
//! - `OpenAiEmbedder`：调用 OpenAI 兼容的 /embeddings 端点，单次调用带超时
//! - `HashEmbedder`：基于分词的特征哈希，确定性、离线可用（测试桩与无 API Key 时的回退）

use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::EmbeddingSection;
use crate::core::AgentError;
use crate::llm::openai::openai_config;
use crate::memory::tokenizer;

/// 文本 → 向量；失败（含超时）返回 EmbeddingServiceError，本层不重试
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AgentError>;
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiEmbedder {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>, timeout: Duration) -> Self {
        Self {
            client: Client::with_config(openai_config(base_url, api_key)),
            model: model.to_string(),
            timeout,
        }
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>, AgentError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| AgentError::EmbeddingServiceError(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| AgentError::EmbeddingServiceError(e.to_string()))?;
        response
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AgentError::EmbeddingServiceError("empty embedding response".to_string()))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AgentError> {
        match tokio::time::timeout(self.timeout, self.request(text)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::EmbeddingServiceError(format!(
                "embedding deadline of {}s expired",
                self.timeout.as_secs()
            ))),
        }
    }
}

/// 特征哈希嵌入：每个词经 FNV-1a 哈希到一个桶，符号位决定正负，最后 L2 归一化
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in tokenizer::tokenize(text) {
            let h = fnv1a(token.as_bytes());
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AgentError> {
        Ok(self.embed_text(text))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// 按配置创建嵌入提供方；provider = "openai" 但没有 API Key 时回退到 HashEmbedder
pub fn create_embedder_from_config(cfg: &EmbeddingSection) -> Arc<dyn EmbeddingProvider> {
    match cfg.provider.as_str() {
        "openai" => {
            let key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
            match key {
                Some(key) => Arc::new(OpenAiEmbedder::new(
                    cfg.base_url.as_deref(),
                    &cfg.model,
                    Some(&key),
                    Duration::from_secs(cfg.timeout_secs),
                )),
                None => {
                    tracing::warn!("OPENAI_API_KEY not set, falling back to hash embedder");
                    Arc::new(HashEmbedder::new(cfg.dimension))
                }
            }
        }
        _ => Arc::new(HashEmbedder::new(cfg.dimension)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::euclidean_distance;

    #[test]
    fn test_hash_embedder_deterministic() {
        let e = HashEmbedder::new(128);
        assert_eq!(e.embed_text("hello world"), e.embed_text("hello world"));
        assert_eq!(e.embed_text("x").len(), 128);
    }

    #[test]
    fn test_hash_embedder_normalized() {
        let e = HashEmbedder::new(64);
        let v = e.embed_text("some words to embed here");
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedder_similarity() {
        let e = HashEmbedder::new(256);
        let a = e.embed_text("inflation target for the central bank");
        let b = e.embed_text("central bank inflation target");
        let c = e.embed_text("ownership and borrowing in rust");
        assert!(euclidean_distance(&a, &b) < euclidean_distance(&a, &c));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let e = HashEmbedder::new(8);
        assert_eq!(e.embed_text("   "), vec![0.0; 8]);
    }

    #[tokio::test]
    async fn test_factory_hash_provider() {
        let cfg = EmbeddingSection {
            provider: "hash".to_string(),
            dimension: 16,
            ..EmbeddingSection::default()
        };
        let embedder = create_embedder_from_config(&cfg);
        assert_eq!(embedder.embed("abc").await.unwrap().len(), 16);
    }
}
