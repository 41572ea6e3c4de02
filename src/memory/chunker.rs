//! 文档分块：按词切出带重叠的窗口
//!
//! 第 i 个窗口为 words[i*stride .. i*stride+size]（stride = size - overlap），
//! 起点遍历 0, stride, 2*stride, ... 直到越过最后一个词；末尾的窗口可以更短。

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 文档块（产出后不可变）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 来源文档 ID
    pub source_id: String,
    /// 窗口文本（词之间以单个空格连接）
    pub text: String,
    /// 在来源文档中的序号
    pub ordinal: usize,
}

/// 词窗口分块器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    /// 要求 size > overlap >= 0，否则返回 ConfigError
    pub fn new(size: usize, overlap: usize) -> Result<Self, AgentError> {
        if size == 0 || overlap >= size {
            return Err(AgentError::ConfigError(format!(
                "chunk size must exceed overlap (size={size}, overlap={overlap})"
            )));
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn stride(&self) -> usize {
        self.size - self.overlap
    }

    /// 返回可重复迭代（Clone）的窗口序列
    pub fn windows<'a>(&self, text: &'a str) -> WordWindows<'a> {
        WordWindows {
            words: text.split_whitespace().collect(),
            size: self.size,
            stride: self.stride(),
            start: 0,
        }
    }

    /// 分块并编号
    pub fn chunk(&self, source_id: &str, text: &str) -> Vec<Chunk> {
        self.windows(text)
            .enumerate()
            .map(|(ordinal, text)| Chunk {
                source_id: source_id.to_string(),
                text,
                ordinal,
            })
            .collect()
    }
}

/// 词窗口迭代器；clone 后从当前位置重新开始
#[derive(Debug, Clone)]
pub struct WordWindows<'a> {
    words: Vec<&'a str>,
    size: usize,
    stride: usize,
    start: usize,
}

impl Iterator for WordWindows<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.start >= self.words.len() {
            return None;
        }
        let end = (self.start + self.size).min(self.words.len());
        let window = self.words[self.start..end].join(" ");
        self.start += self.stride;
        Some(window)
    }
}

/// 便捷函数：一次性切块，参数非法时返回 ConfigError
pub fn chunk(text: &str, size: usize, overlap: usize) -> Result<Vec<String>, AgentError> {
    Ok(Chunker::new(size, overlap)?.windows(text).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_example() {
        let chunks = chunk("A B C D E F", 4, 1).unwrap();
        assert_eq!(chunks, vec!["A B C D", "D E F"]);
    }

    #[test]
    fn test_chunk_rejects_bad_config() {
        assert!(matches!(chunk("a b", 2, 2), Err(AgentError::ConfigError(_))));
        assert!(matches!(chunk("a b", 1, 3), Err(AgentError::ConfigError(_))));
        assert!(matches!(chunk("a b", 0, 0), Err(AgentError::ConfigError(_))));
    }

    #[test]
    fn test_chunk_empty_text() {
        assert!(chunk("  \n\t ", 3, 1).unwrap().is_empty());
    }

    #[test]
    fn test_chunk_shorter_than_window() {
        assert_eq!(chunk("one two", 5, 2).unwrap(), vec!["one two"]);
    }

    #[test]
    fn test_trailing_window_kept() {
        // 起点 3 仍在词表内，尾部窗口 "D" 也要产出
        assert_eq!(chunk("A B C D", 4, 1).unwrap(), vec!["A B C D", "D"]);
        assert_eq!(
            chunk("a b c d e f g", 3, 1).unwrap(),
            vec!["a b c", "c d e", "e f g", "g"]
        );
    }

    #[test]
    fn test_windows_restartable() {
        let chunker = Chunker::new(3, 1).unwrap();
        let windows = chunker.windows("a b c d e f g");
        let first: Vec<String> = windows.clone().collect();
        let second: Vec<String> = windows.collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["a b c", "c d e", "e f g", "g"]);
    }

    #[test]
    fn test_overlap_and_coverage() {
        let text = (0..47).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let words: Vec<&str> = text.split_whitespace().collect();
        for (size, overlap) in [(5, 0), (5, 2), (7, 6), (10, 3), (1, 0)] {
            let chunker = Chunker::new(size, overlap).unwrap();
            let chunks: Vec<Vec<String>> = chunker
                .windows(&text)
                .map(|c| c.split(' ').map(String::from).collect())
                .collect();

            // 每个词至少出现在一个块中，且按顺序覆盖
            let mut covered = vec![false; words.len()];
            for (i, c) in chunks.iter().enumerate() {
                let start = i * chunker.stride();
                for (j, w) in c.iter().enumerate() {
                    assert_eq!(w, words[start + j]);
                    covered[start + j] = true;
                }
            }
            assert!(covered.iter().all(|c| *c), "size={size} overlap={overlap}");

            // 相邻块恰好重叠 overlap 个词（最后一块除外）
            for pair in chunks.windows(2) {
                if pair[1].len() == size {
                    assert_eq!(pair[0][size - overlap..], pair[1][..overlap]);
                }
            }
        }
    }

    #[test]
    fn test_chunk_ordinals() {
        let chunker = Chunker::new(2, 0).unwrap();
        let chunks = chunker.chunk("doc1", "a b c d e");
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].ordinal, 2);
        assert_eq!(chunks[2].text, "e");
        assert!(chunks.iter().all(|c| c.source_id == "doc1"));
    }
}
