//! HashEmbedder 特征哈希用的分词
//!
//! 含中日文字符的文本交给 jieba（搜索模式），其余按非字母数字字符切分；结果统一小写，纯标点丢弃。

use std::sync::OnceLock;

use jieba_rs::Jieba;

static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn has_cjk(text: &str) -> bool {
    text.chars().any(|c| {
        matches!(c,
            '\u{3040}'..='\u{30FF}' | '\u{3400}'..='\u{4DBF}' | '\u{4E00}'..='\u{9FFF}' | '\u{F900}'..='\u{FAFF}')
    })
}

pub fn tokenize(text: &str) -> Vec<String> {
    let words: Vec<&str> = if has_cjk(text) {
        JIEBA.get_or_init(Jieba::new).cut_for_search(text, true)
    } else {
        text.split(|c: char| !c.is_alphanumeric()).collect()
    };
    words
        .into_iter()
        .map(str::trim)
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_chinese() {
        let tokens = tokenize("我喜欢编程和人工智能");
        assert!(tokens.iter().any(|t| t.contains("编程") || t.contains("智能")));
        assert!(tokens.iter().all(|t| !t.trim().is_empty()));
    }

    #[test]
    fn test_tokenize_english() {
        let tokens = tokenize("Inflation is 5%, target year: 2040.");
        assert_eq!(tokens, vec!["inflation", "is", "5", "target", "year", "2040"]);
    }

    #[test]
    fn test_tokenize_keeps_single_letters() {
        assert_eq!(tokenize("A B c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_tokenize_mixed_drops_punctuation() {
        let tokens = tokenize("Rust 编程，好！");
        assert!(tokens.contains(&"rust".to_string()));
        assert!(!tokens.iter().any(|t| t == "，" || t == "！"));
    }

    #[test]
    fn test_tokenize_empty() {
        assert!(tokenize("   ").is_empty());
        assert!(tokenize("").is_empty());
    }
}
