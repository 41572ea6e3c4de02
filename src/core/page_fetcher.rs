//! 网页抓取：供 IngestWorker 处理 URL 任务
//!
//! `PageFetcher` 只负责取回页面正文；HTML → 纯文本由 `html_to_text` 完成，之后与普通文档走同一条写入路径。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::core::AgentError;

const USER_AGENT: &str = concat!("nectar/", env!("CARGO_PKG_VERSION"));

/// 渲染宽度（html2text 按此折行）
const TEXT_WIDTH: usize = 120;

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// 取回页面原始内容；网络错误或非 2xx 状态返回 FetchFailed
    async fn fetch(&self, url: &str) -> Result<String, AgentError>;
}

/// 基于 reqwest 的 HTTP 抓取
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AgentError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AgentError::FetchFailed(format!("{url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(AgentError::FetchFailed(format!("{url}: HTTP {}", resp.status())));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| AgentError::FetchFailed(format!("{url}: read body: {e}")))?;
        Ok(body.trim_start_matches('\u{FEFF}').to_string())
    }
}

/// HTML 转纯文本；转换失败或结果为空时退回简单去标签
pub fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), TEXT_WIDTH) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => strip_tags(html),
    }
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
