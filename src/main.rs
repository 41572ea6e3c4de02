//! Nectar 命令行入口
//!
//! - `nectar ingest <path>... [--url <URL>]...`：递归读取文件、抓取网页并写入记忆
//! - `nectar ask <question>`：运行一次 Agent 会话并打印答案
//!
//! `--config <FILE>` 指定配置文件，未指定时读取 `NECTAR_CONFIG` 或 config/default.toml。

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use nectar::{config::load_config, observability, AgentBuilder, AgentRuntime};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(name = "nectar")]
#[command(about = "Retrieval-augmented task agent with vector memory", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件路径
    #[arg(long, global = true, env = "NECTAR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest files (recursively) and web pages into memory.
    Ingest {
        /// Files or directories
        #[arg(required_unless_present = "urls")]
        paths: Vec<PathBuf>,
        /// Web page to fetch and ingest (repeatable)
        #[arg(long = "url", value_name = "URL")]
        urls: Vec<String>,
    },
    /// Run one agent session and print the answer.
    Ask {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    observability::init();

    let cfg = load_config(cli.config).context("Failed to load config")?;
    let runtime = AgentBuilder::new(cfg)
        .build()
        .await
        .context("Failed to create agent runtime")?;

    let result = run(&runtime, cli.command).await;
    runtime.shutdown().await;
    result
}

async fn run(runtime: &AgentRuntime, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Ingest { paths, urls } => {
            let mut total = 0;
            for root in &paths {
                total += ingest_path(runtime, root).await?;
            }
            for url in &urls {
                let n = runtime
                    .ingest_url(url)
                    .await
                    .with_context(|| format!("Failed to ingest {}", url))?;
                tracing::info!(url = %url, chunks = n, "page ingested");
                total += n;
            }
            println!("ingested {} chunks", total);
        }
        Command::Ask { question } => {
            let query = question.join(" ");
            let report = runtime.ask(&query).await;
            let (prompt, completion, total) = runtime.token_usage();
            tracing::info!(prompt, completion, total, steps = report.steps, "token usage");
            println!("{}", report.answer);
        }
    }
    Ok(())
}

async fn ingest_path(runtime: &AgentRuntime, root: &Path) -> anyhow::Result<usize> {
    let mut total = 0;
    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        let url = format!("file://{}", path.display());
        let n = runtime
            .ingest(&text, &url)
            .await
            .with_context(|| format!("Failed to ingest {}", path.display()))?;
        tracing::info!(path = %path.display(), chunks = n, "file ingested");
        total += n;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_config_flag_and_ask() {
        let cli = Cli::try_parse_from(["nectar", "--config", "custom.toml", "ask", "what", "is", "2+2"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        match cli.command {
            Command::Ask { question } => assert_eq!(question.join(" "), "what is 2+2"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_ingest_paths_and_urls() {
        let cli = Cli::try_parse_from([
            "nectar",
            "ingest",
            "docs",
            "--url",
            "https://example.com/a",
            "--config",
            "c.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
        match cli.command {
            Command::Ingest { paths, urls } => {
                assert_eq!(paths, vec![PathBuf::from("docs")]);
                assert_eq!(urls, vec!["https://example.com/a".to_string()]);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let url_only = Cli::try_parse_from(["nectar", "ingest", "--url", "https://example.com"]).unwrap();
        assert!(matches!(url_only.command, Command::Ingest { ref paths, .. } if paths.is_empty()));
    }

    #[test]
    fn test_missing_arguments_rejected() {
        assert!(Cli::try_parse_from(["nectar"]).is_err());
        assert!(Cli::try_parse_from(["nectar", "ingest"]).is_err());
        assert!(Cli::try_parse_from(["nectar", "ask"]).is_err());
        assert!(Cli::try_parse_from(["nectar", "frobnicate"]).is_err());
    }
}
