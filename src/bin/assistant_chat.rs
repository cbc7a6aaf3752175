//! assistant-chat: 交互式对话命令行，演示去重缓存核心。
//!
//! Usage:
//!   assistant-chat [--config <path>] [--session <id>]
//!
//! Reads one prompt per line from stdin and prints the reply. `--session`
//! resumes the session with that id, creating it if needed. Lines starting
//! with `/` are commands:
//!   /new        start a fresh session
//!   /history    print the current session
//!   /stats      print cache statistics

use anyhow::Context;
use assistant_core::telemetry::TracingMetricsSink;
use assistant_core::{AssistantConfig, InMemorySessionStore, ModelParams, Orchestrator, SessionId};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

fn print_usage() {
    println!(
        r#"assistant-chat: 交互式对话命令行

USAGE:
    assistant-chat [--config <path>] [--session <id>]

ENVIRONMENT:
    ASSISTANT_CONFIG            Config file path (when --config is not given)
    ASSISTANT_API_KEY           Provider bearer token
    ASSISTANT_*                 Per-field config overrides
    RUST_LOG                    Log filter (default: info)"#
    );
}

struct Args {
    config: Option<String>,
    session: Option<String>,
}

fn parse_args() -> anyhow::Result<Option<Args>> {
    let mut args = Args {
        config: std::env::var("ASSISTANT_CONFIG").ok(),
        session: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                args.config = Some(iter.next().context("--config needs a path")?);
            }
            "--session" | "-s" => {
                args.session = Some(iter.next().context("--session needs an id")?);
            }
            "help" | "--help" | "-h" => {
                print_usage();
                return Ok(None);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(Some(args))
}

fn build_orchestrator(config: AssistantConfig) -> anyhow::Result<Orchestrator> {
    let orchestrator = Orchestrator::builder()
        .with_store(Arc::new(InMemorySessionStore::new()))
        .with_config(config)
        .with_metrics(Arc::new(TracingMetricsSink))
        .build()?;
    Ok(orchestrator)
}

/// Resume (or create) the session named on the command line.
async fn open_session(
    orchestrator: &Orchestrator,
    id: Option<String>,
) -> anyhow::Result<Option<SessionId>> {
    let Some(id) = id else {
        return Ok(None);
    };
    let opened = orchestrator
        .open_session(&SessionId::new(id))
        .await
        .context("opening session")?;
    println!("session {} ({} turns)", opened.id, opened.turns.len());
    Ok(Some(opened.id))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(args) = parse_args()? else {
        return Ok(());
    };

    let mut config = match args.config {
        Some(ref path) => AssistantConfig::from_file(path)
            .await
            .with_context(|| format!("loading {path}"))?,
        None => AssistantConfig::default(),
    };
    config.apply_env_overrides()?;

    let orchestrator = build_orchestrator(config)?;
    let mut session = open_session(&orchestrator, args.session).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "/new" => match orchestrator.start_session().await {
                Ok(id) => {
                    println!("session {id}");
                    session = Some(id);
                }
                Err(e) => eprintln!("error: {e}"),
            },
            "/history" => match session {
                Some(ref id) => match orchestrator.history(id).await {
                    Ok(history) => {
                        for turn in &history.turns {
                            println!("> {}\n{}", turn.prompt, turn.completion);
                        }
                    }
                    Err(e) => eprintln!("error: {e}"),
                },
                None => println!("no session yet"),
            },
            "/stats" => {
                let stats = orchestrator.stats();
                println!(
                    "hits={} joins={} misses={} entries={} weight={} hit_ratio={:.2}",
                    stats.hits,
                    stats.joins,
                    stats.misses,
                    stats.entries,
                    stats.total_weight,
                    stats.hit_ratio()
                );
            }
            prompt => {
                match orchestrator
                    .handle_or_create(session.clone(), prompt, ModelParams::new())
                    .await
                {
                    Ok(reply) => {
                        session = Some(reply.session_id.clone());
                        println!("{}", reply.text());
                        if !reply.anonymized.is_empty() {
                            eprintln!("({} value(s) anonymized)", reply.anonymized.len());
                        }
                        if reply.is_degraded() {
                            eprintln!("(warning: turn not saved)");
                        }
                    }
                    Err(e) => eprintln!("error: {e}"),
                }
            }
        }
    }

    orchestrator.shutdown();
    Ok(())
}
