//! Pathfinder - 命令行入口
//!
//! 加载配置与 JSON 内容图，构建分档 LLM 注册表，运行一次探索并打印结果与终审结论。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::error::ErrorKind;
use clap::Parser;

use pathfinder::config::load_config;
use pathfinder::explore::{ExplorationMode, ExplorationOutcome, ExploreOptions, Orchestrator, PromptSet};
use pathfinder::findings::{FindingsStore, JsonFileFindings};
use pathfinder::graph::{InMemoryGraph, RetryingContentProvider};
use pathfinder::llm::ClientRegistry;

#[derive(Parser, Debug)]
#[command(name = "pathfinder")]
#[command(about = "Explore a topic graph for multi-hop risk / opportunity findings", long_about = None)]
#[command(version)]
struct Cli {
    /// Target topic id (ignored when --strategy is given)
    topic: Option<String>,

    /// risk or opportunity
    #[arg(default_value = "risk")]
    mode: ExplorationMode,

    /// JSON content graph (overrides content.graph_path)
    #[arg(long)]
    graph: Option<PathBuf>,

    /// Explore for a strategy, starting from its first mapped topic
    #[arg(long)]
    strategy: Option<String>,

    #[arg(long)]
    max_steps: Option<u32>,

    /// Explore only; no final critic, nothing saved
    #[arg(long)]
    skip_critic: bool,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,

    /// Extra TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Findings directory (overrides findings.root)
    #[arg(long)]
    findings_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = match Cli::try_parse() {
        Ok(c) => c,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    pathfinder::observability::init();

    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;

    let graph_path = cli
        .graph
        .clone()
        .or_else(|| cfg.content.graph_path.clone())
        .context("No content graph given: pass --graph or set content.graph_path")?;
    let graph = InMemoryGraph::load(&graph_path)?;
    let content = Arc::new(RetryingContentProvider::new(Arc::new(graph), cfg.content_retry()));

    let findings_root = cli.findings_dir.clone().unwrap_or_else(|| cfg.findings.root.clone());
    let findings = Arc::new(FindingsStore::new(Arc::new(JsonFileFindings::new(findings_root))));

    let registry = ClientRegistry::from_config(&cfg);
    let prompts = PromptSet::load(cfg.app.prompts_dir.as_deref());
    let orchestrator = Orchestrator::new(&registry, content, findings, cfg.exploration.clone(), prompts);

    let opts = ExploreOptions {
        max_steps: cli.max_steps,
        skip_critic: cli.skip_critic,
    };
    let outcome = match (&cli.strategy, &cli.topic) {
        (Some(strategy), _) => orchestrator.explore_strategy(strategy, cli.mode, &opts).await,
        (None, Some(topic)) => orchestrator.explore(topic, cli.mode, &opts).await,
        (None, None) => bail!("A TOPIC or --strategy is required"),
    };

    let (prompt_tokens, completion_tokens, total_tokens) = registry.token_usage();
    tracing::info!(prompt_tokens, completion_tokens, total_tokens, "token usage");

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_summary(&outcome);
    }
    Ok(())
}

fn print_summary(outcome: &ExplorationOutcome) {
    let r = &outcome.result;
    println!("Target:    {} ({})", r.target_id, r.mode);
    if let Some(s) = &r.strategy_id {
        println!("Strategy:  {}", s);
    }
    println!("Success:   {} after {} steps", r.success, r.steps_taken);
    if let Some(e) = &r.error {
        println!("Error:     {}", e);
    }
    println!("\n{}\n", r.headline);
    if !r.flow_path.is_empty() {
        println!("Flow:      {}", r.flow_path);
    }
    println!("{}\n", r.rationale);
    println!("Evidence ({}):", r.evidence.len());
    for e in &r.evidence {
        println!("  [{}] {}", e.source_id, e.excerpt);
    }

    match &outcome.verdict {
        None => println!("\nVerdict:   not reviewed"),
        Some(v) if v.accepted => {
            println!("\nVerdict:   accepted (confidence {:.2})", v.confidence);
            if let Some(slot) = v.replaces {
                println!("Replaces:  slot {}", slot);
            }
        }
        Some(v) => {
            println!("\nVerdict:   rejected");
            for reason in &v.rejection_reasons {
                println!("  - {}", reason);
            }
        }
    }
    if outcome.retried {
        println!("Retried:   yes");
    }
    if let Some(id) = &outcome.saved_finding_id {
        println!("Saved as:  {}", id);
    }
    if let Some(e) = &outcome.save_error {
        println!("Save failed: {}", e);
    }
}
