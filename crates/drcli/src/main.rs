//! Derby CLI - race Lua agent scripts and report measurements.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use derbyconf::DerbyConfig;
use derbyproto::{AgentConfig, RaceResult, RunMode};
use jockey::{LuaScriptHost, RaceRuntime, SandboxConfig};
use paddock::Coordinator;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Derby - race agent scripts against each other
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (replaces ./derby.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a race: one agent per script file
    Run {
        /// Lua script files, one agent each
        #[arg(required = true)]
        scripts: Vec<PathBuf>,

        /// parallel (barrier-synchronized) or sequential
        #[arg(short, long, default_value = "parallel")]
        mode: RunMode,

        /// JSON object passed to every script's main(params)
        #[arg(long, default_value = "{}")]
        params: String,

        /// Emit machine-readable JSON instead of the text report
        #[arg(long)]
        json: bool,
    },

    /// Syntax-check a script without running it
    Check {
        script: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("DERBY_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = DerbyConfig::load_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Run {
            scripts,
            mode,
            params,
            json,
        } => run_race(&config, &scripts, mode, &params, json).await,
        Commands::Check { script } => check_script(&config, &script),
    }
}

async fn run_race(
    config: &DerbyConfig,
    scripts: &[PathBuf],
    mode: RunMode,
    params: &str,
    json: bool,
) -> Result<()> {
    let params: serde_json::Value =
        serde_json::from_str(params).context("--params must be a JSON object")?;

    let agents = load_agents(scripts, &params)?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let host = Arc::new(LuaScriptHost::new(SandboxConfig {
        timeout: Duration::from_secs(config.script.timeout_secs),
    }));
    let coordinator = Coordinator::new(&config.sync);

    let (results, _state) = coordinator.run(host, &agents, mode, cancel).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_report(&results);
    }

    // Partial failures still exit zero; only a fully failed run errors.
    if !results.is_empty() && results.iter().all(|r| r.error.is_some()) {
        anyhow::bail!("every agent failed");
    }
    Ok(())
}

fn check_script(config: &DerbyConfig, script: &PathBuf) -> Result<()> {
    let source = std::fs::read_to_string(script)
        .with_context(|| format!("Failed to read {}", script.display()))?;

    let runtime = RaceRuntime::new(SandboxConfig {
        timeout: Duration::from_secs(config.script.timeout_secs),
    });
    runtime.check(&source)?;

    println!("{}: ok", script.display());
    Ok(())
}

/// One agent per script file; the agent id is the file stem, made unique
/// with a numeric suffix when the same stem appears twice.
fn load_agents(scripts: &[PathBuf], params: &serde_json::Value) -> Result<Vec<AgentConfig>> {
    let mut seen = HashSet::new();
    let mut agents = Vec::with_capacity(scripts.len());

    for path in scripts {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "agent".to_string());
        let mut id = stem.clone();
        let mut n = 2;
        while !seen.insert(id.clone()) {
            id = format!("{stem}-{n}");
            n += 1;
        }

        let mut agent = AgentConfig::new(id, source);
        agent.params = params.clone();
        agents.push(agent);
    }

    Ok(agents)
}

/// SIGINT/SIGTERM cancel the run: barriers release, sessions unwind, and
/// whatever was collected so far still comes back as partial results.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    cancel.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("SIGINT received, cancelling run");
                }
                _ = sigterm.recv() => {
                    tracing::info!("SIGTERM received, cancelling run");
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("ctrl-c received, cancelling run");
        }
        cancel.cancel();
    });
}

fn print_report(results: &[RaceResult]) {
    // Rank by first-measurement duration; errored or measurement-less
    // agents sort last.
    let mut ranked: Vec<&RaceResult> = results.iter().collect();
    ranked.sort_by(|a, b| {
        let key = |r: &RaceResult| {
            r.measurements
                .first()
                .map(|m| m.duration)
                .unwrap_or(f64::INFINITY)
        };
        key(a).total_cmp(&key(b))
    });

    println!("agents: {}", results.len());
    for (rank, result) in ranked.iter().enumerate() {
        match result.measurements.first() {
            Some(first) => println!(
                "  #{} {} - {:.3}s ({} measurement{}, {} segment{})",
                rank + 1,
                result.id,
                first.duration,
                result.measurements.len(),
                plural(result.measurements.len()),
                result.segments.len(),
                plural(result.segments.len()),
            ),
            None => println!("  #{} {} - no measurements", rank + 1, result.id),
        }
        for m in &result.measurements {
            println!("       {}: {:.3}s", m.name, m.duration);
        }
        for s in &result.segments {
            println!("       segment {:.3}s..{:.3}s", s.start, s.end);
        }
        for msg in &result.messages {
            println!("       note: {msg}");
        }
        if let Some(error) = &result.error {
            println!("       error: {error}");
        }
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
