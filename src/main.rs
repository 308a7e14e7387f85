use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use crossbeam_channel::Sender;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hatch::compiler::{build_scope, Compiler};
use hatch::input::{parse_line, EventPump, InputEvent, Viewport};
use hatch::{ArchiveAssets, Environment, ProjectJson, RuntimeConfig, StopMode};

#[derive(Parser)]
#[command(name = "hatch", version, about = "Runs block-based visual scripting projects")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a project, fire the program-start hats and feed stdin input to it.
    Run(RunArgs),
    /// Print every target's compiled scripts.
    DumpBlocks {
        /// Path to a `.sb3` project archive.
        project: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Path to a `.sb3` project archive.
    project: PathBuf,
    /// Pause after every executed block, in milliseconds.
    #[arg(long)]
    step_delay_ms: Option<u64>,
    /// Input polling rate.
    #[arg(long)]
    frame_rate: Option<u32>,
    #[arg(long, value_enum)]
    stop_mode: Option<StopArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum StopArg {
    Process,
    Scoped,
}

impl From<StopArg> for StopMode {
    fn from(arg: StopArg) -> Self {
        match arg {
            StopArg::Process => StopMode::Process,
            StopArg::Scoped => StopMode::Scoped,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Run(args) => run(args),
        Command::DumpBlocks { project } => dump_blocks(&project),
    }
}

fn open_project(path: &Path) -> Result<(ArchiveAssets, ProjectJson)> {
    let assets = ArchiveAssets::open_path(path)
        .with_context(|| format!("failed to open project archive {}", path.display()))?;
    let project = ProjectJson::load(&assets)
        .with_context(|| format!("failed to read project.json from {}", path.display()))?;
    Ok((assets, project))
}

fn run(args: RunArgs) -> Result<()> {
    let mut config = RuntimeConfig::load();
    if let Some(ms) = args.step_delay_ms {
        config.step_delay = Duration::from_millis(ms);
    }
    if let Some(hz) = args.frame_rate {
        config.frame_rate_hz = hz.max(1);
    }
    if let Some(mode) = args.stop_mode {
        config.stop_mode = mode.into();
    }

    let (assets, project) = open_project(&args.project)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the tokio runtime")?;

    runtime.block_on(async move {
        let env = Environment::load(&project, &assets, config)
            .with_context(|| format!("failed to load {}", args.project.display()))?;
        info!(
            "[Hatch] Running {} ({} sprites)",
            args.project.display(),
            env.sprites().len()
        );

        let (sender, pump) = EventPump::channel(Viewport::default());
        spawn_stdin_reader(sender);
        env.fire_program_start();
        pump_until_quit(&env, &pump).await;
        info!("[Hatch] Shutting down");
        Ok(())
    })
}

async fn pump_until_quit(env: &Arc<Environment>, pump: &EventPump) {
    let mut ticker = tokio::time::interval(env.config().frame_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if pump.drain(env).quit {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}

/// Reads input commands from stdin on a plain thread; EOF ends the reader but
/// not the program.
fn spawn_stdin_reader(sender: Sender<InputEvent>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(&line) {
                Ok(event) => {
                    if sender.send(event).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("[Hatch input] {e}"),
            }
        }
    });
}

fn dump_blocks(path: &Path) -> Result<()> {
    let (_, project) = open_project(path)?;
    let stage = project.stage()?;
    let shared = Arc::new(build_scope(stage, None)?);

    let mut targets = vec![stage];
    targets.extend(project.sprites());
    for target in targets {
        let scope = if target.is_stage {
            shared.clone()
        } else {
            Arc::new(build_scope(target, Some(shared.clone()))?)
        };
        let hats = Compiler::new(target, &scope)
            .hats()
            .with_context(|| format!("failed to compile '{}'", target.name))?;
        println!("== {} ({} scripts)", target.name, hats.len());
        for (script, hat) in hats {
            println!("-- when {hat}");
            print!("{script}");
        }
    }
    Ok(())
}
