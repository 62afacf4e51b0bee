//! `saga`: plan a story from a premise, then generate it episode by episode.
//!
//! ```bash
//! saga --premise "A detective in a rain-soaked city" --episodes 3
//! ```
//!
//! A failed plan leaves the session idle; `plan <premise>` retries it.

mod repl;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use saga_core::SagaConfig;
use saga_core::config::LogFormat;
use saga_llm::PromptEngine;
use saga_story::bootstrap;
use saga_story::{PipelineSettings, StoryPipeline};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::repl::Command;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Story premise; without one, start idle and use `plan <premise>`
    #[arg(short, long)]
    premise: Option<String>,

    /// Number of episodes to plan (defaults to `story.default_episode_count`)
    #[arg(short, long)]
    episodes: Option<u32>,

    /// Path to a TOML configuration file
    #[arg(short, long, env = "SAGA_CONFIG")]
    config: Option<PathBuf>,

    /// Override `memory.data_dir`
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory of prompt template overrides
    #[arg(long)]
    prompts: Option<PathBuf>,
}

fn init_tracing(config: &SagaConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.general.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn load_config(args: &Args) -> anyhow::Result<SagaConfig> {
    let mut config = match &args.config {
        Some(path) => SagaConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SagaConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.memory.data_dir.clone_from(dir);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config);

    let client = Arc::new(bootstrap::build_client(&config.llm)?);
    let store = bootstrap::open_store(&config, client.clone())?;
    info!(
        data_dir = %config.memory.data_dir.display(),
        characters = store.character_count(),
        plots = store.plot_count(),
        "Memory store opened"
    );

    let prompts = match &args.prompts {
        Some(dir) => PromptEngine::from_directory(dir)?,
        None => PromptEngine::builtin(),
    };
    let mut pipeline = StoryPipeline::new(
        client.clone(),
        store,
        prompts,
        PipelineSettings::from_config(&config),
    );

    let episodes = args.episodes.unwrap_or(config.story.default_episode_count);
    if let Some(premise) = &args.premise {
        if let Err(e) = repl::plan(&mut pipeline, premise, episodes).await {
            error!(error = %e, "Planning failed");
            println!("[error] {e:#}\nStill idle; try `plan <premise>` again.");
        }
    }
    println!("{}", repl::HELP);

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("saga> ");
        io::stdout().flush()?;
        let Some(line) = lines.next().transpose()? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        match repl::execute(&mut pipeline, command, episodes).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                error!(error = %e, "Command failed");
                println!("[error] {e:#}");
            }
        }
    }

    let usage = client.usage();
    info!(
        calls = usage.calls,
        failures = usage.failures,
        tokens = usage.tokens_generated,
        "Session finished"
    );
    pipeline.close()?;
    Ok(())
}
