//! Interactive commands. Episode numbers typed by the user are 1-based.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, bail};
use saga_core::EpisodeIndex;
use saga_story::{EpisodeArtifact, StoryPipeline};

pub const HELP: &str = "\
Commands:
  plan <premise>       draft a plan (only while idle)
  next                 generate the next episode
  regen <n>            generate episode n again
  show <n>             print the latest script of episode n
  critique <n>         print the latest critique of episode n
  save <n> [path]      write the script of episode n to a file
  memory               list characters and open plot threads
  status               show pipeline state
  reset                drop the plan and episodes, keep memory
  help                 this text
  quit                 flush memory and exit";

/// One parsed REPL line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Plan(String),
    Next,
    Regen(EpisodeIndex),
    Show(EpisodeIndex),
    Critique(EpisodeIndex),
    Save(EpisodeIndex, Option<PathBuf>),
    Memory,
    Status,
    Reset,
    Help,
    Quit,
}

fn episode_arg(arg: Option<&str>) -> anyhow::Result<EpisodeIndex> {
    let raw = arg.context("missing episode number")?;
    let n: EpisodeIndex = raw
        .parse()
        .with_context(|| format!("not an episode number: {raw}"))?;
    if n == 0 {
        bail!("episodes are numbered from 1");
    }
    Ok(n - 1)
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> anyhow::Result<Self> {
        let line = line.trim();
        if let Some((verb, premise)) = line.split_once(char::is_whitespace) {
            if verb.eq_ignore_ascii_case("plan") {
                return Ok(Self::Plan(premise.trim().to_string()));
            }
        }
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            bail!("empty command");
        };
        let command = match verb.to_ascii_lowercase().as_str() {
            "plan" => bail!("missing premise: plan <premise>"),
            "next" | "n" => Self::Next,
            "regen" => Self::Regen(episode_arg(words.next())?),
            "show" => Self::Show(episode_arg(words.next())?),
            "critique" => Self::Critique(episode_arg(words.next())?),
            "save" => {
                let index = episode_arg(words.next())?;
                Self::Save(index, words.next().map(PathBuf::from))
            }
            "memory" | "mem" => Self::Memory,
            "status" => Self::Status,
            "reset" => Self::Reset,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => bail!("unknown command `{other}`; type `help`"),
        };
        if let Some(extra) = words.next() {
            bail!("unexpected argument `{extra}`");
        }
        Ok(command)
    }
}

fn artifact(pipeline: &StoryPipeline, index: EpisodeIndex) -> anyhow::Result<&EpisodeArtifact> {
    pipeline
        .latest_artifact(index)
        .with_context(|| format!("episode {} has not been generated", index + 1))
}

/// Describe where the pipeline stands.
pub fn status(pipeline: &StoryPipeline) -> String {
    let mut out = String::new();
    if let Some(plan) = pipeline.plan_ref() {
        let _ = writeln!(out, "{} ({} episodes)", plan.title, plan.episode_count());
    }
    let _ = write!(
        out,
        "state: {}; artifacts: {}; characters: {}; plot points: {}",
        pipeline.state(),
        pipeline.artifacts().len(),
        pipeline.store().character_count(),
        pipeline.store().plot_count(),
    );
    out
}

/// Characters with recent states, then open plot threads.
pub fn memory(pipeline: &StoryPipeline) -> String {
    let store = pipeline.store();
    let mut out = String::from("Characters:\n");
    out.push_str(&store.character_summaries());
    out.push_str("Open plot threads:\n");
    for plot in store.active_plots() {
        let _ = writeln!(out, "  {} {} (since {})", plot.id, plot.description, plot.origin);
    }
    out
}

/// Draft a plan and print its outline.
pub async fn plan(pipeline: &mut StoryPipeline, premise: &str, episodes: u32) -> anyhow::Result<()> {
    let plan = pipeline.plan(premise, episodes).await?;
    println!("{}", plan.outline());
    Ok(())
}

/// Run one command. Returns `false` when the session should end.
pub async fn execute(
    pipeline: &mut StoryPipeline,
    command: Command,
    episodes: u32,
) -> anyhow::Result<bool> {
    match command {
        Command::Plan(premise) => plan(pipeline, &premise, episodes).await?,
        Command::Next => {
            let artifact = pipeline.advance().await?;
            println!("{}", artifact.script);
            println!("\n--- Critique ---\n{}", artifact.critique);
            println!("\n[{}]", pipeline.state());
        }
        Command::Regen(index) => {
            let artifact = pipeline.regenerate(index).await?;
            println!("{}", artifact.script);
        }
        Command::Show(index) => println!("{}", artifact(pipeline, index)?.script),
        Command::Critique(index) => println!("{}", artifact(pipeline, index)?.critique),
        Command::Save(index, path) => {
            let artifact = artifact(pipeline, index)?;
            let path = path.unwrap_or_else(|| PathBuf::from(artifact.default_filename()));
            save(artifact, &path)?;
            println!("Saved episode {} to {}", index + 1, path.display());
        }
        Command::Memory => print!("{}", memory(pipeline)),
        Command::Status => println!("{}", status(pipeline)),
        Command::Reset => {
            pipeline.reset();
            println!("Plan and episodes dropped; memory kept. Use `plan <premise>` to start again.");
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

fn save(artifact: &EpisodeArtifact, path: &Path) -> anyhow::Result<()> {
    artifact
        .export_script(path)
        .with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_one_based_episode_numbers() {
        assert_eq!("regen 2".parse::<Command>().expect("regen"), Command::Regen(1));
        assert_eq!("SHOW 1".parse::<Command>().expect("show"), Command::Show(0));
        assert_eq!(
            "save 3 out/three.txt".parse::<Command>().expect("save"),
            Command::Save(2, Some(PathBuf::from("out/three.txt")))
        );
        assert_eq!("save 3".parse::<Command>().expect("save"), Command::Save(2, None));
    }

    #[test]
    fn plan_takes_the_rest_of_the_line() {
        assert_eq!(
            "plan  A detective in a rain-soaked city ".parse::<Command>().expect("plan"),
            Command::Plan("A detective in a rain-soaked city".into())
        );
        assert_eq!("Reset".parse::<Command>().expect("reset"), Command::Reset);
        assert!("plan".parse::<Command>().is_err());
        assert!("plan   ".parse::<Command>().is_err());
        assert!("reset now".parse::<Command>().is_err());
    }

    #[test]
    fn rejects_bad_input() {
        assert!("show 0".parse::<Command>().is_err());
        assert!("show".parse::<Command>().is_err());
        assert!("show two".parse::<Command>().is_err());
        assert!("next please".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
        assert!("   ".parse::<Command>().is_err());
    }
}
