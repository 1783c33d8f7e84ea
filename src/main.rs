use clap::{Parser, Subcommand};

use callflow::core::{RecordingStatus, Step, StepGraph, Task, TaskStatus};
use callflow::{flog, Config, Result, Store, Version};

/// callflow - conversation flow mapping for voice-agent call recordings
#[derive(Parser, Debug)]
#[command(name = "callflow")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    CALLFLOW_DEBUG=1     Enable debug logging (alternative to --debug)\n\nCONFIG:\n    ~/.callflow/callflow.toml")]
pub struct Cli {
    /// Enable debug logging (writes to the configured log file)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Create an empty product version
    CreateVersion {
        project: String,
        version: String,

        /// Prompt the voice agent runs with
        #[arg(long)]
        prompt: String,

        /// What counts as a successful call
        #[arg(long)]
        criteria: Option<String>,
    },

    /// List every root-to-leaf conversation path
    Paths { project: String, version: String },

    /// Show the step forest with traversal and success counts
    Steps { project: String, version: String },

    /// List recordings and their processing status
    Recordings { project: String, version: String },

    /// List queued and finished tasks
    Tasks,

    /// Write a default config file if none exists
    Init,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load()?;
    if let Err(e) = callflow::log::init(&config.log_path()?, cli.debug) {
        eprintln!("warning: logging disabled: {}", e);
    }
    let store = Store::new(config.data_dir()?);
    flog!("callflow {:?} data_dir={}", cli.command, store.root().display());

    match cli.command {
        Command::Init => {
            let path = Config::config_path()?;
            if path.exists() {
                println!("Config already exists at {}", path.display());
            } else {
                config.save()?;
                println!("Wrote {}", path.display());
            }
        }
        Command::CreateVersion {
            project,
            version,
            prompt,
            criteria,
        } => {
            Version::create(&store, &project, &version, &prompt, criteria.as_deref())?;
            println!("Created {}/{}", project, version);
        }
        Command::Paths { project, version } => {
            let version = Version::load(&store, &project, &version)?;
            let paths = version.paths();
            if paths.is_empty() {
                println!("No steps recorded yet");
            }
            for path in paths {
                println!("{}", path);
            }
        }
        Command::Steps { project, version } => {
            let version = Version::load(&store, &project, &version)?;
            for line in render_forest(version.graph()) {
                println!("{}", line);
            }
        }
        Command::Recordings { project, version } => {
            let version = Version::load(&store, &project, &version)?;
            for recording in version.recordings() {
                let success = match recording.success {
                    Some(true) => "yes",
                    Some(false) => "no",
                    None => "-",
                };
                println!(
                    "{}  {:<10}  success={:<3}  steps={:<2}  {}",
                    recording.id.short(),
                    format_recording_status(recording.status),
                    success,
                    recording.step_ids.len(),
                    recording.source_name
                );
                if let Some(error) = &recording.error {
                    println!("          error: {}", error);
                }
            }
        }
        Command::Tasks => {
            let mut tasks: Vec<Task> = store.read_files(&store.tasks_dir())?;
            tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            for task in tasks {
                println!(
                    "{}  {:<18}  {}  {}",
                    task.id.short(),
                    task.task_type,
                    task.created_at.format("%Y-%m-%d %H:%M:%S"),
                    format_task_status(&task.status)
                );
            }
        }
    }
    Ok(())
}

fn format_recording_status(status: RecordingStatus) -> String {
    match status {
        RecordingStatus::Completed => format!("\x1b[32m{}\x1b[0m", status),
        RecordingStatus::Failed => format!("\x1b[31m{}\x1b[0m", status),
        RecordingStatus::Processing => format!("\x1b[33m{}\x1b[0m", status),
    }
}

fn format_task_status(status: &TaskStatus) -> String {
    match status {
        TaskStatus::Completed => format!("\x1b[32m{}\x1b[0m", status),
        TaskStatus::Failed { .. } => format!("\x1b[31m{}\x1b[0m", status),
        TaskStatus::InProgress => format!("\x1b[33m{}\x1b[0m", status),
        TaskStatus::Pending => format!("\x1b[90m{}\x1b[0m", status),
    }
}

/// Indented tree, one line per step.
fn render_forest(graph: &StepGraph) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack: Vec<(&Step, usize)> = graph.roots().into_iter().rev().map(|s| (s, 0)).collect();
    while let Some((step, depth)) = stack.pop() {
        out.push(format!(
            "{}{} (traversals={}, successes={})",
            "  ".repeat(depth),
            step.name,
            step.traversal_count(),
            step.success_count
        ));
        stack.extend(graph.children(&step.id).into_iter().rev().map(|c| (c, depth + 1)));
    }
    out
}
