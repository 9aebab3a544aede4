//! Specimen tracker (specimen) - command-line entry point
//!
//! Operator tool over the tracker core: manage projects, samples, methods
//! and stages, register and confirm uploads, search samples and run the
//! sweepers from a scheduler.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use specimen_common::config::{TomlConfig, TrackerConfig};
use specimen_common::db::{FileStatus, Project};
use specimen_common::slug::split_resource_ref;
use specimen_tracker::{FileFilter, Lookup, NewStage, Tracker};
use tracing::info;
use tracing_subscriber::{
    layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

/// Command-line arguments for specimen
#[derive(Parser, Debug)]
#[command(name = "specimen")]
#[command(about = "Track samples, their processing stages and uploaded files")]
#[command(version)]
struct Args {
    /// Root folder holding the database and the file store
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    /// Config file (default: platform config locations)
    #[arg(short, long, global = true, env = "SPECIMEN_CONFIG")]
    config: Option<PathBuf>,

    /// Log level for the tracker crates (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the directories and the database
    Init,
    #[command(subcommand)]
    Project(ProjectCommand),
    #[command(subcommand)]
    Sample(SampleCommand),
    #[command(subcommand)]
    Method(MethodCommand),
    #[command(subcommand)]
    Stage(StageCommand),
    #[command(subcommand)]
    File(FileCommand),
    /// Samples of a project matching every token
    Search {
        /// Project external id, reference or name
        project: String,
        tokens: Vec<String>,
    },
    /// Run one sweeper pass (staged, archived)
    Sweep { name: String },
}

#[derive(Subcommand, Debug)]
enum ProjectCommand {
    Add {
        name: String,
        #[arg(long, default_value = "")]
        sample_mask: String,
    },
    List,
}

#[derive(Subcommand, Debug)]
enum SampleCommand {
    Add { project: String, name: String },
    List { project: String },
}

#[derive(Subcommand, Debug)]
enum MethodCommand {
    Add {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    List,
}

#[derive(Subcommand, Debug)]
enum StageCommand {
    /// Stages of a sample and the token for the next append
    List { sample: String },
    /// Append a stage; fails if the token is stale
    Append {
        sample: String,
        method: String,
        #[arg(long)]
        token: String,
        #[arg(long, default_value = "")]
        annotation: String,
        #[arg(long)]
        alt_id: Option<i64>,
    },
}

#[derive(Subcommand, Debug)]
enum FileCommand {
    /// Record an upload (path relative to the upload area)
    Register {
        stage: String,
        path: String,
        /// Bytes still to be confirmed with `file confirm`
        #[arg(long)]
        prepared: bool,
    },
    /// Validate a prepared upload's checksum and stage it
    Confirm {
        file: String,
        checksum: String,
        #[arg(long, default_value = "sha256")]
        method: String,
    },
    List {
        #[arg(long)]
        stage: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing before the config is read so its loading is logged;
    // stdout carries the command's JSON output
    let from_env = EnvFilter::try_from_default_env().ok();
    let env_controlled = from_env.is_some();
    let initial_level = args.log_level.as_deref().unwrap_or("info");
    let (filter, filter_handle) = reload::Layer::new(
        from_env.unwrap_or_else(|| default_filter(initial_level).into()),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let toml = TomlConfig::load(args.config.as_deref()).context("Failed to load config file")?;
    let mut config = TrackerConfig::resolve(args.root_folder.as_deref(), toml);
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    // The config file may pick a different level than the one we started with
    if !env_controlled && config.log_level != initial_level {
        apply_log_level(&filter_handle, &config.log_level)?;
    }

    info!("Root folder: {}", config.root_folder.display());

    let tracker = Tracker::open(config)
        .await
        .context("Failed to open tracker")?;

    let output = run(&tracker, args.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

/// Execute one command; the result is what gets printed
async fn run(tracker: &Tracker, command: Command) -> Result<Value> {
    match command {
        Command::Init => to_json(tracker.config().database_path.display().to_string()),
        Command::Project(ProjectCommand::Add { name, sample_mask }) => {
            to_json(tracker.store().add_project(&name, &sample_mask).await?)
        }
        Command::Project(ProjectCommand::List) => to_json(tracker.store().list_projects().await?),
        Command::Sample(SampleCommand::Add { project, name }) => {
            let project = resolve_project(tracker, &project).await?;
            let sample = tracker
                .store()
                .add_sample(Lookup::External(&project.identity.external_id), &name)
                .await?;
            to_json(sample)
        }
        Command::Sample(SampleCommand::List { project }) => {
            let project = resolve_project(tracker, &project).await?;
            let samples = tracker
                .store()
                .list_samples(Lookup::External(&project.identity.external_id))
                .await?;
            to_json(samples)
        }
        Command::Method(MethodCommand::Add { name, description }) => {
            to_json(tracker.store().add_method(&name, &description).await?)
        }
        Command::Method(MethodCommand::List) => to_json(tracker.store().list_methods().await?),
        Command::Stage(StageCommand::List { sample }) => {
            to_json(tracker.list_stages(split_resource_ref(&sample)).await?)
        }
        Command::Stage(StageCommand::Append {
            sample,
            method,
            token,
            annotation,
            alt_id,
        }) => {
            let stage = tracker
                .append_stage(NewStage {
                    sample: split_resource_ref(&sample),
                    method: split_resource_ref(&method),
                    annotation: &annotation,
                    token: &token,
                    alt_id,
                })
                .await?;
            to_json(stage)
        }
        Command::File(FileCommand::Register {
            stage,
            path,
            prepared,
        }) => {
            let initial = if prepared {
                FileStatus::Prepared
            } else {
                FileStatus::Staged
            };
            let file = tracker
                .files()
                .register_file(split_resource_ref(&stage), &path, initial)
                .await?;
            to_json(file)
        }
        Command::File(FileCommand::Confirm {
            file,
            checksum,
            method,
        }) => {
            let file = tracker
                .files()
                .confirm_upload(split_resource_ref(&file), &method, &checksum)
                .await?;
            to_json(file)
        }
        Command::File(FileCommand::List { stage, status }) => {
            let status = status.as_deref().map(str::parse::<FileStatus>).transpose()?;
            let files = tracker
                .store()
                .list_files(FileFilter {
                    stage: stage.as_deref().map(split_resource_ref),
                    status,
                })
                .await?;
            to_json(files)
        }
        Command::Search { project, tokens } => {
            let project = resolve_project(tracker, &project).await?;
            let samples = tracker
                .resolver()
                .resolve_samples(Lookup::External(&project.identity.external_id), &tokens)
                .await?;
            to_json(samples)
        }
        Command::Sweep { name } => {
            // Item failures are in the report; only a failed pass is an error
            let report = tracker
                .sweep(&name)
                .await
                .with_context(|| format!("Sweeper {} failed", name))?;
            to_json(report)
        }
    }
}

/// A project named by external id, `<id>-<name>` reference or plain name
async fn resolve_project(tracker: &Tracker, arg: &str) -> Result<Project> {
    let by_id = tracker
        .store()
        .find_project(Lookup::External(split_resource_ref(arg)))
        .await?;
    match by_id {
        Some(project) => Ok(project),
        None => Ok(tracker.get_project(Lookup::Name(arg)).await?),
    }
}

fn default_filter(level: &str) -> String {
    format!("specimen_tracker={level},specimen_common={level}", level = level)
}

/// Swap the running filter for one at `level`
fn apply_log_level(handle: &reload::Handle<EnvFilter, Registry>, level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(default_filter(level))
        .with_context(|| format!("Invalid log level {}", level))?;
    handle.reload(filter).context("Failed to apply log level")
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
