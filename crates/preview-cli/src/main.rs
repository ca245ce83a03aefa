//! preview — pull request preview environments.
//!
//! Runs once per CI job: deploys (or updates) the preview of one pull
//! request, or removes it when the pull request is closed.
//!
//! # Usage
//!
//! ```text
//! preview deploy --image registry.local/web:abc123 --manifest manifest.yaml
//! preview apply k8s/
//! preview destroy
//! preview status
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use preview_core::PreviewError;

mod commands;
mod settings;

use settings::ConfigArgs;

#[derive(Parser)]
#[command(
    name = "preview",
    about = "Preview environments for pull requests",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text", env = "PREVIEW_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Deploy the pull request's workload from a manifest template.
    ///
    /// The template must contain the `__IMAGE__` placeholder. The workload
    /// is named `<prefix>-<pr>`. A closed pull request is torn down instead.
    Deploy {
        /// Built image reference substituted for `__IMAGE__`.
        #[arg(long, env = "PREVIEW_IMAGE")]
        image: String,
        /// Manifest template file.
        #[arg(short, long, default_value = "manifest.yaml")]
        manifest: PathBuf,
    },
    /// Apply pre-rendered manifests (files or directories of *.yaml/*.yml).
    ///
    /// The workload is the single Deployment among the documents.
    Apply {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Tear the environment down when the pull request is closed,
        /// instead of refusing to run.
        #[arg(long)]
        teardown_on_close: bool,
    },
    /// Remove the pull request's environment and its deployment records.
    Destroy,
    /// List preview workloads and their readiness.
    Status {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Write a preview.toml scaffold.
    Init {
        #[arg(short, long, default_value = "preview.toml")]
        path: PathBuf,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Failed with error {}", describe(&err));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let Cli {
        config: args,
        command,
        ..
    } = cli;

    match command {
        Command::Init { path, force } => commands::init::init(&args, &path, force),
        Command::Deploy { image, manifest } => {
            commands::deploy::deploy(&args.load()?, &manifest, &image).await
        }
        Command::Apply {
            paths,
            teardown_on_close,
        } => commands::apply::apply(&args.load()?, &paths, teardown_on_close).await,
        Command::Destroy => commands::destroy::destroy(&args.load()?).await,
        Command::Status { format } => commands::status::status(&args.load()?, &format).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,preview=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Most specific message for the CI log.
fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<PreviewError>() {
        Some(preview) => preview.user_message(),
        None => format!("{err:#}"),
    }
}
