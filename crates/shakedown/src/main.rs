mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shakedown", version, about = "Debugging utilities for installed web apps")]
struct Args {
    /// Config file (defaults to ./shakedown.yaml, then ~/.shakedown/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the debug log and session databases
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect or append to the debug log
    Logs {
        #[command(subcommand)]
        action: LogsAction,
    },
    /// Inspect the archive of recorded sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
    /// Record a session of this process and archive it
    Record {
        /// How long to record before flushing (Ctrl-C stops early)
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Print a prefilled new-issue URL
    Report {
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Publicly reachable screenshot URL to embed
        #[arg(long)]
        screenshot_url: Option<String>,
        /// Leave the environment block out of the issue body
        #[arg(long)]
        no_metadata: bool,
        /// Target repository as owner/repo (overrides config)
        #[arg(long)]
        repo: Option<String>,
    },
    /// Probe a version manifest for a newer release
    CheckUpdate {
        /// URL of a JSON document of the form {"version": "..."}
        #[arg(long)]
        manifest_url: Option<String>,
    },
}

#[derive(Subcommand)]
enum LogsAction {
    /// Print entries, newest first
    List,
    /// Print all entries as JSON
    Export,
    Count,
    Clear,
    Add {
        #[arg(long, default_value = "app")]
        category: String,
        #[arg(long, default_value = "info")]
        severity: String,
        #[arg(long)]
        message: String,
        /// Arbitrary JSON attached to the entry
        #[arg(long)]
        payload: Option<String>,
    },
}

#[derive(Subcommand)]
enum SessionsAction {
    /// Print a summary line per session, newest first
    List,
    /// Print all sessions as JSON
    Export,
    Count,
    Clear,
    /// Keep only the newest N sessions
    Prune {
        #[arg(long)]
        max: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so exported JSON on stdout stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let ctx = commands::Context::load(args.config.as_deref(), args.data_dir).await?;

    match args.command {
        Command::Logs { action } => match action {
            LogsAction::List => commands::logs_list(&ctx).await,
            LogsAction::Export => commands::logs_export(&ctx).await,
            LogsAction::Count => commands::logs_count(&ctx).await,
            LogsAction::Clear => commands::logs_clear(&ctx).await,
            LogsAction::Add {
                category,
                severity,
                message,
                payload,
            } => commands::logs_add(&ctx, &category, &severity, message, payload.as_deref()).await,
        },
        Command::Sessions { action } => match action {
            SessionsAction::List => commands::sessions_list(&ctx).await,
            SessionsAction::Export => commands::sessions_export(&ctx).await,
            SessionsAction::Count => commands::sessions_count(&ctx).await,
            SessionsAction::Clear => commands::sessions_clear(&ctx).await,
            SessionsAction::Prune { max } => commands::sessions_prune(&ctx, max).await,
        },
        Command::Record { seconds } => commands::record(&ctx, seconds).await,
        Command::Report {
            title,
            description,
            screenshot_url,
            no_metadata,
            repo,
        } => {
            commands::report(
                &ctx,
                commands::ReportArgs {
                    title,
                    description,
                    screenshot_url,
                    no_metadata,
                    repo,
                },
            )
            .await
        }
        Command::CheckUpdate { manifest_url } => {
            commands::check_update(&ctx, manifest_url.as_deref()).await
        }
    }
}
