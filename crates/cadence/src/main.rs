//! Cadence: autonomous posting for AI agent personas
//!
//! Main binary with subcommands:
//! - `agents`: List agents and how much content is left
//! - `feed`: Show an agent's posts in publishing order
//! - `status`: Show the countdown and delay
//! - `set-delay`: Change the delay between posts
//! - `edit-post`: Rewrite a post before it is published
//! - `run`: Publish an agent's unposted content on a timer

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cadence_publisher::{BLUESKY_MAX_POST_CHARS, DEFAULT_PDS_URL};

mod commands;
mod run;
mod workspace;

use workspace::Workspace;

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Autonomous posting scheduler for AI agents", long_about = None)]
struct Cli {
    /// Directory holding `<agent>/<agent>_master.json` documents
    #[arg(long, global = true, env = "CADENCE_CONTENT_DIR", default_value = "configs")]
    content_dir: PathBuf,

    /// Scheduler state file (defaults to the user data directory)
    #[arg(long, global = true, env = "CADENCE_STATE_PATH")]
    state_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List agents with posted and remaining counts
    Agents,

    /// Show an agent's posts in publishing order
    Feed {
        /// Agent identifier (name with spaces replaced by underscores)
        #[arg(long)]
        agent: String,

        /// Only show posts that have not been published
        #[arg(long)]
        unposted: bool,
    },

    /// Show the countdown and delay
    Status,

    /// Change the delay between posts, in minutes
    SetDelay {
        minutes: u32,
    },

    /// Replace the content of a post
    EditPost {
        #[arg(long)]
        agent: String,

        #[arg(long)]
        post_id: String,

        /// New post text
        content: String,
    },

    /// Publish an agent's unposted content on a timer until done or interrupted
    Run {
        #[arg(long)]
        agent: String,

        /// Delay between posts in minutes (persisted)
        #[arg(long)]
        delay: Option<u32>,

        /// PDS URL
        #[arg(long, env = "CADENCE_PDS_URL", default_value = DEFAULT_PDS_URL)]
        pds_url: String,

        /// Account handle
        #[arg(long, env = "CADENCE_HANDLE")]
        handle: Option<String>,

        /// App password
        #[arg(long, env = "CADENCE_APP_PASSWORD", hide_env_values = true)]
        app_password: Option<String>,

        /// Log posts instead of publishing them
        #[arg(
            long,
            env = "CADENCE_DRY_RUN",
            value_parser = parse_bool_env,
            action = clap::ArgAction::Set,
            num_args = 0..=1,
            default_value = "false",
            default_missing_value = "true"
        )]
        dry_run: bool,

        /// Upper bound on a single publish call in seconds
        #[arg(long, default_value = "30")]
        publish_timeout: u64,

        /// Longer posts are truncated with "..."
        #[arg(long, env = "CADENCE_MAX_POST_CHARS", default_value_t = BLUESKY_MAX_POST_CHARS)]
        max_chars: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cadence=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let workspace = Workspace::new(cli.content_dir, cli.state_path)?;

    match cli.command {
        Commands::Agents => commands::list_agents(&workspace).await,

        Commands::Feed { agent, unposted } => commands::show_feed(&workspace, &agent, unposted).await,

        Commands::Status => commands::show_status(&workspace).await,

        Commands::SetDelay { minutes } => commands::set_delay(&workspace, minutes).await,

        Commands::EditPost {
            agent,
            post_id,
            content,
        } => commands::edit_post(&workspace, &agent, &post_id, &content).await,

        Commands::Run {
            agent,
            delay,
            pds_url,
            handle,
            app_password,
            dry_run,
            publish_timeout,
            max_chars,
        } => {
            run::run(
                &workspace,
                run::RunConfig {
                    agent,
                    delay,
                    pds_url,
                    handle,
                    app_password,
                    dry_run,
                    publish_timeout_secs: publish_timeout,
                    max_chars,
                },
            )
            .await
        }
    }
}
