//! teamsync - live view of a team dashboard from the terminal.

mod app;
mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use teamsync_config::{init_logging, Config, Paths};

/// teamsync command-line interface.
#[derive(Debug, Parser)]
#[command(name = "teamsync")]
#[command(about = "Realtime team dashboard client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Base directory for config and logs. Defaults to ~/.teamsync
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Access token of the signed-in user
    #[arg(long, env = "TEAMSYNC_ACCESS_TOKEN", hide_env_values = true, global = true)]
    access_token: Option<String>,

    /// Id of the signed-in user
    #[arg(long, env = "TEAMSYNC_USER_ID", global = true)]
    user_id: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print a collection and keep it up to date until Ctrl-C
    Watch {
        collection: Collection,
        /// Task whose attachments to show
        #[arg(long, required_if_eq("collection", "attachments"))]
        task: Option<String>,
        /// Workspace whose roster to show (defaults to the configured one)
        #[arg(long)]
        workspace: Option<String>,
    },
    /// Send a message
    Send {
        /// Recipient user id
        #[arg(long)]
        to: String,
        text: String,
    },
    /// Mark a notification or message as read
    MarkRead { kind: ReadKind, id: String },
    /// Upload a file as a task attachment
    Attach {
        #[arg(long)]
        task: String,
        file: PathBuf,
    },
    /// Remove a task attachment
    Detach {
        #[arg(long)]
        task: String,
        attachment_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Collection {
    Notifications,
    Messages,
    Tasks,
    Projects,
    Attachments,
    Roster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReadKind {
    Notification,
    Message,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    init_logging(&cli.log_level, &paths);
    let config = Config::load(&paths)?;

    let session = app::Session {
        access_token: cli.access_token,
        user_id: cli.user_id,
    };
    app::run(config, session, cli.command).await
}
