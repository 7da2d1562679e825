use slackwire::cli;
use slackwire::config;
use slackwire::logs;
use slackwire::slack;
use slackwire::unreads::{ChannelFilter, UnreadQuery};

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "slackwire",
    version,
    about = "Slack directory cache, name resolution and unread triage"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for slackwire itself
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the cached directory (no remote calls)
    Status,
    /// Refresh the directory from Slack
    Refresh {
        /// Refresh even if the cache is fresh
        #[arg(long)]
        force: bool,
    },
    /// Resolve a channel (or, with --user, a member) reference to its ID
    Resolve {
        /// '#general', '@alice', an ID or a permalink
        token: String,
        /// Resolve a member instead of a conversation
        #[arg(long)]
        user: bool,
    },
    /// List conversations with unread messages, most important first
    Unreads {
        /// Include the unread messages
        #[arg(long)]
        messages: bool,
        /// all, dm, group_dm, partner or internal
        #[arg(long, default_value = "all")]
        types: ChannelFilter,
        #[arg(long)]
        max_channels: Option<usize>,
        #[arg(long)]
        max_messages: Option<usize>,
        /// Only conversations with a pending mention
        #[arg(long)]
        mentions_only: bool,
    },
    /// List available tools with their argument schemas
    Tools,
    /// Call a tool
    Call {
        /// Tool name, see `tools`
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },
}

impl Command {
    fn needs_token(&self) -> bool {
        !matches!(self, Command::Status | Command::Tools)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    logs::init(args.verbose);

    // An explicit --config must exist; the default location is optional.
    let cfg = match &args.config {
        Some(path) => config::Config::load(path).await?,
        None => {
            let path = slackwire::slackwire_home().join("config.yaml");
            config::Config::load_or_default(&path).await?
        }
    };

    let token = match slack::resolve_token(&cfg) {
        Some(token) => token,
        None if args.command.needs_token() => {
            anyhow::bail!("no Slack token: set SLACK_TOKEN or slack.token in the config")
        }
        None => String::new(),
    };
    let rt = cli::Runtime::new(&cfg, token);

    // Ctrl-C cancels the running command; the cache is still flushed.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl-C, cancelling");
                cancel.cancel();
            }
        });
    }

    let outcome = tokio::select! {
        result = run(&rt, args.command) => result,
        _ = cancel.cancelled() => Err(anyhow::anyhow!("interrupted")),
    };

    rt.directory.flush().await;
    match outcome {
        Ok(value) => cli::print_json(&value),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "command failed");
            Err(e)
        }
    }
}

async fn run(rt: &cli::Runtime, command: Command) -> anyhow::Result<serde_json::Value> {
    match command {
        Command::Status => cli::status(rt).await,
        Command::Refresh { force } => cli::refresh(rt, force).await,
        Command::Resolve { token, user } => cli::resolve(rt, &token, user).await,
        Command::Unreads {
            messages,
            types,
            max_channels,
            max_messages,
            mentions_only,
        } => {
            let query = UnreadQuery {
                include_messages: messages,
                channel_types: types,
                max_channels,
                max_messages_per_channel: max_messages,
                mentions_only,
            };
            cli::unreads(rt, query).await
        }
        Command::Tools => cli::list_tools(rt),
        Command::Call { tool, args } => cli::call_tool(rt, &tool, args.as_deref()).await,
    }
}
