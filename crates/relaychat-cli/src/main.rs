use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use relaychat_cli::commands::{
    AppContext, ChatCommand, HistoryCommand, LoginCommand, LogoutCommand, ModelsCommand,
    StatusCommand,
};
use relaychat_cli::config::ClientConfig;
use relaychat_cli::error::CliResult;
use relaychat_cli::output::OutputFormat;
use relaychat_cli::persistence::FileStore;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "relaychat-cli")]
#[command(about = "Relaychat CLI - Chat with a local model through the relay server")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'd', global = true, help = "Path to data directory")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Start a session")]
    Login(LoginCommand),

    #[clap(about = "End the current session")]
    Logout(LogoutCommand),

    #[clap(about = "Show session and server status")]
    Status(StatusCommand),

    #[clap(about = "Send a message, or chat interactively")]
    Chat(ChatCommand),

    #[clap(about = "Conversation history commands")]
    History(HistoryCommand),

    #[clap(about = "List models available upstream")]
    Models(ModelsCommand),
}

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let config = ClientConfig::load(cli.config.as_deref())?;
    let durable = Arc::new(FileStore::new(config.data_dir(cli.data_dir.as_deref())));
    let ephemeral = Arc::new(FileStore::new(std::env::temp_dir().join("relaychat")));
    let ctx = AppContext::new(config, durable, ephemeral);

    match &cli.command {
        Command::Login(cmd) => cmd.execute(&ctx, format).await,
        Command::Logout(cmd) => cmd.execute(&ctx, format).await,
        Command::Status(cmd) => cmd.execute(&ctx, format).await,
        Command::Chat(cmd) => cmd.execute(&ctx, format).await,
        Command::History(cmd) => cmd.execute(&ctx, format).await,
        Command::Models(cmd) => cmd.execute(&ctx, format).await,
    }
}
