use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use za_context::ContextStore;
use za_gateway::repl::run_repl;
use za_gateway::server::{run_server, DEFAULT_PORT};
use za_gateway::state::AppState;

#[derive(Parser)]
#[command(name = "zagent", about = "Tool-driven coding agent with web and terminal frontends")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the WebSocket web UI backend.
    Web {
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Run the terminal REPL in the current directory.
    Term,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let store = ContextStore::open_default()?;
    let state = AppState::new(store);

    match cli.command {
        // Default to the web variant when no subcommand is given.
        None => run_server(state, "127.0.0.1", DEFAULT_PORT).await,
        Some(Command::Web { port, host }) => run_server(state, &host, port).await,
        Some(Command::Term) => run_repl(state).await,
    }
}
