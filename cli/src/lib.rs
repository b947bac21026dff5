//! Terminal front end for Codeforge sessions.

pub mod chat;
pub mod cli;
pub mod replay;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

pub use cli::Cli;
pub use cli::Command;

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    let Cli { verbose, command } = cli;
    init_tracing(verbose);

    match command {
        Command::Replay(args) => replay::run_replay(args),
        Command::Chat(args) => chat::run_chat(args).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "error" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
}
