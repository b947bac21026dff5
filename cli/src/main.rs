use clap::Parser;
use codeforge_cli::Cli;
use codeforge_cli::run_main;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run_main(Cli::parse()).await
}
