use std::process;

use anyhow::Context;
use clap::Parser;

use news_shelf::cli::Cli;

#[tokio::main]
async fn main() {
    // A missing .env is fine.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    cli.run().await.context("news-shelf command failed")
}
