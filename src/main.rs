mod assemble;
mod cli;
mod commands;
mod config;
mod extract;
mod identity;
mod model;
mod page_index;
mod pipeline;
mod repository;
mod search;
mod store;
mod tasks;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest(args) => commands::ingest::run(args),
        Commands::Status(args) => commands::status::run(args),
        Commands::List(args) => commands::list::run(args),
        Commands::Search(args) => commands::search::run_single(args),
        Commands::SearchAll(args) => commands::search::run_all(args),
        Commands::QuickSearch(args) => commands::search::run_quick(args),
        Commands::Text(args) => commands::text::run(args),
        Commands::Delete(args) => commands::delete::run(args),
        Commands::Info(args) => commands::info::run_info(args),
        Commands::Analyze(args) => commands::info::run_analyze(args),
        Commands::Worker(args) => commands::worker::run(args),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
