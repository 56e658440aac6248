mod cli;
mod commands;
mod output;
mod session;

use anyhow::Result;
use clap::Parser;
use strata_cache::observability;

use cli::{Cli, Commands};
use output::print_error;
use session::Session;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Session::load_config(&cli)?;
    if cli.verbose {
        observability::init_from_config(&config.logging);
    } else {
        observability::init_tracing_with_level("warn");
    }

    let format = cli.format.unwrap_or_default();
    let session = Session::open(config).await?;

    match &cli.command {
        Commands::Get(args) => {
            commands::inspect::get(&session, &args.key, format).await?;
        }
        Commands::TagMembers(args) => {
            commands::inspect::tag_members(&session, &args.tag, format).await?;
        }
        Commands::Invalidate(args) => {
            commands::invalidate::key(&session, &args.key).await?;
        }
        Commands::InvalidateTag(args) => {
            commands::invalidate::tag(&session, &args.tag, format).await?;
        }
        Commands::Listen => {
            commands::listen::listen(&session, format).await?;
        }
    }

    Ok(())
}
