//! cep-cache - operator CLI for the CEP entity cache

use clap::Parser;

mod cli;
mod output;

use cep_cache::Result;
use cli::{Cli, CommandContext, Commands};

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }
    }
}

/// Run the selected command; `Ok(false)` means it completed but failed its check
async fn run() -> Result<bool> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let ctx = CommandContext::new(cli.format, cli.config.as_deref(), cli.redis_url.as_deref())?;

    match cli.command {
        Commands::Health => return cli::cache::health(&ctx).await,
        Commands::Policies => cli::cache::policies(&ctx)?,
        Commands::Key { entity, id } => cli::cache::key(&ctx, entity, &id)?,
        Commands::ListKey { entity, filters } => cli::cache::list_key(&ctx, entity, &filters)?,
        Commands::Get { key } => cli::cache::get(&ctx, &key).await?,
        Commands::Invalidate { entity, id } => {
            cli::cache::invalidate(&ctx, entity, id.as_deref()).await?
        }
        Commands::InvalidateRelated { entity } => {
            cli::cache::invalidate_related(&ctx, entity).await?
        }
    }
    Ok(true)
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}
