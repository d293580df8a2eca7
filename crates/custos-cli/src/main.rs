//! Custos CLI - administration of the Custos tamper-evident audit chain.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so JSON output on stdout stays parseable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "custos=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let service = commands::open_service(&cli.global).await?;

    let outcome = match cli.command {
        Commands::Submit(args) => commands::submit::run(&service, &args, cli.global.format).await,
        Commands::List(args) => commands::list::run(&service, &args, cli.global.format).await,
        Commands::Summary(args) => commands::summary::run(&service, &args, cli.global.format).await,
        Commands::Verify(args) => commands::verify::run(&service, &args, cli.global.format).await,
        Commands::Archive(args) => commands::archive::run(&service, &args, cli.global.format).await,
        Commands::Resolve(args) => commands::resolve::run(&service, &args, cli.global.format).await,
    };

    service.shutdown().await;
    outcome
}
