//! kn-migrate
//!
//! Migrates Knative services and their revision history between clusters.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kn_migrate_cli::Cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    if let Err(e) = cli.run().await {
        println!("{}", e);
        std::process::exit(1);
    }
}
