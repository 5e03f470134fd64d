// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, Subcommand};
use peggo::config::OrchestratorConfig;
use peggo::metrics::start_prometheus_server;
use peggo::node::{run_orchestrator, wait_for_shutdown_signal};
use peggo::version::{VersionFormat, VersionInfo, VERSION};
use peggo_config::Config;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
#[clap(version = VERSION)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
#[clap(rename_all = "kebab-case")]
enum Command {
    /// Run the oracle, signer, relayer and batch requester loops
    Orchestrator {
        #[clap(long)]
        config_path: PathBuf,
    },
    /// Print binary version information
    Version {
        #[clap(long, value_enum, default_value_t = VersionFormat::Text)]
        format: VersionFormat,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Version { format } => {
            println!("{}", VersionInfo::current().render(format)?);
            Ok(())
        }
        Command::Orchestrator { config_path } => {
            init_logging();
            let config = OrchestratorConfig::load(&config_path)?;
            info!("Starting peggo {} with config {}", VERSION, config_path.display());

            let prometheus_registry = prometheus::Registry::new();
            let metrics_address =
                SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), config.metrics_port);
            start_prometheus_server(metrics_address, prometheus_registry.clone());
            info!("Metrics server started at port {}", config.metrics_port);

            let handle = run_orchestrator(config, &prometheus_registry).await?;
            wait_for_shutdown_signal().await;
            handle.shutdown().await;
            Ok(())
        }
    }
}
