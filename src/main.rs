mod averaging;
mod config;
mod database;
mod device;
mod diagnostics;
mod models;
mod scheduler;
mod server;
mod utils;
mod validation;

use std::sync::Arc;

use clap::Parser;
use log::{error, info, LevelFilter};
use tokio::time::Duration;

use config::ProxyConfig;
use database::Store;
use device::DeviceClient;
use diagnostics::{dump_database, run_device_tests};
use scheduler::{Orchestrator, Schedule};

#[derive(Parser)]
#[command(name = "purple-proxy")]
#[command(about = "Samples a PurpleAir sensor and serves its readings", long_about = None)]
struct Cli {
    /// Run diagnostics against the live device and exit
    #[arg(long, conflicts_with = "dump")]
    test: bool,

    /// Print every stored record as JSON and exit
    #[arg(long)]
    dump: bool,
}

fn init_logging(debug: bool, log_to_stdout: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    builder
        .filter_level(if debug { LevelFilter::Debug } else { LevelFilter::Info })
        .format_timestamp_secs();
    if log_to_stdout {
        builder.target(env_logger::Target::Stdout);
    }
    builder.init();
}

fn log_config(config: &ProxyConfig) {
    info!("{} starting", config.service_name);
    info!("  hostname              : {}", config.hostname);
    info!("  port                  : {}", config.port);
    info!("  server_port           : {}", config.server_port);
    info!("  timeout_secs          : {}", config.timeout_secs);
    info!("  poll_freq_secs        : {}", config.poll_freq_secs);
    info!("  poll_freq_offset      : {}", config.poll_freq_offset);
    info!("  archive_interval_secs : {}", config.archive_interval_secs);
    info!("  database_schema       : {}", config.database_schema);
    info!("  debug                 : {}", config.debug);
    info!("  log_to_stdout         : {}", config.log_to_stdout);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = match ProxyConfig::new() {
        Ok(config) => config,
        Err(e) => {
            init_logging(false, false);
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    init_logging(config.debug, config.log_to_stdout);
    log_config(&config);

    let store = Store::new(&config.database_url, &config.database_schema)?;
    let mut device = DeviceClient::new(
        &config.hostname,
        config.port,
        Duration::from_secs(config.timeout_secs),
    )?;

    if cli.test {
        if run_device_tests(&mut device, &store).await {
            return Ok(());
        }
        return Err("device tests failed".into());
    }

    if cli.dump {
        dump_database(&store).await?;
        return Ok(());
    }

    if let Err(e) = store.create_schema().await {
        error!("Failed to create database schema: {}", e);
        return Err(e.into());
    }

    let server_store = Arc::new(store.clone());
    let server_port = config.server_port;
    tokio::spawn(async move {
        if let Err(e) = server::serve(server_port, server_store).await {
            error!("Query server stopped: {}", e);
        }
    });

    let schedule = Schedule {
        poll_secs: config.poll_freq_secs,
        archive_secs: config.archive_interval_secs,
        offset_secs: config.poll_freq_offset,
    };
    info!("Polling {}", device.url());
    let mut orchestrator = Orchestrator::new(device, store, schedule);

    // Run main loop or wait for shutdown signal
    tokio::select! {
        _ = orchestrator.run() => {
            error!("Main loop exited unexpectedly");
        }
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Program terminated by user. Exiting gracefully."),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
        }
    }

    Ok(())
}
