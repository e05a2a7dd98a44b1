// FHIR Job Queue - Durable job queue for FHIR bulk operations
// Copyright (c) 2025 FHIR Job Queue Contributors
// Licensed under the MIT License

use clap::Parser;
use fhir_jobqueue::cli::{Cli, Commands};
use fhir_jobqueue::config::{load_config, LoggingConfig};
use fhir_jobqueue::logging::init_logging;
use std::process;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    // Optional; a missing .env is ignored
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let (log_level, logging_config) = logging_settings(&cli);
    let _logging_guard = match init_logging(&log_level, &logging_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(5);
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "FHIR Job Queue - Durable job queue for FHIR bulk operations"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
                        }
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "Failed to create SIGTERM handler, listening for Ctrl+C only"
                    );
                    let _ = tokio::signal::ctrl_c().await;
                    tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
                }
            }
            println!("\n⚠️  Shutdown signal received, finishing running jobs...");
            let _ = shutdown_tx.send(true);
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            } else {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
                println!("\n⚠️  Shutdown signal received, finishing running jobs...");
                let _ = shutdown_tx.send(true);
            }
        }
    });

    let exit_code = match execute_command(&cli, shutdown_rx).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command execution failed");
            eprintln!("Error: {e}");
            5
        }
    };

    drop(_logging_guard);
    process::exit(exit_code);
}

/// Logging for this invocation
///
/// Workers log the way the configuration file says; one-shot commands log
/// to the console only.
fn logging_settings(cli: &Cli) -> (String, LoggingConfig) {
    let console_only = LoggingConfig {
        local_enabled: false,
        ..LoggingConfig::default()
    };

    let (level, logging) = match cli.command {
        Commands::Worker(_) => match load_config(&cli.config) {
            Ok(config) => (config.application.log_level, config.logging),
            Err(_) => ("info".to_string(), console_only),
        },
        _ => ("info".to_string(), console_only),
    };

    (cli.log_level.clone().unwrap_or(level), logging)
}

async fn execute_command(cli: &Cli, shutdown_signal: watch::Receiver<bool>) -> anyhow::Result<i32> {
    match &cli.command {
        Commands::Worker(args) => args.execute(&cli.config, shutdown_signal).await,
        Commands::Enqueue(args) => args.execute(&cli.config).await,
        Commands::Status(args) => args.execute(&cli.config).await,
        Commands::Cancel(args) => args.execute(&cli.config).await,
        Commands::ValidateConfig(args) => args.execute(&cli.config).await,
        Commands::Init(args) => args.execute().await,
    }
}
