//! Kolosal ONNX - Main Entry Point
//!
//! Exports classifiers to ONNX and verifies the resulting artifacts.

use clap::Parser;
use kolosal_onnx::cli::{cmd_export, cmd_verify, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kolosal_onnx=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Export { model, features, output, config, seed, parity } => {
            cmd_export(&model, &features, &output, config.as_deref(), seed, parity)?;
        }
        Commands::Verify { artifact, num_features, seed, batch_sizes } => {
            cmd_verify(&artifact, num_features, seed, batch_sizes)?;
        }
    }

    Ok(())
}
