// src/main.rs

use std::fs;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use goldiso::cli::Args;
use goldiso::coordinate::{self, LOG_DIR_NAME, LOG_FILE_NAME};

/// Log to the console and to a file under the output directory.
fn init_logging(args: &Args) -> Result<()> {
    let log_dir = args.out_dir.join(LOG_DIR_NAME);
    fs::create_dir_all(&log_dir)?;
    let log_file = Arc::new(fs::File::create(log_dir.join(LOG_FILE_NAME))?);

    let default_filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(log_file),
        )
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse().resolve()?;

    // The output directory must be settled before logging into it.
    coordinate::prepare_output_dir(&args.out_dir, args.clean)?;
    init_logging(&args)?;
    info!("Input arguments for build: {:?}", args);

    println!("Building GISO...");
    match coordinate::run(&args) {
        Ok(iso_file) => {
            println!("GISO build successful");
            println!("ISO: {}", iso_file.display());
            if let Some(label) = &args.label {
                println!("ISO label: {label}");
            }
            println!(
                "Further logs at {}",
                args.out_dir.join(LOG_DIR_NAME).join(LOG_FILE_NAME).display()
            );
            Ok(())
        }
        Err(e) => {
            error!("{e}");
            Err(e.into())
        }
    }
}
