#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::Parser;
use tern::{config::Config, controller::Tern};

/// An SMTP server engine
#[derive(Parser, Debug)]
#[command(name = "tern")]
#[command(version)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "tern.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    Tern::new(config).run().await
}
