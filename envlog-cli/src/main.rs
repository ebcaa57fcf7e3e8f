//! envlog-cli - Inspection tool for envlog flash images
//!
//! Opens the flash image and stored configuration directly, so the daemon
//! should be stopped while a command runs.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use envlog_node::Settings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "envlog-cli")]
#[command(about = "Inspect and manage an envlog flash image")]
#[command(version)]
struct Cli {
    /// YAML settings file
    #[arg(short, long, env = "ENVLOG_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (overrides settings)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show geometry, configuration and the committed window
    Info,

    /// Scan every page and report corrupt or orphaned records
    Verify,

    /// Read logged samples
    Read {
        /// File holding the cursor; read and updated in place
        #[arg(long)]
        cursor_file: Option<PathBuf>,

        /// Maximum samples to return per batch
        #[arg(
            short,
            long,
            default_value = "100",
            value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
        )]
        max: usize,

        /// Read until the end of the log
        #[arg(long)]
        all: bool,
    },

    /// Get or set the log configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Erase every page of the log
    Purge {
        /// Confirm erasing all logged data
        #[arg(long)]
        yes: bool,
    },

    /// Describe the contents of each page
    Dump {
        /// Only this page
        #[arg(short, long)]
        page: Option<u32>,

        /// Also print the elements of each record
        #[arg(short, long)]
        elements: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the stored configuration
    Get,

    /// Change the stored configuration
    Set {
        /// Comma-separated fields (temperature,humidity,pressure)
        #[arg(short, long)]
        fields: Option<String>,

        /// Sampling interval in seconds
        #[arg(short, long)]
        interval: Option<u32>,

        /// Overflow policy (wrap or stop)
        #[arg(short, long)]
        overflow: Option<String>,
    },
}

fn load_settings(cli: &Cli) -> Result<Settings, Box<dyn std::error::Error>> {
    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    settings.apply_env_overrides();
    if let Some(dir) = &cli.data_dir {
        settings.storage.data_dir = dir.clone();
    }
    settings.validate()?;
    Ok(settings)
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = load_settings(&cli).and_then(|settings| {
        let json = cli.json;
        commands::execute(&settings, cli.command, json)
    });

    match result {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
