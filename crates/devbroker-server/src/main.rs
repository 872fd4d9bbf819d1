// ============================================
// File: crates/devbroker-server/src/main.rs
// ============================================
//! # devbroker Entry Point
//!
//! ## Creation Reason
//! Binary entry point for the device reservation server. Handles CLI
//! parsing, logging setup and server start.
//!
//! ## Main Functionality
//! - CLI argument parsing with clap
//! - Logging initialization with tracing
//! - Configuration loading and validation
//! - Password digest helper for the `[[users]]` table
//!
//! ## Usage
//! ```bash
//! # Start the server
//! devbroker start --config /etc/devbroker/server.toml
//!
//! # Other commands
//! devbroker validate --config server.toml   # Check a config file
//! devbroker validate --print                # Dump the effective config
//! devbroker hash-password s3cret            # Digest for [[users]]
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `RUST_LOG` overrides `[logging] level`
//! - A missing config file means built-in defaults, which have no users
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI implementation

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use devbroker_server::services::hash_password;
use devbroker_server::{Server, ServerConfig};

const DEFAULT_CONFIG: &str = "/etc/devbroker/server.toml";

// ============================================
// CLI Definition
// ============================================

/// Multi-user device reservation server
#[derive(Parser, Debug)]
#[command(name = "devbroker")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the server
    Start {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Print the effective configuration as TOML
        #[arg(long)]
        print: bool,
    },

    /// Print the SHA-256 digest of a password for `[[users]]`
    HashPassword {
        /// Clear-text password
        password: String,
    },
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start { config } => cmd_start(&config).await,
        Commands::Validate { config, print } => {
            init_logging("info");
            cmd_validate(&config, print).await
        }
        Commands::HashPassword { password } => {
            println!("{}", hash_password(&password));
            Ok(())
        }
    };

    if let Err(e) = result {
        init_logging("info");
        error!("{:#}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

/// Starts the server.
async fn cmd_start(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path).await?;

    // Subscriber can only be installed once, so wait for the config level
    init_logging(&config.logging.level);

    info!("════════════════════════════════════════");
    info!("Listen:        {}", config.listen_addr());
    info!("Devices:       {}", config.devices.len());
    info!("Users:         {}", config.users.len());
    info!("Tick:          {}ms", config.engine.tick_interval_ms);
    info!("════════════════════════════════════════");

    let server = Server::new(config)?;
    server.run().await?;

    Ok(())
}

/// Validates a configuration file.
async fn cmd_validate(config_path: &Path, print: bool) -> anyhow::Result<()> {
    let config = load_config(config_path).await?;

    if print {
        print!("{}", config.to_toml());
        return Ok(());
    }

    println!("✅ Configuration is valid");
    println!();
    println!("Network:");
    println!("   Listen:            {}", config.listen_addr());
    println!("   Send attempts:     {}", config.network.send_attempts);
    println!("   I/O timeout:       {}ms", config.network.io_timeout_ms);
    println!();
    println!("Engine:");
    println!("   Max reservations:  {}", config.engine.max_reservations);
    println!("   Wheel slots:       {}", config.engine.wheel_slots);
    println!("   Tick interval:     {}ms", config.engine.tick_interval_ms);
    println!();
    println!("Sessions:");
    println!("   Max sessions:      {}", config.sessions.max_sessions);
    println!("   Idle timeout:      {}s", config.sessions.idle_timeout_secs);
    println!();
    println!("Devices ({}):", config.devices.len());
    for device in &config.devices {
        println!("   {:<12} {:<16} {}", device.id, device.device_type, device.name);
    }
    println!();
    println!("Users:             {}", config.users.len());
    println!();

    Ok(())
}

// ============================================
// Helper Functions
// ============================================

/// Initializes the tracing subscriber.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}

/// Loads the config, or the defaults when the file does not exist.
async fn load_config(path: &Path) -> anyhow::Result<ServerConfig> {
    if path.exists() {
        Ok(ServerConfig::load(path).await?)
    } else {
        info!("Config file {} not found, using defaults", path.display());
        Ok(ServerConfig::default())
    }
}
