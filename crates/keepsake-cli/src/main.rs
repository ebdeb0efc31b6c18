//! keepsake CLI: drive the companion memory layer from a terminal.
//!
//! Every command opens the configured database in-process, does its work,
//! and exits.

mod cli;
mod cmd;

use crate::cli::*;
use clap::Parser;
use keepsake_kernel::config::load_config;
use keepsake_kernel::error::KernelError;
use keepsake_kernel::CompanionMemory;
use keepsake_types::config::MemoryConfig;

fn init_tracing_stderr(default_level: &str) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

pub(crate) fn boot_memory(config: MemoryConfig) -> CompanionMemory {
    match CompanionMemory::boot(config) {
        Ok(memory) => memory,
        Err(e) => {
            boot_error(&e);
            std::process::exit(1);
        }
    }
}

fn boot_error(e: &KernelError) {
    match e {
        KernelError::Storage { reason, .. } if reason.contains("locked") => {
            eprintln!("Database is locked: {e}");
            eprintln!("  hint: check whether another keepsake process is running");
        }
        KernelError::Storage { .. } => {
            eprintln!("Failed to open memory: {e}");
            eprintln!("  hint: check data_dir and database_path in your config.toml");
        }
        other => eprintln!("Failed to open memory: {other}"),
    }
}

pub(crate) fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to start async runtime: {e}");
        std::process::exit(1);
    })
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Failed to encode output: {e}");
            std::process::exit(1);
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());
    init_tracing_stderr(&config.log_level);

    match cli.command {
        Commands::Remember {
            pair,
            message,
            json,
        } => cmd::memory::cmd_remember(config, &pair, &message, json),
        Commands::Extract {
            message,
            reply,
            json,
        } => cmd::memory::cmd_extract(&message, reply, json),
        Commands::Context { session, json } => cmd::memory::cmd_context(config, &session, json),
        Commands::Decay { watch, json } => cmd::memory::cmd_decay(config, watch, json),
        Commands::Session(sub) => match sub {
            SessionCommands::Init { session } => cmd::session::cmd_session_init(config, &session),
            SessionCommands::Observe {
                session,
                message,
                json,
            } => cmd::session::cmd_session_observe(config, &session, &message, json),
            SessionCommands::Show { session, json } => {
                cmd::session::cmd_session_show(config, &session, json)
            }
        },
    }
}
