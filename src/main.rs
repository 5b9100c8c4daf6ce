//! Binary entry point for tacit.
//!
//! Provides the CLI surface the host assistant's hook dispatcher calls
//! into, plus a few operator commands (status, init, migrate).

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Allow print output in the CLI binary
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tacit::TacitConfig;
use tacit::observability::{LoggingConfig, init_logging};

use commands::HookEvent;

/// Tacit - a per-project playbook of tacit knowledge for coding assistants.
#[derive(Parser)]
#[command(name = "tacit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Handle a host hook event (input on stdin, response on stdout).
    Hook {
        /// Hook event type.
        #[command(subcommand)]
        event: HookEvent,
    },

    /// Show playbook status.
    Status,

    /// Create the config file and template overrides for this project.
    Init {
        /// Overwrite existing files.
        #[arg(long)]
        force: bool,
    },

    /// Up-convert legacy key points to the when/do shape via the LLM.
    Migrate {
        /// Show what would change without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type: bash, zsh, fish, powershell, or elvish.
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    init_logging(&LoggingConfig::resolve(
        config.log_format.as_deref(),
        config.log_level.as_deref(),
        cli.verbose,
    ));

    let result = match cli.command {
        Commands::Hook { event } => commands::cmd_hook(&event, &config),
        Commands::Status => commands::cmd_status(&config),
        Commands::Init { force } => commands::cmd_init(&config, force),
        Commands::Migrate { dry_run } => commands::cmd_migrate(&config, dry_run),
        Commands::Completions { shell } => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "tacit", &mut std::io::stdout());
            Ok(())
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Loads configuration: `--config` flag, then `TACIT_CONFIG_PATH`, then the
/// project default (`.claude/tacit.toml` with env overrides).
fn load_config(path: Option<&str>) -> Result<TacitConfig, Box<dyn std::error::Error>> {
    if let Some(config_path) = path {
        let mut config = TacitConfig::load_from_file(std::path::Path::new(config_path))?;
        config.apply_env_overrides();
        return Ok(config);
    }

    if let Ok(config_path) = std::env::var("TACIT_CONFIG_PATH") {
        if !config_path.trim().is_empty() {
            let mut config = TacitConfig::load_from_file(std::path::Path::new(&config_path))?;
            config.apply_env_overrides();
            return Ok(config);
        }
    }

    Ok(TacitConfig::load_default())
}
