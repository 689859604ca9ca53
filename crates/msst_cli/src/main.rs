//! `msst` - command-line front end for the MSST pipeline orchestrator.

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;

use msst_core::config::ConfigManager;
use msst_core::logging::{self, LogLevel};
use msst_core::orchestrator::Session;

use cli::{Cli, Command};

fn main() -> Result<()> {
    let args = Cli::parse();

    let mut config = ConfigManager::new(&args.config);
    config
        .load_or_create()
        .with_context(|| format!("Failed to load settings from {}", args.config.display()))?;
    config
        .ensure_dirs_exist()
        .context("Failed to create working directories")?;

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        config.settings().logging.level
    };
    let _guard = logging::init_tracing_with_file(level, &config.settings().paths.logs_dir());
    tracing::debug!("msst_core {}", msst_core::version());

    let session = Session::open(config.into_settings()).context("Failed to open session")?;

    match args.command {
        Command::Run(run_args) => commands::run(&session, run_args, args.verbose),
        Command::Archive => commands::archive(&session),
        Command::Presets { action } => commands::presets(&session, action),
        Command::Models { action } => commands::models(&session, action),
    }
}
