use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "msst",
    version,
    about = "Run chained music source separation stages over a folder of audio"
)]
pub struct Cli {
    /// Settings file, created with defaults if missing
    #[arg(long, global = true, default_value = ".config/settings.toml")]
    pub config: PathBuf,

    /// Print debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the selected stages over the input folder
    Run(RunArgs),
    /// Move results and inputs into the archive folder
    Archive,
    /// Manage saved stage selections
    Presets {
        #[command(subcommand)]
        action: PresetAction,
    },
    /// Inspect the model registry
    Models {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Start from a saved preset
    #[arg(long)]
    pub preset: Option<String>,

    /// Vocal model id ("none" disables the stage)
    #[arg(long)]
    pub vocal: Option<String>,

    /// Karaoke model id
    #[arg(long)]
    pub karaoke: Option<String>,

    /// De-reverb model id
    #[arg(long)]
    pub reverb: Option<String>,

    /// Other (denoise, restoration) model id
    #[arg(long)]
    pub other: Option<String>,

    /// Use the fast model configs
    #[arg(long)]
    pub fast: Option<bool>,

    /// Run the worker on the CPU
    #[arg(long)]
    pub force_cpu: bool,

    /// Enable test-time augmentation
    #[arg(long)]
    pub tta: bool,

    /// Save the resulting selection under this name
    #[arg(long)]
    pub save_preset: Option<String>,

    /// Print the plan without running anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Subcommand)]
pub enum PresetAction {
    List,
    Show { name: String },
    Delete { name: String },
}

#[derive(Debug, Subcommand)]
pub enum ModelAction {
    /// List models, optionally for one category (vocal, kara, reverb, other)
    List { category: Option<String> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::parse_from([
            "msst", "run", "--preset", "vocals", "--reverb", "none", "--fast", "false", "--tta",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.preset.as_deref(), Some("vocals"));
        assert_eq!(args.reverb.as_deref(), Some("none"));
        assert_eq!(args.fast, Some(false));
        assert!(args.tta);
        assert!(!args.force_cpu);
        assert_eq!(cli.config, PathBuf::from(".config/settings.toml"));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["msst", "archive", "-v", "--config", "alt.toml"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
        assert!(matches!(cli.command, Command::Archive));
    }
}
