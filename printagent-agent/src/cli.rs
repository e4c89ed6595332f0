use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Environment variable consulted when `--config` is absent.
pub const CONFIG_PATH_ENV: &str = "PRINTAGENT_CONFIG_PATH";
/// Environment variable consulted when `--settings` is absent.
pub const SETTINGS_PATH_ENV: &str = "PRINTAGENT_SETTINGS_PATH";

#[derive(Parser, Debug)]
#[command(name = "printagent")]
#[command(version)]
#[command(about = "Receives label jobs from the print server and sends them to a printer")]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<String>,

    /// Settings store (defaults to the per-user data directory)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to the server and print incoming jobs (default)
    Run(RunArgs),

    /// Show recently printed jobs
    History {
        /// Number of rows to show
        #[arg(long, short = 'n', default_value = "20")]
        limit: u32,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the latest stored label for an invoice again
    Reprint {
        invoice: String,

        #[arg(long)]
        dry_run: bool,
    },

    /// Send a raw payload file (or `-` for stdin) to the printer
    TestPrint {
        file: String,

        #[arg(long)]
        dry_run: bool,
    },

    /// Read or change stored settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Log jobs instead of printing them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// Show one key, or all keys when omitted
    Get { key: Option<String> },
    Set { key: String, value: String },
    Unset { key: String },
}

impl Cli {
    pub fn config_path(&self) -> Option<String> {
        self.config
            .clone()
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .filter(|p| !p.trim().is_empty())
    }

    pub fn settings_path(&self) -> PathBuf {
        self.settings
            .clone()
            .or_else(|| std::env::var_os(SETTINGS_PATH_ENV).map(PathBuf::from))
            .unwrap_or_else(printagent_config::paths::settings_path)
    }
}
