//! CLI command definitions using clap.
//!
//! - dropcatch: wait for the drop and acquire the targets
//! - next-drop: show when the next drop fires

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Dropcatch - register expiring domains the moment they are released
#[derive(Parser, Debug)]
#[command(name = "dropcatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Wait for the drop time, then try to register every target
    Dropcatch(DropcatchArgs),

    /// Print the next drop trigger and first-shot instants
    NextDrop,
}

#[derive(clap::Args, Debug, Default)]
pub struct DropcatchArgs {
    /// Domain to catch; repeatable, merged with the configured list
    #[arg(short, long = "domain", value_name = "DOMAIN")]
    pub domains: Vec<String>,

    /// Run without contacting the registrar
    #[arg(long)]
    pub dry: bool,

    /// Start immediately instead of waiting for the drop time
    #[arg(long)]
    pub now: bool,

    /// Log a heartbeat while waiting
    #[arg(long)]
    pub keep_awake: bool,

    /// Work through targets one at a time
    #[arg(long)]
    pub sequential: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}
