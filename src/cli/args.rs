//! Command-line arguments

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::cli::commands::clone::CloneArgs;
use crate::cli::commands::init::InitArgs;
use crate::cli::commands::line::LineCommands;
use crate::cli::commands::part::PartCommands;
use crate::cli::commands::tree::TreeArgs;

#[derive(Parser, Debug)]
#[command(name = "tbom")]
#[command(author, version, about = "Tessera BOM - bill-of-materials structure and cost engine")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options accepted by every command
#[derive(clap::Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Database file (overrides TBOM_DB and config files)
    #[arg(long, global = true, env = "TBOM_DB")]
    pub db: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(long = "format", short = 'f', global = true, value_enum, default_value_t = OutputFormat::Auto)]
    pub output: OutputFormat,
}

/// How results are written to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Table for lists, YAML for single records, text for trees
    #[default]
    Auto,
    Yaml,
    Json,
    Table,
    /// Only ids, one per line
    Id,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database and print where it lives
    Init(InitArgs),

    /// Manage parts
    #[command(subcommand)]
    Part(PartCommands),

    /// Manage BOM lines
    #[command(subcommand)]
    Line(LineCommands),

    /// Show the costed BOM tree of a part
    Tree(TreeArgs),

    /// Copy a part's BOM lines onto another part
    Clone(CloneArgs),
}
