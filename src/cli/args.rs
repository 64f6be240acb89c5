//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueHint};

/// Lazy tree explorer: background-populated directory trees and collapsed path trees
#[derive(Parser, Debug)]
#[command(name = "lazytree")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Turn debugging information on (repeat for more: -d info, -dd debug, -ddd trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub debug: u8,

    /// Directory whose .lazytree.toml is loaded (default: browsed dir or cwd)
    #[arg(short = 'C', long, global = true, value_hint = ValueHint::DirPath)]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Lazily populate a directory tree and print it
    Browse {
        /// Directory to browse (default: cwd)
        #[arg(value_hint = ValueHint::DirPath)]
        dir: Option<PathBuf>,

        /// Levels to expand (default: initial_depth from config)
        #[arg(short = 'L', long)]
        depth: Option<usize>,

        /// List directories before files
        #[arg(long)]
        sort: bool,

        /// Include hidden entries
        #[arg(short = 'a', long)]
        all: bool,
    },

    /// Build a tree from a list of paths (one per line)
    Paths {
        /// File with paths (default: stdin)
        #[arg(value_hint = ValueHint::FilePath)]
        file: Option<PathBuf>,

        /// Keep one node per path component
        #[arg(long)]
        no_collapse: bool,
    },

    /// Manage settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Show config file locations
    Path,
    /// Print a commented template
    Template,
}
