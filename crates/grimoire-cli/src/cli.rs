//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Custom tool runner for grimoire workspaces.
#[derive(Debug, Parser)]
#[command(name = "grimoire", version, about)]
pub struct Cli {
    /// Workspace root directory.
    #[arg(short, long, default_value = ".")]
    pub project: PathBuf,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan the tool directories and list every load result.
    List,
    /// Execute a tool by name.
    Run {
        /// Registered tool name.
        name: String,
        /// Tool parameters as a JSON object.
        #[arg(long, default_value = "{}")]
        params: String,
        /// Optional task identifier passed through to the tool.
        #[arg(long)]
        task_id: Option<String>,
    },
    /// Validate one tool file or package directory.
    Check {
        /// Path to a `*-tool.ts(x)` file or a packaged tool directory.
        path: PathBuf,
    },
}
