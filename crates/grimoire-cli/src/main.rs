//! grimoire - custom tool runner command-line interface.
#![allow(
    clippy::print_stdout,
    reason = "Command output is the CLI's purpose; logs go to stderr"
)]
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        reason = "Allow for tests"
    )
)]

use anyhow::Result;
use clap::Parser as _;

use cli::{Cli, Command};

mod cli;
mod handlers;

#[tokio::main]
async fn main() -> Result<()> {
    handlers::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::List => handlers::handle_list(cli.project).await,
        Command::Run {
            name,
            params,
            task_id,
        } => handlers::handle_run(cli.project, name, params, task_id).await,
        Command::Check { path } => handlers::handle_check(cli.project, path).await,
    }
}
