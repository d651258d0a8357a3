mod audit_commands;
mod audit_config;
mod bootstrap_helpers;
mod cli_args;

use clap::Parser;

use crate::audit_commands::{execute_replay_command, execute_run_command, EXIT_AUDIT_ERROR};
use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::{Cli, VitalsCommand};

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let (label, result) = match &cli.command {
        VitalsCommand::Run(args) => ("performance audit", execute_run_command(args).await),
        VitalsCommand::Replay(args) => (
            "audit contract replay",
            execute_replay_command(args).await,
        ),
    };

    let code = match result {
        Ok(exit) => exit.code(),
        Err(error) => {
            eprintln!("{label} failed: {error:#}");
            EXIT_AUDIT_ERROR
        }
    };
    std::process::exit(code);
}
