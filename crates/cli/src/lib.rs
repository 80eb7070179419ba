pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use crate::commands::negotiate::NegotiateArgs;

#[derive(Debug, Parser)]
#[command(
    name = "hagglz",
    about = "Hagglz operator CLI",
    long_about = "Operate the Hagglz negotiation engine: migrations, config inspection, smoke validation and one-off negotiations.",
    after_help = "Examples:\n  hagglz config\n  hagglz smoke\n  hagglz negotiate --text \"Electric bill $150 from Acme Power\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Run end-to-end readiness checks with per-check timing details")]
    Smoke,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Run one bill through the negotiation engine and print the record")]
    Negotiate(NegotiateArgs),
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Smoke => commands::smoke::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Negotiate(args) => commands::negotiate::run(args),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
