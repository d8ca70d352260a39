pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "salesdesk",
    about = "Salesdesk operator CLI",
    long_about = "Inspect configuration, check readiness, prepare the retail database, and dry-run plans against the tool catalog.",
    after_help = "Examples:\n  salesdesk doctor --json\n  salesdesk seed\n  salesdesk validate plan.json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo retail dataset (users, products, inventory, orders)")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, language model client readiness, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Check a plan JSON file against the tool catalog without executing it")]
    Validate {
        #[arg(help = "Path to a plan document (raw model output is accepted)")]
        path: PathBuf,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Validate { path } => commands::validate::run(&path),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
