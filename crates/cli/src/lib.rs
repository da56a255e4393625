pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "signoff",
    about = "Signoff operator CLI",
    long_about = "Operate the Signoff approval engine: migrations, config inspection, readiness checks, overdue sweeps and dashboard counts.",
    after_help = "Examples:\n  signoff doctor --json\n  signoff config\n  signoff sweep\n  signoff stats --client-id acme"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, gateway token readiness, DB connectivity and schema state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Expire overdue approval items once and report what changed")]
    Sweep,
    #[command(about = "Print dashboard approval counts")]
    Stats {
        #[arg(long, help = "Restrict counts to one client")]
        client_id: Option<String>,
        #[arg(long, help = "Only count terminal items updated at or after this RFC 3339 time")]
        since: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Sweep => commands::sweep::run(),
        Command::Stats { client_id, since } => {
            commands::stats::run(client_id.as_deref(), since.as_deref())
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
