pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "frontdesk",
    about = "Frontdesk operator CLI",
    long_about = "Apply migrations, load demo practice data, inspect configuration, and read back call audit trails.",
    after_help = "Examples:\n  frontdesk migrate\n  frontdesk config --json\n  frontdesk transcript 2f1c0b6e-..."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load deterministic demo providers and open slots")]
    Seed {
        #[arg(long, default_value_t = commands::seed::DEFAULT_SEED_DAYS, help = "Days of availability to generate")]
        days: u32,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config {
        #[arg(long, help = "Emit the redacted configuration as JSON")]
        json: bool,
    },
    #[command(about = "Read back a call's audit trail and verify its hash chain")]
    Transcript {
        #[arg(help = "Session id returned when the call started")]
        session_id: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { days } => commands::seed::run(days),
        Command::Config { json } => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(json) }
        }
        Command::Transcript { session_id } => commands::transcript::run(&session_id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
