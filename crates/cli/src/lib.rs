pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "convoy",
    about = "Convoy operator CLI",
    long_about = "Operate the convoy fleet assistant: migrations, demo data, config inspection, readiness checks and one-off agent turns.",
    after_help = "Examples:\n  convoy doctor --json\n  convoy seed\n  convoy ask --role shipper --user 4 \"where is trip 2?\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo fleet (manager, two drivers, shipper, consignee, three trips)")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, LLM credentials, chat transport and database readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run one agent turn as the given user and role")]
    Ask {
        #[arg(long, help = "driver, manager, shipper or consignee")]
        role: String,
        #[arg(long, help = "User id acting as the principal")]
        user: i64,
        #[arg(required = true, trailing_var_arg = true, help = "Message text")]
        message: Vec<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Ask { role, user, message } => {
            commands::ask::run(&role, user, &message.join(" "))
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
