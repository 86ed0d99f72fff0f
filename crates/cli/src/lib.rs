pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "repuestos",
    about = "Repuestos escalation engine operator CLI",
    long_about = "Apply migrations, inspect effective tunables, check readiness, and drive the escalation engine by hand.",
    after_help = "Examples:\n  repuestos doctor --json\n  repuestos config\n  repuestos tick\n  repuestos evaluate SOL-2026-0042"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, DB connectivity, schema state and the config store")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run one scheduler pass over every open solicitud now")]
    Tick,
    #[command(about = "Re-run evaluation for an evaluated solicitud; existing awards are kept")]
    Evaluate {
        #[arg(help = "Solicitud id")]
        solicitud_id: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Tick => commands::tick::run(),
        Command::Evaluate { solicitud_id } => commands::evaluate::run(&solicitud_id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
