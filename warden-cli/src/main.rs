//! Warden: run any executable as a supervised daemon.
//!
//! # Usage
//!
//! ```text
//! warden start   <script> [options] [-- <script args>]
//! warden stop    <script> [options]
//! warden restart <script> [options]
//! warden run     <script> [options] [-- <script args>]
//! warden zap     <script> [options]
//! warden status  <script> [options]
//! ```
//!
//! Options: `--dir-mode script|normal|system`, `--dir <path>`, `--multiple`,
//! `--ontop`, `--backtrace`, `--log-output`, `--monitor`, `--force`,
//! `--app-name <name>`, `--config <file.yaml>`.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::control::{self, ControlArgs};
use warden_daemon::Command;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "warden",
    version,
    about = "Daemonize a script, track it with pid-files and keep it alive",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start an instance in the background.
    Start(ControlArgs),

    /// Stop all instances (and the monitor).
    Stop(ControlArgs),

    /// Stop all instances, then start them again.
    Restart(ControlArgs),

    /// Run the script in the foreground without a pid-file.
    Run(ControlArgs),

    /// Remove pid-files without signalling any process.
    Zap(ControlArgs),

    /// Show the state of every instance.
    Status(ControlArgs),
}

impl Commands {
    fn split(self) -> (Command, ControlArgs) {
        match self {
            Commands::Start(args) => (Command::Start, args),
            Commands::Stop(args) => (Command::Stop, args),
            Commands::Restart(args) => (Command::Restart, args),
            Commands::Run(args) => (Command::Run, args),
            Commands::Zap(args) => (Command::Zap, args),
            Commands::Status(args) => (Command::Status, args),
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (command, args) = cli.command.split();
    control::run(command, args)
}
