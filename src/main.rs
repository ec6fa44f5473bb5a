use anyhow::Result;
use clap::{Parser, Subcommand};
use idlewatch::{Observation, probe, wait_for_idle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Idlewatch - observe the busy/idle state published by an instrumented process"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report the current state once; exits 0 when idle, 1 when busy
    Probe {
        /// Print the observation as JSON
        #[arg(long)]
        json: bool,
        /// Path to the state file
        state_file: PathBuf,
    },
    /// Block until the process is idle; exits 1 on timeout
    Wait {
        /// Interval between probes, in milliseconds
        #[arg(long, default_value_t = 10)]
        poll_ms: u64,
        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Only accept an idle counter greater than this one
        #[arg(long)]
        after: Option<u64>,
        /// Path to the state file
        state_file: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Command::Probe { json, state_file } => {
            let observation = probe(&state_file)?;
            if json {
                println!("{}", serde_json::to_string(&observation)?);
            } else {
                println!("{observation}");
            }
            Ok(exit_code(observation.is_idle()))
        }
        Command::Wait {
            poll_ms,
            timeout_ms,
            after,
            state_file,
        } => {
            let seen = wait_for_idle(
                &state_file,
                after,
                Duration::from_millis(poll_ms),
                timeout_ms.map(Duration::from_millis),
            )?;
            match seen {
                Some(times_idle) => println!("{}", Observation::Idle { times_idle }),
                None => println!("{}", Observation::Busy),
            }
            Ok(exit_code(seen.is_some()))
        }
    }
}

fn exit_code(idle: bool) -> ExitCode {
    if idle {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
