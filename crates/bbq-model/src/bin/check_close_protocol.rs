//! CLI for model checking the queue's close protocol.
//!
//! # Usage
//!
//! ```bash
//! # Default: 2 producers, 2 consumers, capacity 1, locked registration
//! cargo run -p bbq-model --bin check-close-protocol
//!
//! # Show the race in check-then-increment registration
//! cargo run -p bbq-model --bin check-close-protocol -- --registration atomic
//!
//! # Machine-readable report
//! cargo run -p bbq-model --bin check-close-protocol -- --producers 3 --json
//! ```
//!
//! Exits non-zero when a safety property is violated.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use bbq_model::{check, ModelConfig, Registration};

#[derive(Debug, Parser)]
#[command(name = "check-close-protocol", about = "Exhaustively check the queue close protocol")]
struct Args {
    /// Threads that each perform one put
    #[arg(long, default_value_t = 2)]
    producers: usize,

    /// Threads that each perform one take
    #[arg(long, default_value_t = 2)]
    consumers: usize,

    /// Queue capacity
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    capacity: u16,

    /// How waiters register before blocking
    #[arg(long, value_enum, default_value_t = Registration::Locked)]
    registration: Registration,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .try_init();

    let config = ModelConfig {
        producers: args.producers,
        consumers: args.consumers,
        capacity: usize::from(args.capacity),
        registration: args.registration,
    };
    let report = check(&config);

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Failed to serialize report: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        print!("{}", report);
    }

    if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
