//! Decodes IDs given on the command line into their component fields,
//! one JSON object per ID.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::process::ExitCode;

#[derive(Serialize)]
struct Dump {
    time: DateTime<Utc>,
    worker_id: u64,
    sequence: u64,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("usage: boreal-dump <id>...");
        return ExitCode::FAILURE;
    }

    for arg in args {
        let id: u64 = match arg.parse() {
            Ok(id) => id,
            Err(err) => {
                eprintln!("{arg}: {err}");
                return ExitCode::FAILURE;
            }
        };
        let parts = boreal::dump(id);
        let dump = Dump {
            time: parts.time.into(),
            worker_id: parts.worker_id,
            sequence: parts.sequence,
        };
        match serde_json::to_string(&dump) {
            Ok(line) => println!("{line}"),
            Err(err) => {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
