use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing::error;

use pshistory_lib::{describe_capabilities, extract_history_with_config, load_config, ScanConfig};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Pretty multi-line logs with file:line
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract and parse ConsoleHost_history.txt from a disk image
    Extract {
        /// Path to the image (.E01, .dd, .raw, .001, ...)
        #[clap(value_parser)]
        image: String,

        /// JSON scan configuration
        #[clap(short, long, value_parser)]
        config: Option<String>,

        /// Single-line JSON output
        #[clap(long)]
        compact: bool,
    },
    /// Print the capabilities descriptor
    Info,
}

fn to_json<T: serde::Serialize>(value: &T, compact: bool) -> Result<String, serde_json::Error> {
    if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    // Control log level with RUST_LOG, e.g. RUST_LOG=pshistory_lib::walker=trace
    if args.verbose {
        pshistory_lib::logging::init_verbose();
    } else {
        pshistory_lib::logging::init();
    }

    match args.command {
        Command::Info => match to_json(&describe_capabilities(), false) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(err) => {
                error!(error = %err, "Failed to serialize capabilities");
                ExitCode::FAILURE
            }
        },
        Command::Extract { image, config, compact } => {
            let config = match config {
                Some(path) => match load_config(&path) {
                    Ok(config) => config,
                    Err(err) => {
                        error!(error = %err, "Failed to load configuration");
                        return ExitCode::FAILURE;
                    }
                },
                None => ScanConfig::default(),
            };

            let report = extract_history_with_config(&image, &config);
            match to_json(&report, compact) {
                Ok(json) => println!("{}", json),
                Err(err) => {
                    error!(error = %err, "Failed to serialize report");
                    return ExitCode::FAILURE;
                }
            }

            if report.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
