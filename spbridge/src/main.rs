use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use log::{error, info};
use spbridge::{config::Config, supervisor};

/// Industrial protocol to Sparkplug B gateway
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "./config.yaml")]
    config: PathBuf,

    /// Log filter, e.g. `debug` or `spbridge_node=trace`. Defaults to $LOG_LEVEL, then `info`
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the configuration, print a summary and exit
    #[arg(long)]
    check: bool,
}

fn init_logging(level: Option<&str>) {
    let level = level
        .map(str::to_string)
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string());
    env_logger::Builder::new().parse_filters(&level).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if args.check {
        println!("Configuration {} is valid", args.config.display());
        println!("{}", config.summary());
        return ExitCode::SUCCESS;
    }

    info!("Starting spbridge with {}", args.config.display());
    match supervisor::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Service startup error: {e}");
            ExitCode::FAILURE
        }
    }
}
