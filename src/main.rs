//! Process entry point. Argument parsing, the lock file, and the log file
//! are all resolved before the event loop is built — a failure to open the
//! log file is fatal at startup rather than silently dropped — and once
//! `Server` is running, everything else is its problem.

use liso::config::Config;
use liso::server::Server;
use liso_log::{errors, info};
use std::process::id;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match Config::parse_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("liso: {e}");
            std::process::exit(1);
        }
    };

    match liso_log::FileLog::open(&config.log_file) {
        Ok(log) => liso_log::install(log),
        Err(e) => {
            eprintln!("liso: opening log file '{}': {e}", config.log_file.display());
            std::process::exit(1);
        }
    };

    if let Err(e) = std::fs::write(&config.lock_file, format!("{}\n", id())) {
        errors!("writing lock file '{}': {}", config.lock_file.display(), e);
        std::process::exit(1);
    }

    info!("liso starting on port {}", config.http_port);

    let exit_code = match Server::bind(config) {
        Ok(mut server) => match server.run() {
            Ok(()) => 0,
            Err(e) => {
                errors!("event loop exited: {}", e);
                1
            }
        },
        Err(e) => {
            errors!("startup failed: {}", e);
            1
        }
    };

    info!("liso shutting down");
    liso_log::close();
    std::process::exit(exit_code);
}
