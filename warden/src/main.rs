//! Warden - Entry Point
//!
//! Serves function calls under `/e/{project}[/{alias}]` plus the deployment
//! and image build endpoints.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use warden::app::options::AppOptions;
use warden::app::run::run;
use warden::filesys::file::File;
use warden::logs::{init_logging, LogOptions};
use warden::storage::layout::StorageLayout;
use warden::storage::settings::Settings;
use warden::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{} ({})", version.version, version.git_hash),
        }
        return ExitCode::SUCCESS;
    }

    // Retrieve the settings file
    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };
    let settings_file = match cli_args.get("config") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let settings = match Settings::load(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.as_ref().map(PathBuf::from),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the server
    let options = AppOptions::from_settings(&settings, layout);
    info!("Running warden {} with options: {:?}", version.version, options);
    match run(options, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run warden: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            _ => {
                error!("Failed to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
