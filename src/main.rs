mod classifier;
mod config;
mod corpus;
mod engine;
mod extract;
mod jmap;
mod log;
mod scheduler;
mod store;
mod tags;

use clap::Parser;
use classifier::Classifier;
use config::{AccountConfig, Config};
use engine::ReconciliationEngine;
use scheduler::{Scheduler, StopSignal};
use std::path::PathBuf;
use std::process::{Command, ExitCode};
use store::jmap::JmapStore;
use store::MailStore;

/// Sorts incoming mail into category tags and files tagged archive mail
/// into per-category folders, learning from the folders you already keep.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/mailtagger/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Connect to the server, disconnect, and exit 0 on success or 1 on failure
    #[arg(long)]
    test_connection: bool,

    /// Run a single reconciliation cycle and exit
    #[arg(long)]
    once: bool,

    /// Train a fresh model at startup even if a saved one exists
    #[arg(long)]
    retrain: bool,

    /// Print the configured tag-to-folder mapping and exit
    #[arg(long)]
    print_tags: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

pub fn run_password_command(cmd: &str) -> Result<String, String> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .output()
        .map_err(|e| format!("failed to execute password command: {}", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "password command exited with {}: {}",
            output.status, stderr
        ));
    }

    let password = String::from_utf8(output.stdout)
        .map_err(|e| format!("password command output is not valid UTF-8: {}", e))?;

    Ok(password.trim_end_matches('\n').to_string())
}

/// Explicit password first, then the password command, then a prompt.
fn resolve_password(account: &AccountConfig) -> Result<String, String> {
    if let Some(password) = &account.password {
        return Ok(password.clone());
    }
    if let Some(cmd) = &account.password_command {
        return run_password_command(cmd);
    }
    rpassword::prompt_password(format!("Password for {}: ", account.username))
        .map_err(|e| format!("failed to read password: {}", e))
}

fn main() -> ExitCode {
    let args = Args::parse();
    log::init(args.verbose);

    let config_path = args.config.unwrap_or_else(config::default_config_path);
    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(path = %config_path.display(), error = %e, "Error loading config");
            return ExitCode::FAILURE;
        }
    };

    if args.print_tags {
        println!("{}", config.tags.to_string().trim_end());
        return ExitCode::SUCCESS;
    }

    let password = match resolve_password(&config.account) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "No password available");
            return ExitCode::FAILURE;
        }
    };
    let mut store = JmapStore::new(
        &config.account.well_known_url,
        &config.account.username,
        password,
    );

    if args.test_connection {
        return match store.connect() {
            Ok(()) => {
                store.disconnect();
                println!("Connection OK");
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!(url = %config.account.well_known_url, error = %e, "Connection test failed");
                ExitCode::FAILURE
            }
        };
    }

    let stop = StopSignal::from_process_signals();
    let classifier = Classifier::new(&config.model_path);
    let mut engine = ReconciliationEngine::new(&config, store, classifier);

    if let Err(e) = engine.initialize(args.retrain) {
        tracing::error!(error = %e, "Startup failed");
        engine.shutdown();
        return ExitCode::FAILURE;
    }

    let mut scheduler = Scheduler::new(config.mail.poll_interval, stop);
    if args.once {
        scheduler = scheduler.with_max_cycles(1);
    } else {
        tracing::info!(
            interval_secs = config.mail.poll_interval.as_secs(),
            inbox = %config.mail.inbox_folder,
            archive = %config.mail.archive_folder,
            tags = config.tags.len(),
            "Polling"
        );
    }

    match scheduler.run(&mut engine) {
        Ok(cycles) => {
            tracing::info!(cycles, "Exiting");
            ExitCode::SUCCESS
        }
        Err(_) => ExitCode::FAILURE,
    }
}
