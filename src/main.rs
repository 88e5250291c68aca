//! Black-box test orchestrator for IRC daemons
//!
//! Builds and starts the server under test, drives simulated clients
//! against it from a YAML suite, and reports pass/fail per case.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;

use ircheck::common::{logging, Config};
use ircheck::scenario::SuiteFile;
use ircheck::server::Supervisor;
use ircheck::stress::{self, StressOpts};
use ircheck::transport::TcpTransport;
use ircheck::Harness;

#[derive(Parser)]
#[command(name = "ircheck", about = "Black-box test orchestrator for IRC daemons")]
#[command(version, long_about = None)]
struct Cli {
    /// Path to the harness configuration file (default: ircheck.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a YAML test suite against the server
    Run {
        /// Path to the suite file
        suite: PathBuf,

        /// Assume the server is already listening; skip build and spawn
        #[arg(long)]
        no_server: bool,
    },

    /// Flood the server while a slow consumer throttles its own socket
    Stress {
        /// Stop after this many messages even if the server keeps up
        #[arg(long, default_value = "100000")]
        messages: u64,

        /// Nickname of the slow consumer the flood is aimed at
        #[arg(long, default_value = "bob")]
        target: String,

        /// Assume the server is already listening; skip build and spawn
        #[arg(long)]
        no_server: bool,
    },
}

#[tokio::main]
async fn main() {
    logging::init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Run { suite, no_server } => {
            run_suite(cli.config.as_deref(), &suite, no_server).await
        }
        Commands::Stress {
            messages,
            target,
            no_server,
        } => run_stress(cli.config.as_deref(), StressOpts { messages, target }, no_server).await,
    };

    match outcome {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

async fn start_server(config: &Config, no_server: bool) -> ircheck::Result<Option<Supervisor>> {
    if no_server || !config.server.autostart {
        return Ok(None);
    }
    Ok(Some(Supervisor::start(config).await?))
}

async fn run_suite(
    config_path: Option<&Path>,
    suite_path: &Path,
    no_server: bool,
) -> ircheck::Result<bool> {
    let config = Config::load(config_path)?;
    let suite = SuiteFile::load(suite_path)?;
    let supervisor = start_server(&config, no_server).await?;

    let transport = TcpTransport::new(config.server_addr());
    let mut harness = Harness::new(&config, Box::new(transport));
    let summary = harness.run_suite(&suite).await;
    harness.shutdown().await;

    if let Some(supervisor) = supervisor {
        supervisor.stop().await;
    }
    Ok(summary.all_passed())
}

async fn run_stress(
    config_path: Option<&Path>,
    opts: StressOpts,
    no_server: bool,
) -> ircheck::Result<bool> {
    let config = Config::load(config_path)?;
    let supervisor = start_server(&config, no_server).await?;

    let report = stress::run(&config, &opts).await;

    if let Some(supervisor) = supervisor {
        supervisor.stop().await;
    }
    let report = report?;

    println!("\n{}", "Stress run finished".blue().bold());
    println!("  messages sent: {}", report.messages_sent);
    println!("  bytes read slowly: {}", report.bytes_read);
    if report.target_vanished {
        println!(
            "  {}",
            "server dropped the slow consumer (401 observed)".yellow()
        );
    }
    Ok(true)
}
