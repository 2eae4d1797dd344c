//! rctl CLI - Main entry point

mod cli;

use clap::{Parser, Subcommand};
use rctl_foundation::{JsonStore, RctlConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// rctl - run commands and copy files through sessions
#[derive(Parser, Debug)]
#[command(name = "rctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one command, streaming its output
    Run {
        /// Overall timeout in seconds
        #[arg(long, value_parser = parse_secs)]
        timeout: Option<Duration>,

        /// Maximum silence between two output lines, in seconds
        #[arg(long, value_parser = parse_secs)]
        output_timeout: Option<Duration>,

        /// Expected exit code
        #[arg(long, default_value_t = 0, conflicts_with = "no_check")]
        expect: i32,

        /// Do not check the exit code
        #[arg(long)]
        no_check: bool,

        /// Print stderr separately instead of merging it into stdout
        #[arg(long)]
        separate_stderr: bool,

        /// Command line, passed to the shell
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Run several commands concurrently and report their states
    Parallel {
        /// Overall timeout per command, in seconds
        #[arg(long, value_parser = parse_secs)]
        timeout: Option<Duration>,

        /// Commands, one shell line each
        #[arg(required = true)]
        commands: Vec<String>,
    },
    /// Copy a file or directory tree
    Copy {
        /// Bytes per chunk (defaults to the configured chunk size)
        #[arg(long)]
        chunk_size: Option<usize>,

        src: PathBuf,

        dest: PathBuf,
    },
    /// Show or edit the configuration files
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the merged configuration
    Show,
    /// Set a value, e.g. `rctl config set exec.timeoutSecs 30`
    Set {
        /// Write the project file (.rctl/config.json) instead of the global one
        #[arg(long)]
        project: bool,

        key: String,

        value: String,
    },
    /// Remove a value so the next layer applies
    Unset {
        /// Edit the project file instead of the global one
        #[arg(long)]
        project: bool,

        key: String,
    },
    /// Delete a config file
    Reset {
        /// Delete the project file instead of the global one
        #[arg(long)]
        project: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let config = RctlConfig::load().unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config: {}", e);
        RctlConfig::new()
    });

    let code = match args.command {
        Command::Run {
            timeout,
            output_timeout,
            expect,
            no_check,
            separate_stderr,
            command,
        } => {
            let options = cli::RunOptions {
                timeout,
                output_timeout,
                expected_exit_code: (!no_check).then_some(expect),
                separate_stderr,
            };
            cli::run(&config, &command.join(" "), options).await?
        }
        Command::Parallel { timeout, commands } => {
            cli::run_parallel(&config, &commands, timeout).await?
        }
        Command::Copy {
            chunk_size,
            src,
            dest,
        } => {
            let chunk_size = chunk_size.unwrap_or(config.copy.chunk_size());
            cli::copy(&config, &src, &dest, chunk_size).await?
        }
        Command::Config { action } => match action {
            ConfigAction::Show => {
                let layers = [
                    ("global", JsonStore::global()?),
                    ("project", JsonStore::current_project()?),
                ];
                cli::config_show(&config, &layers)?
            }
            ConfigAction::Set {
                project,
                key,
                value,
            } => cli::config_set(&config_store(project)?, &key, &value)?,
            ConfigAction::Unset { project, key } => {
                cli::config_unset(&config_store(project)?, &key)?
            }
            ConfigAction::Reset { project } => cli::config_reset(&config_store(project)?)?,
        },
    };

    std::process::exit(code);
}

fn config_store(project: bool) -> rctl_foundation::Result<JsonStore> {
    if project {
        JsonStore::current_project()
    } else {
        JsonStore::global()
    }
}

fn parse_secs(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|e| format!("invalid number of seconds '{}': {}", value, e))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration '{}': {}", value, e))
}
