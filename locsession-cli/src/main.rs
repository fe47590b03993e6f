//! LocSession CLI - drive the location client against a simulated engine.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::info;

use locsession::logging::{init_logging, LoggingConfig};

use commands::batch::BatchArgs;
use commands::geofence::GeofenceArgs;
use commands::track::TrackArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "locsession", version, about = "Location session client test application")]
struct Cli {
    /// Client config file (INI). Defaults to the user config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Channel name the client registers under
    #[arg(long, global = true)]
    socket: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a tracking session and print simulated fixes
    Track {
        /// Minimum interval between fixes in milliseconds (0 with 0 distance is passive)
        #[arg(long, default_value_t = 1000)]
        interval_ms: u32,

        /// Minimum distance between fixes in meters
        #[arg(long, default_value_t = 0)]
        distance_m: u32,

        /// Number of fixes the engine reports
        #[arg(long, default_value_t = 5)]
        fixes: u32,

        /// Also subscribe to NMEA sentences
        #[arg(long)]
        nmea: bool,
    },

    /// Buffer fixes in the engine and read them back
    Batch {
        /// Fixes buffered by the engine
        #[arg(long, default_value_t = 10)]
        buffered: u32,

        /// Fixes to read back
        #[arg(long, default_value_t = 5)]
        read: usize,

        /// Trip distance in meters; routine batching when omitted
        #[arg(long)]
        trip_m: Option<u32>,
    },

    /// Add geofences, trigger a breach and remove them
    Geofence {
        /// Number of geofences
        #[arg(long, default_value_t = 3)]
        count: usize,

        /// Radius in meters
        #[arg(long, default_value_t = 200.0)]
        radius_m: f64,
    },

    /// Round trips through the engine
    Ping {
        #[arg(long, default_value_t = 3)]
        count: u32,
    },

    /// Restart the engine and show what the client re-established
    Restart,

    /// Show the default config file path
    ConfigPath,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut logging = LoggingConfig::default().with_verbosity(cli.verbose);
    if let Some(dir) = cli.log_dir {
        logging = logging.with_log_dir(dir);
    }
    let _guard = init_logging(&logging)?;
    info!(version = locsession::VERSION, "locsession starting");

    if let Commands::ConfigPath = cli.command {
        match commands::common::default_config_path() {
            Some(path) => println!("{}", path.display()),
            None => println!("(no config directory on this platform)"),
        }
        return Ok(());
    }

    let config = commands::common::load_config(cli.config.as_deref(), cli.socket)?;
    match cli.command {
        Commands::Track {
            interval_ms,
            distance_m,
            fixes,
            nmea,
        } => {
            commands::track::run(
                config,
                TrackArgs {
                    interval_ms,
                    distance_m,
                    fixes,
                    nmea,
                },
            )
            .await
        }
        Commands::Batch {
            buffered,
            read,
            trip_m,
        } => {
            commands::batch::run(
                config,
                BatchArgs {
                    buffered,
                    read,
                    trip_m,
                },
            )
            .await
        }
        Commands::Geofence { count, radius_m } => {
            commands::geofence::run(config, GeofenceArgs { count, radius_m }).await
        }
        Commands::Ping { count } => commands::ping::run(config, count).await,
        Commands::Restart => commands::restart::run(config).await,
        Commands::ConfigPath => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["locsession", "ping", "--count", "2", "-vv", "--socket", "x"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.socket.as_deref(), Some("x"));
        assert!(matches!(cli.command, Commands::Ping { count: 2 }));
    }
}
