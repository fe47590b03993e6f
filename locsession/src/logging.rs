//! Tracing subscriber set-up for binaries embedding the client.
//!
//! Console output always; a daily rolling file when a log directory is
//! configured. `RUST_LOG` overrides the configured directive.

use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directive used when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_LOG_DIRECTIVE: &str = "locsession=info";

/// Log file name prefix; the appender adds the date.
pub const DEFAULT_LOG_FILE_PREFIX: &str = "locsession.log";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log directive {directive:?}: {reason}")]
    Directive { directive: String, reason: String },

    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

/// Logging configuration.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// `EnvFilter` directive.
    pub directive: String,
    /// Directory for the rolling log file; console only when `None`.
    pub log_dir: Option<PathBuf>,
    pub file_prefix: String,
    /// Include the event target in console lines.
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directive: DEFAULT_LOG_DIRECTIVE.to_string(),
            log_dir: None,
            file_prefix: DEFAULT_LOG_FILE_PREFIX.to_string(),
            with_target: false,
        }
    }
}

impl LoggingConfig {
    /// Directive for a `-v` count: 0 info, 1 debug, 2 and up trace.
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.directive = match verbosity {
            0 => DEFAULT_LOG_DIRECTIVE.to_string(),
            1 => "locsession=debug".to_string(),
            _ => "locsession=trace".to_string(),
        };
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }

    fn filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.directive).map_err(|err| LoggingError::Directive {
            directive: self.directive.clone(),
            reason: err.to_string(),
        })
    }
}

/// Installs the global subscriber.
///
/// The returned guard flushes the file writer when dropped; keep it alive
/// for as long as the process logs.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = config.filter()?;
    let console = fmt::layer().with_target(config.with_target);

    let (file, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInstalled)?;

    Ok(guard)
}
