//! Client configuration.
//!
//! [`ClientConfig`] collects every tunable of a [`LocationClient`]. It can be
//! built in code with the `with_*` methods or loaded from an INI file:
//!
//! ```ini
//! [client]
//! socket_name = nav-app
//! max_geofences = 256
//! max_geofences_per_message = 20
//! batch_read_chunk = 20
//!
//! [timeouts]
//! request_ms = 1000
//! long_request_ms = 5000
//! long = SetServerUrl, GetSingleTerrestrialPosition
//! tolerate = SetOperationMode
//! ```
//!
//! [`LocationClient`]: crate::client::LocationClient

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::protocol::MessageId;

/// Default channel name stamped on outbound messages.
pub const DEFAULT_SOCKET_NAME: &str = "locsession-client";

/// Default wait for a correlated response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default wait for multi-step engine operations.
pub const DEFAULT_LONG_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default geofence table capacity.
pub const DEFAULT_MAX_GEOFENCES: usize = 256;

/// Default number of geofences carried by one request.
pub const DEFAULT_MAX_GEOFENCES_PER_MESSAGE: usize = 20;

/// Default number of fixes read back per round trip.
pub const DEFAULT_BATCH_READ_CHUNK: usize = 20;

/// Default message loop queue depth.
pub const DEFAULT_COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Request kinds that can be named in the `[timeouts]` section.
const CONFIGURABLE_KINDS: &[MessageId] = &[
    MessageId::ClientRegister,
    MessageId::UpdateCallbacks,
    MessageId::RequestAidingData,
    MessageId::StartTracking,
    MessageId::StopTracking,
    MessageId::UpdateTrackingOptions,
    MessageId::StartBatching,
    MessageId::StopBatching,
    MessageId::UpdateBatchingOptions,
    MessageId::GetBatchedLocations,
    MessageId::AddGeofences,
    MessageId::RemoveGeofences,
    MessageId::ModifyGeofences,
    MessageId::PauseGeofences,
    MessageId::ResumeGeofences,
    MessageId::UpdateNetworkAvailability,
    MessageId::GetGnssEnergyConsumed,
    MessageId::GetSingleTerrestrialPosition,
    MessageId::SetOperationMode,
    MessageId::SetServerUrl,
    MessageId::PingTest,
];

/// Configuration loading or validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] ini::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] ini::ParseError),

    #[error("invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// =============================================================================
// Timeout policy
// =============================================================================

/// Which timeout a request kind waits for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeoutClass {
    #[default]
    Short,
    /// Multi-step engine operations.
    Long,
}

/// What a timed-out request reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OnTimeout {
    /// Surface [`LocationResponse::Timeout`](crate::error::LocationResponse::Timeout).
    #[default]
    Fail,
    /// Report success; the engine proceeds regardless of the missing ack.
    TreatAsSuccess,
}

/// Timeout handling for one request kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeoutRule {
    pub class: TimeoutClass,
    pub on_timeout: OnTimeout,
}

/// Per-request-kind timeout table.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeoutPolicy {
    short: Duration,
    long: Duration,
    rules: HashMap<MessageId, TimeoutRule>,
}

impl TimeoutPolicy {
    /// Empty table: every kind waits `short` and fails on timeout.
    pub fn new(short: Duration, long: Duration) -> Self {
        Self {
            short,
            long,
            rules: HashMap::new(),
        }
    }

    /// Sets the rule for one request kind.
    pub fn with_rule(mut self, id: MessageId, rule: TimeoutRule) -> Self {
        self.rules.insert(id, rule);
        self
    }

    pub fn rule(&self, id: MessageId) -> TimeoutRule {
        self.rules.get(&id).copied().unwrap_or_default()
    }

    /// How long a request of this kind may wait.
    pub fn timeout_for(&self, id: MessageId) -> Duration {
        match self.rule(id).class {
            TimeoutClass::Short => self.short,
            TimeoutClass::Long => self.long,
        }
    }

    pub fn on_timeout(&self, id: MessageId) -> OnTimeout {
        self.rule(id).on_timeout
    }

    pub fn short(&self) -> Duration {
        self.short
    }

    pub fn long(&self) -> Duration {
        self.long
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT, DEFAULT_LONG_REQUEST_TIMEOUT)
            .with_rule(
                MessageId::SetOperationMode,
                TimeoutRule {
                    class: TimeoutClass::Short,
                    on_timeout: OnTimeout::TreatAsSuccess,
                },
            )
            .with_rule(
                MessageId::SetServerUrl,
                TimeoutRule {
                    class: TimeoutClass::Long,
                    on_timeout: OnTimeout::Fail,
                },
            )
            .with_rule(
                MessageId::GetSingleTerrestrialPosition,
                TimeoutRule {
                    class: TimeoutClass::Long,
                    on_timeout: OnTimeout::Fail,
                },
            )
    }
}

// =============================================================================
// Client configuration
// =============================================================================

/// Configuration for a [`LocationClient`](crate::client::LocationClient).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Channel name stamped on every outbound message.
    pub socket_name: String,

    /// Per-request-kind timeouts.
    pub timeout_policy: TimeoutPolicy,

    /// Geofence table capacity.
    pub max_geofences: usize,

    /// Geofences carried by a single request.
    pub max_geofences_per_message: usize,

    /// Fixes read back per round trip.
    pub batch_read_chunk: usize,

    /// Message loop queue depth.
    pub command_channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_NAME)
    }
}

impl ClientConfig {
    /// Creates a config with defaults and the given channel name.
    pub fn new(socket_name: impl Into<String>) -> Self {
        Self {
            socket_name: socket_name.into(),
            timeout_policy: TimeoutPolicy::default(),
            max_geofences: DEFAULT_MAX_GEOFENCES,
            max_geofences_per_message: DEFAULT_MAX_GEOFENCES_PER_MESSAGE,
            batch_read_chunk: DEFAULT_BATCH_READ_CHUNK,
            command_channel_capacity: DEFAULT_COMMAND_CHANNEL_CAPACITY,
        }
    }

    pub fn with_socket_name(mut self, name: impl Into<String>) -> Self {
        self.socket_name = name.into();
        self
    }

    /// Set the short request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_policy.short = timeout;
        self
    }

    /// Set the timeout for multi-step engine operations.
    pub fn with_long_request_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_policy.long = timeout;
        self
    }

    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }

    pub fn with_max_geofences(mut self, max: usize) -> Self {
        self.max_geofences = max;
        self
    }

    pub fn with_max_geofences_per_message(mut self, max: usize) -> Self {
        self.max_geofences_per_message = max;
        self
    }

    pub fn with_batch_read_chunk(mut self, chunk: usize) -> Self {
        self.batch_read_chunk = chunk;
        self
    }

    pub fn with_command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity;
        self
    }

    /// Checks the config for values the client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.socket_name.is_empty() {
            return Err(ConfigError::Invalid("socket_name must not be empty".into()));
        }
        if self.timeout_policy.short.is_zero() || self.timeout_policy.long.is_zero() {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.max_geofences == 0
            || self.max_geofences_per_message == 0
            || self.batch_read_chunk == 0
            || self.command_channel_capacity == 0
        {
            return Err(ConfigError::Invalid("capacities must be non-zero".into()));
        }
        if self.max_geofences_per_message > self.max_geofences {
            return Err(ConfigError::Invalid(format!(
                "max_geofences_per_message ({}) exceeds max_geofences ({})",
                self.max_geofences_per_message, self.max_geofences
            )));
        }
        Ok(())
    }

    /// Loads a config from an INI file, starting from defaults.
    pub fn from_ini_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path)?;
        Self::from_ini(&ini)
    }

    /// Loads a config from INI text, starting from defaults.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text)?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("client")) {
            if let Some(name) = section.get("socket_name") {
                config.socket_name = name.trim().to_string();
            }
            if let Some(v) = section.get("max_geofences") {
                config.max_geofences = parse_number("max_geofences", v)?;
            }
            if let Some(v) = section.get("max_geofences_per_message") {
                config.max_geofences_per_message = parse_number("max_geofences_per_message", v)?;
            }
            if let Some(v) = section.get("batch_read_chunk") {
                config.batch_read_chunk = parse_number("batch_read_chunk", v)?;
            }
            if let Some(v) = section.get("command_channel_capacity") {
                config.command_channel_capacity = parse_number("command_channel_capacity", v)?;
            }
        }

        if let Some(section) = ini.section(Some("timeouts")) {
            if let Some(v) = section.get("request_ms") {
                config.timeout_policy.short =
                    Duration::from_millis(parse_number("request_ms", v)?);
            }
            if let Some(v) = section.get("long_request_ms") {
                config.timeout_policy.long =
                    Duration::from_millis(parse_number("long_request_ms", v)?);
            }
            if let Some(v) = section.get("long") {
                for id in parse_kinds("long", v)? {
                    let mut rule = config.timeout_policy.rule(id);
                    rule.class = TimeoutClass::Long;
                    config.timeout_policy.rules.insert(id, rule);
                }
            }
            if let Some(v) = section.get("tolerate") {
                for id in parse_kinds("tolerate", v)? {
                    let mut rule = config.timeout_policy.rule(id);
                    rule.on_timeout = OnTimeout::TreatAsSuccess;
                    config.timeout_policy.rules.insert(id, rule);
                }
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}

fn parse_kinds(key: &str, value: &str) -> Result<Vec<MessageId>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            CONFIGURABLE_KINDS
                .iter()
                .copied()
                .find(|id| format!("{:?}", id).eq_ignore_ascii_case(name))
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: name.to_string(),
                })
        })
        .collect()
}
