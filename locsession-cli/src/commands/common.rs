//! Common types and utilities shared across CLI commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use locsession::sim::{EngineHandle, SimulatedEngine};
use locsession::{
    loopback, ClientConfig, ClientEvent, EventForwarder, LocationClient, LocationResponse,
    TelemetrySnapshot,
};

use crate::error::CliError;

/// How long a command waits for any single answer.
pub const ANSWER_TIMEOUT: Duration = Duration::from_secs(5);

/// Default config file location: `<config dir>/locsession/config.ini`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("locsession").join("config.ini"))
}

/// Resolve the client config: explicit file > default file > defaults,
/// then CLI overrides.
pub fn load_config(path: Option<&Path>, socket: Option<String>) -> Result<ClientConfig, CliError> {
    let mut config = match path {
        Some(path) => ClientConfig::from_ini_file(path)?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => {
                debug!(path = %path.display(), "Using default config file");
                ClientConfig::from_ini_file(&path)?
            }
            None => ClientConfig::default(),
        },
    };
    if let Some(socket) = socket {
        config = config.with_socket_name(socket);
    }
    config.validate()?;
    Ok(config)
}

/// A client wired to an in-process simulated engine, with listener events
/// printed as they arrive.
pub struct SimSession {
    pub client: LocationClient,
    pub engine: EngineHandle,
    client_task: JoinHandle<()>,
    printer: JoinHandle<()>,
}

impl SimSession {
    /// Starts engine and client and waits for registration.
    pub async fn start(config: ClientConfig) -> Result<Self, CliError> {
        let (client_link, engine_link) = loopback();
        let (engine, _engine_task) = SimulatedEngine::spawn(engine_link, config.socket_name.clone());

        let (listener, events) = EventForwarder::new();
        let (client, client_task) = LocationClient::builder(config)
            .with_listener(Arc::new(listener))
            .spawn(Arc::new(client_link.transport), client_link.inbound)?;
        let printer = tokio::spawn(print_events(events));

        let session = Self {
            client,
            engine,
            client_task,
            printer,
        };
        session.wait_registered().await?;
        Ok(session)
    }

    /// Polls until the engine has registered the client.
    pub async fn wait_registered(&self) -> Result<(), CliError> {
        let deadline = tokio::time::Instant::now() + ANSWER_TIMEOUT;
        loop {
            if self.client.snapshot().await?.registered {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CliError::Timeout("registration"));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Stops the client and prints its telemetry.
    pub async fn finish(self) -> Result<(), CliError> {
        let telemetry = self.client.metrics();
        self.client.shutdown();
        let _ = self.client_task.await;
        // let queued events print before exiting
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.printer.abort();
        print_telemetry(&telemetry);
        Ok(())
    }
}

/// A callback and the receiver its answer lands in.
pub fn reply<T: Send + 'static>() -> (impl FnOnce(T) + Send + 'static, oneshot::Receiver<T>) {
    let (tx, rx) = oneshot::channel();
    (
        move |value: T| {
            let _ = tx.send(value);
        },
        rx,
    )
}

/// Waits for a callback answer.
pub async fn answer<T>(rx: oneshot::Receiver<T>, what: &'static str) -> Result<T, CliError> {
    match tokio::time::timeout(ANSWER_TIMEOUT, rx).await {
        Ok(Ok(value)) => Ok(value),
        _ => Err(CliError::Timeout(what)),
    }
}

/// Turns a failed response into an error.
pub fn check(operation: &'static str, response: LocationResponse) -> Result<(), CliError> {
    if response.is_success() {
        println!("{}: {}", operation, response);
        Ok(())
    } else {
        Err(CliError::Engine {
            operation,
            response,
        })
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<ClientEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Capabilities(caps) => println!("  engine ready, capabilities {:#x}", caps),
            ClientEvent::Location(fix) => println!(
                "  fix @{}: {:.5}, {:.5}",
                fix.timestamp_ms, fix.latitude, fix.longitude
            ),
            ClientEvent::Nmea {
                timestamp_ms,
                sentence,
            } => println!("  nmea @{}: {}", timestamp_ms, sentence),
            ClientEvent::Batch { fixes, status } => {
                println!("  batch {:?}: {} fixes", status, fixes.len())
            }
            ClientEvent::TripDistanceCompleted(distance) => {
                println!("  trip completed after {} m", distance)
            }
            ClientEvent::GeofenceBreach(breach) => println!(
                "  breach {:?} of geofences {:?} @{}",
                breach.breach_type, breach.ids, breach.timestamp_ms
            ),
            other => println!("  {:?}", other),
        }
    }
}

/// Prints the client telemetry as JSON.
pub fn print_telemetry(telemetry: &TelemetrySnapshot) {
    println!();
    println!("Telemetry");
    println!("─────────");
    match serde_json::to_string_pretty(telemetry) {
        Ok(json) => println!("{}", json),
        Err(e) => println!("(unavailable: {})", e),
    }
}
