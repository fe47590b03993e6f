//! Ping command - round trips through the engine.

use std::time::Instant;

use locsession::ClientConfig;

use super::common::{answer, reply, SimSession};
use crate::error::CliError;

/// Run the ping command.
pub async fn run(config: ClientConfig, count: u32) -> Result<(), CliError> {
    let session = SimSession::start(config).await?;

    for payload in 1..=count {
        let started = Instant::now();
        let (callback, rx) = reply();
        session.client.ping(payload, callback)?;
        match answer(rx, "ping").await? {
            Ok(echo) => println!(
                "ping {}: echo {} in {:.2} ms",
                payload,
                echo,
                started.elapsed().as_secs_f64() * 1_000.0
            ),
            Err(response) => {
                return Err(CliError::Engine {
                    operation: "ping",
                    response,
                })
            }
        }
    }

    session.finish().await
}
