//! Restart command - show sessions surviving an engine restart.

use locsession::protocol::MessageId;
use locsession::{ClientConfig, GeofenceSpec, TrackingOptions};

use super::common::{answer, check, reply, SimSession};
use crate::error::CliError;

/// Run the restart command.
pub async fn run(config: ClientConfig) -> Result<(), CliError> {
    let session = SimSession::start(config).await?;

    let (callback, rx) = reply();
    session
        .client
        .start_tracking(TrackingOptions::new(1_000, 0), callback)?;
    check("start tracking", answer(rx, "start tracking").await?)?;

    let (callback, rx) = reply();
    let ids = session
        .client
        .add_geofences(vec![GeofenceSpec::circle(40.71, -74.0, 300.0)], callback)?;
    answer(rx, "add geofences").await?;

    println!("Restarting engine...");
    session.engine.restart();
    session.wait_registered().await?;
    // the resumed start is the last thing the loop sends
    if !session
        .engine
        .wait_for(MessageId::StartTracking, 2, super::common::ANSWER_TIMEOUT)
        .await
    {
        return Err(CliError::Timeout("resumed tracking"));
    }

    let snapshot = session.client.snapshot().await?;
    println!("After restart:");
    println!("  registered:   {}", snapshot.registered);
    println!("  tracking:     {:?}", snapshot.tracking);
    println!("  geofences:    {:?} (added as {:?})", snapshot.geofences, ids);
    println!("  subscription: {}", snapshot.subscription);
    println!(
        "  start requests seen by engine: {}",
        session.engine.count(MessageId::StartTracking)
    );

    session.finish().await
}
