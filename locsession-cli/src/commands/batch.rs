//! Batch command - buffer fixes in the engine and read them back.

use locsession::{BatchingOptions, ClientConfig, Location};

use super::common::{answer, check, reply, SimSession};
use crate::error::CliError;

/// Arguments for the batch command.
pub struct BatchArgs {
    /// Fixes buffered in the engine.
    pub buffered: u32,
    /// Fixes to read back.
    pub read: usize,
    /// Trip distance; routine batching when absent.
    pub trip_m: Option<u32>,
}

/// Run the batch command.
pub async fn run(config: ClientConfig, args: BatchArgs) -> Result<(), CliError> {
    let session = SimSession::start(config).await?;

    let options = match args.trip_m {
        Some(trip) => BatchingOptions::trip(1_000, trip),
        None => BatchingOptions::routine(1_000, 0),
    };
    let (callback, rx) = reply();
    session.client.start_batching(options, callback)?;
    check("start batching", answer(rx, "start batching").await?)?;

    session.engine.push_batch(
        (1..=u64::from(args.buffered)).map(|ts| Location::at(ts * 1_000, 48.137, 11.575)),
    );
    if let Some(trip) = args.trip_m {
        // report the whole trip as covered
        session.engine.set_trip_distance(Some(trip));
    }

    let (callback, rx) = reply();
    session.client.get_batched_locations(args.read, callback)?;
    match answer(rx, "batched locations").await? {
        Ok(fixes) => {
            println!("Read {} fixes:", fixes.len());
            for fix in &fixes {
                println!(
                    "  @{}: {:.5}, {:.5}",
                    fix.timestamp_ms, fix.latitude, fix.longitude
                );
            }
        }
        Err(response) => {
            return Err(CliError::Engine {
                operation: "read batched locations",
                response,
            })
        }
    }

    let (callback, rx) = reply();
    session.client.stop_batching(callback)?;
    check("stop batching", answer(rx, "stop batching").await?)?;

    session.finish().await
}
