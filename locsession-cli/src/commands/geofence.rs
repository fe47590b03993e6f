//! Geofence command - add geofences, trigger a breach and remove them.

use locsession::{BreachType, ClientConfig, GeofenceSpec, Location};

use super::common::{answer, reply, SimSession};
use crate::error::CliError;

/// Arguments for the geofence command.
pub struct GeofenceArgs {
    pub count: usize,
    pub radius_m: f64,
}

/// Run the geofence command.
pub async fn run(config: ClientConfig, args: GeofenceArgs) -> Result<(), CliError> {
    let session = SimSession::start(config).await?;

    let specs: Vec<GeofenceSpec> = (0..args.count)
        .map(|i| GeofenceSpec::circle(51.5 + i as f64 * 0.01, -0.12, args.radius_m))
        .collect();
    let (callback, rx) = reply();
    let ids = session.client.add_geofences(specs, callback)?;
    println!("Adding geofences {:?}", ids);
    for (id, response) in answer(rx, "add geofences").await? {
        println!("  {}: {}", id, response);
    }

    if let Some(first) = ids.first() {
        session
            .engine
            .breach(&[*first], BreachType::Enter, Location::at(1_000, 51.5, -0.12));
    }

    let (callback, rx) = reply();
    session.client.remove_geofences(&ids, callback)?;
    let removed = answer(rx, "remove geofences").await?;
    let failed = removed.iter().filter(|(_, r)| !r.is_success()).count();
    println!("Removed {} geofences ({} failed)", removed.len() - failed, failed);

    session.finish().await
}
