//! Track command - run a tracking session and stream simulated fixes.

use std::time::Duration;

use locsession::{ClientConfig, EventMask, Location, TrackingOptions};

use super::common::{answer, check, reply, SimSession};
use crate::error::CliError;

/// Arguments for the track command.
pub struct TrackArgs {
    pub interval_ms: u32,
    pub distance_m: u32,
    pub fixes: u32,
    pub nmea: bool,
}

/// Run the track command.
pub async fn run(config: ClientConfig, args: TrackArgs) -> Result<(), CliError> {
    let session = SimSession::start(config).await?;

    let mut reports = EventMask::POSITION;
    if args.nmea {
        reports |= EventMask::NMEA;
    }
    let options = TrackingOptions::new(args.interval_ms, args.distance_m).with_reports(reports);
    println!(
        "Tracking every {} ms / {} m{}",
        args.interval_ms,
        args.distance_m,
        if options.is_passive() { " (passive)" } else { "" }
    );

    let (callback, rx) = reply();
    session.client.start_tracking(options, callback)?;
    check("start tracking", answer(rx, "start tracking").await?)?;

    for n in 0..args.fixes {
        let timestamp_ms = 1_000 * u64::from(n + 1);
        let fix = Location::at(timestamp_ms, 52.52 + f64::from(n) * 1e-4, 13.405);
        session.engine.location(fix);
        if args.nmea {
            session
                .engine
                .nmea(timestamp_ms, &format!("$GPGGA,{}\r\n$GPRMC,{}\r\n", n, n));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let (callback, rx) = reply();
    session.client.stop_tracking(callback)?;
    check("stop tracking", answer(rx, "stop tracking").await?)?;

    session.finish().await
}
