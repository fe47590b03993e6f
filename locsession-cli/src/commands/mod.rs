//! CLI subcommands.

pub mod batch;
pub mod common;
pub mod geofence;
pub mod ping;
pub mod restart;
pub mod track;
