//! Lineup preference core.
//!
//! [`LineupCore`] wires the crates together for one device:
//!
//! - `lineup-store` keeps the marks and profile metadata
//! - `lineup-sync` syncs the owner profile with the remote key/value store
//! - `lineup-cache` keeps the display rows coherent with both
//!
//! Profile switches, imports and deletions suspend the cache coordinator
//! around their bulk writes so the list refreshes once.

mod config;
mod device;
mod error;
mod lineup;

pub use config::LineupConfig;
pub use device::load_or_create_device_id;
pub use error::{CoreError, CoreResult};
pub use lineup::LineupCore;

/// Installs a stderr `tracing` subscriber filtered by `RUST_LOG`, `info` by
/// default. Calling it again is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
