//! Persistent device identity.

use lineup_types::DeviceId;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

/// Loads the device id stored beside the database (`<db>.device_id`), or
/// generates and saves a new one. In-memory databases get a fresh id every time.
pub fn load_or_create_device_id(db_path: Option<&Path>) -> DeviceId {
    let Some(db_path) = db_path else {
        return DeviceId::new();
    };
    let id_path = db_path.with_extension("device_id");

    if let Ok(contents) = std::fs::read_to_string(&id_path) {
        match Uuid::parse_str(contents.trim()) {
            Ok(uuid) => {
                info!("loaded device id {uuid}");
                return DeviceId::from(uuid.to_string());
            }
            Err(_) => warn!("corrupt device id file at {}, generating a new one", id_path.display()),
        }
    }

    let device = DeviceId::new();
    if let Err(e) = std::fs::write(&id_path, device.as_str()) {
        warn!("failed to persist device id to {}: {e}", id_path.display());
    } else {
        info!("generated and saved device id {device}");
    }
    device
}
