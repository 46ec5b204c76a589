mod contact;
mod id;
mod item;
pub mod messages;
mod routing_table;

use std::time::{SystemTime, UNIX_EPOCH};

pub use contact::*;
pub use id::*;
pub use item::*;
pub use routing_table::*;

/// Milliseconds since the unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or_default()
}
