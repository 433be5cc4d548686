pub mod admin;
pub mod auth;
pub mod error;
pub mod listings;
pub mod members;
pub mod messages;
pub mod middleware;
pub mod negotiations;
pub mod uploads;

use tracing::warn;
use uuid::Uuid;

/// Parse a stored id, logging instead of failing on corrupt rows.
pub(crate) fn parse_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}
