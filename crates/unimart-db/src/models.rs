//! Database row types — these map directly to SQLite rows.
//! Distinct from the unimart-types API models to keep the DB layer
//! independent; timestamps stay as stored text until the API layer needs
//! them.

use chrono::{DateTime, Utc};
use tracing::warn;

#[derive(Debug)]
pub struct MemberRow {
    pub id: String,
    pub email: String,
    pub handle: String,
    pub display_name: String,
    pub course: Option<String>,
    pub avatar_url: Option<String>,
    pub password: String,
    pub created_at: String,
}

/// Member plus admin flags, for the moderation roster.
pub struct AdminMemberRow {
    pub id: String,
    pub email: String,
    pub handle: String,
    pub display_name: String,
    pub course: Option<String>,
    pub is_admin: bool,
    pub is_master: bool,
    pub created_at: String,
}

#[derive(Debug)]
pub struct ListingRow {
    pub id: String,
    pub seller_id: String,
    pub seller_handle: String,
    pub title: String,
    pub description: String,
    pub price_cents: i64,
    pub category: String,
    pub condition: String,
    pub image_url: Option<String>,
    pub created_at: String,
}

#[derive(Debug)]
pub struct NegotiationRow {
    pub id: String,
    pub listing_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub status: String,
    pub created_at: String,
}

/// Negotiation joined with listing title and both handles for display.
#[derive(Debug)]
pub struct NegotiationDetailRow {
    pub id: String,
    pub listing_id: String,
    pub listing_title: String,
    pub buyer_id: String,
    pub buyer_handle: String,
    pub seller_id: String,
    pub seller_handle: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug)]
pub struct MessageRow {
    pub id: String,
    pub negotiation_id: String,
    pub sender_id: String,
    pub sender_handle: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug)]
pub struct GrantRow {
    pub member_id: String,
    pub handle: String,
    pub is_master: bool,
    pub granted_by: Option<String>,
    pub created_at: String,
}

/// Parse a stored timestamp. SQLite's datetime('now') writes
/// "YYYY-MM-DD HH:MM:SS" without a timezone, so fall back to parsing as
/// naive UTC before giving up.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sqlite_datetime_format() {
        let ts = parse_timestamp("2026-03-01 12:30:00");
        assert_eq!(ts.to_rfc3339(), "2026-03-01T12:30:00+00:00");
    }

    #[test]
    fn parses_rfc3339() {
        let ts = parse_timestamp("2026-03-01T12:30:00Z");
        assert_eq!(ts.to_rfc3339(), "2026-03-01T12:30:00+00:00");
    }
}
