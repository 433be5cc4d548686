use rusqlite::Connection;
use tracing::info;

use crate::error::StoreResult;

pub fn run(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS members (
            id           TEXT PRIMARY KEY,
            email        TEXT NOT NULL UNIQUE,
            handle       TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            course       TEXT,
            avatar_url   TEXT,
            password     TEXT NOT NULL,
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS listings (
            id          TEXT PRIMARY KEY,
            seller_id   TEXT NOT NULL REFERENCES members(id) ON DELETE CASCADE,
            title       TEXT NOT NULL,
            description TEXT NOT NULL,
            price_cents INTEGER NOT NULL CHECK (price_cents > 0),
            category    TEXT NOT NULL,
            condition   TEXT NOT NULL,
            image_url   TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_listings_created
            ON listings(created_at);

        CREATE TABLE IF NOT EXISTS negotiations (
            id          TEXT PRIMARY KEY,
            listing_id  TEXT NOT NULL REFERENCES listings(id) ON DELETE CASCADE,
            buyer_id    TEXT NOT NULL REFERENCES members(id) ON DELETE CASCADE,
            seller_id   TEXT NOT NULL REFERENCES members(id) ON DELETE CASCADE,
            status      TEXT NOT NULL DEFAULT 'pending',
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- One active (non-rejected) negotiation per listing and buyer.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_negotiations_active
            ON negotiations(listing_id, buyer_id) WHERE status != 'rejected';

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            negotiation_id  TEXT NOT NULL REFERENCES negotiations(id) ON DELETE CASCADE,
            sender_id       TEXT NOT NULL REFERENCES members(id) ON DELETE CASCADE,
            content         TEXT NOT NULL,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_negotiation
            ON messages(negotiation_id, created_at);

        CREATE TABLE IF NOT EXISTS admin_grants (
            member_id   TEXT PRIMARY KEY REFERENCES members(id) ON DELETE CASCADE,
            is_master   INTEGER NOT NULL DEFAULT 0,
            granted_by  TEXT REFERENCES members(id) ON DELETE SET NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
