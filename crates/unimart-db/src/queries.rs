use rusqlite::{Connection, OptionalExtension, params};

use unimart_types::models::NegotiationStatus;

use crate::Database;
use crate::error::{StoreError, StoreResult};
use crate::models::{
    AdminMemberRow, GrantRow, ListingRow, MemberRow, MessageRow, NegotiationDetailRow,
    NegotiationRow,
};

/// Which side of a negotiation a member is on, for roster filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    Buying,
    Selling,
}

impl Database {
    // -- Members --

    /// Register a new member. Duplicate email or handle is a validation
    /// failure surfaced to the caller.
    pub fn create_member(
        &self,
        id: &str,
        email: &str,
        handle: &str,
        display_name: &str,
        course: Option<&str>,
        password_hash: &str,
    ) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO members (id, email, handle, display_name, course, password)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, email, handle, display_name, course, password_hash],
            )
            .map_err(StoreError::from)
            .map_err(|e| {
                if e.is_constraint_violation() {
                    StoreError::Validation("Email or handle already registered".into())
                } else {
                    e
                }
            })?;
            Ok(())
        })
    }

    /// Idempotent provisioning: returns the member id for an email, creating
    /// the row if absent. Used by the bootstrap seeder, never by reads.
    pub fn ensure_member(
        &self,
        id: &str,
        email: &str,
        handle: &str,
        display_name: &str,
        password_hash: &str,
    ) -> StoreResult<String> {
        self.with_conn(|conn| {
            if let Some(existing) = query_member_by_email(conn, email)? {
                return Ok(existing.id);
            }
            conn.execute(
                "INSERT INTO members (id, email, handle, display_name, password)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, email, handle, display_name, password_hash],
            )?;
            Ok(id.to_string())
        })
    }

    pub fn get_member_by_email(&self, email: &str) -> StoreResult<Option<MemberRow>> {
        self.with_conn(|conn| query_member_by_email(conn, email))
    }

    pub fn get_member_by_id(&self, id: &str) -> StoreResult<Option<MemberRow>> {
        self.with_conn(|conn| query_member_by_id(conn, id))
    }

    /// Merge profile edits into the member row. `course` / `avatar_url`
    /// passed as an empty string clear the stored value.
    pub fn update_profile(
        &self,
        member_id: &str,
        display_name: Option<&str>,
        course: Option<&str>,
        avatar_url: Option<&str>,
    ) -> StoreResult<MemberRow> {
        self.with_conn(|conn| {
            let current = query_member_by_id(conn, member_id)?
                .ok_or_else(|| StoreError::NotFound(format!("Member not found: {member_id}")))?;

            let display_name = match display_name {
                Some(name) => {
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(StoreError::Validation(
                            "Display name must not be empty".into(),
                        ));
                    }
                    name.to_string()
                }
                None => current.display_name,
            };
            let course = merge_optional(course, current.course);
            let avatar_url = merge_optional(avatar_url, current.avatar_url);

            conn.execute(
                "UPDATE members SET display_name = ?2, course = ?3, avatar_url = ?4 WHERE id = ?1",
                params![member_id, display_name, course, avatar_url],
            )?;

            query_member_by_id(conn, member_id)?
                .ok_or_else(|| StoreError::NotFound(format!("Member not found: {member_id}")))
        })
    }

    // -- Listings --

    pub fn create_listing(
        &self,
        id: &str,
        seller_id: &str,
        title: &str,
        description: &str,
        price_cents: i64,
        category: &str,
        condition: &str,
        image_url: Option<&str>,
    ) -> StoreResult<ListingRow> {
        let title = title.trim();
        let description = description.trim();
        let category = category.trim();
        if title.is_empty() || description.is_empty() || category.is_empty() {
            return Err(StoreError::Validation(
                "Title, description and category are required".into(),
            ));
        }
        if price_cents <= 0 {
            return Err(StoreError::Validation("Price must be positive".into()));
        }

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO listings (id, seller_id, title, description, price_cents, category, condition, image_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![id, seller_id, title, description, price_cents, category, condition, image_url],
            )?;
            query_listing(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("Listing not found: {id}")))
        })
    }

    /// All listings newest-first, optionally narrowed by a case-insensitive
    /// free-text match on title/description and an exact category.
    pub fn list_listings(
        &self,
        q: Option<&str>,
        category: Option<&str>,
    ) -> StoreResult<Vec<ListingRow>> {
        let q = q.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty());
        let category = category.map(str::trim).filter(|s| !s.is_empty());

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT l.id, l.seller_id, m.handle, l.title, l.description, l.price_cents,
                        l.category, l.condition, l.image_url, l.created_at
                 FROM listings l
                 JOIN members m ON l.seller_id = m.id
                 WHERE (?1 IS NULL
                        OR lower(l.title) LIKE '%' || ?1 || '%'
                        OR lower(l.description) LIKE '%' || ?1 || '%')
                   AND (?2 IS NULL OR l.category = ?2)
                 ORDER BY l.created_at DESC, l.rowid DESC",
            )?;

            let rows = stmt
                .query_map(params![q, category], listing_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_listing(&self, id: &str) -> StoreResult<Option<ListingRow>> {
        self.with_conn(|conn| query_listing(conn, id))
    }

    /// Delete a listing. Allowed for the owner and for any admin; everything
    /// under the listing (negotiations, messages) goes with it.
    pub fn delete_listing(&self, id: &str, requester_id: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            let listing = query_listing(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("Listing not found: {id}")))?;

            if listing.seller_id != requester_id && !query_is_admin(conn, requester_id)? {
                return Err(StoreError::Authorization(
                    "Only the seller or an admin may delete a listing".into(),
                ));
            }

            conn.execute("DELETE FROM listings WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    // -- Negotiations --

    /// Create a buy request. Self-trade is forbidden, and at most one active
    /// (non-rejected) negotiation exists per (listing, buyer) — a duplicate
    /// request returns the existing one. The boolean is true when a new row
    /// was inserted.
    pub fn create_negotiation(
        &self,
        id: &str,
        listing_id: &str,
        buyer_id: &str,
    ) -> StoreResult<(NegotiationDetailRow, bool)> {
        self.with_conn(|conn| {
            let listing = query_listing(conn, listing_id)?.ok_or_else(|| {
                StoreError::NotFound(format!("Listing not found: {listing_id}"))
            })?;

            if listing.seller_id == buyer_id {
                return Err(StoreError::Validation(
                    "You cannot request your own listing".into(),
                ));
            }

            if let Some(existing) = query_active_negotiation(conn, listing_id, buyer_id)? {
                let detail = query_negotiation_detail(conn, &existing.id)?
                    .ok_or_else(|| StoreError::NotFound("Negotiation vanished".into()))?;
                return Ok((detail, false));
            }

            let inserted = conn.execute(
                "INSERT INTO negotiations (id, listing_id, buyer_id, seller_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, listing_id, buyer_id, listing.seller_id],
            );
            match inserted {
                Ok(_) => {}
                Err(e) => {
                    // Partial UNIQUE index backstop: another request for the
                    // same pair won the race, hand back the existing row.
                    let err = StoreError::from(e);
                    if err.is_constraint_violation() {
                        if let Some(existing) =
                            query_active_negotiation(conn, listing_id, buyer_id)?
                        {
                            let detail = query_negotiation_detail(conn, &existing.id)?
                                .ok_or_else(|| {
                                    StoreError::NotFound("Negotiation vanished".into())
                                })?;
                            return Ok((detail, false));
                        }
                    }
                    return Err(err);
                }
            }

            let detail = query_negotiation_detail(conn, id)?
                .ok_or_else(|| StoreError::NotFound("Negotiation vanished".into()))?;
            Ok((detail, true))
        })
    }

    /// Seller-only transition out of `pending`. The state machine admits
    /// nothing else: no re-open, no deletion, no buyer-side settlement.
    pub fn settle_negotiation(
        &self,
        id: &str,
        actor_id: &str,
        next: NegotiationStatus,
    ) -> StoreResult<NegotiationRow> {
        self.with_conn(|conn| {
            let row = query_negotiation(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("Negotiation not found: {id}")))?;

            if row.seller_id != actor_id {
                return Err(StoreError::Authorization(
                    "Only the seller may settle a negotiation".into(),
                ));
            }

            let current = parse_status(&row.status)?;
            if !current.may_become(next) {
                return Err(StoreError::State(format!(
                    "Negotiation is {}, cannot become {}",
                    current.as_str(),
                    next.as_str()
                )));
            }

            conn.execute(
                "UPDATE negotiations SET status = ?2 WHERE id = ?1",
                params![id, next.as_str()],
            )?;

            query_negotiation(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("Negotiation not found: {id}")))
        })
    }

    pub fn get_negotiation(&self, id: &str) -> StoreResult<Option<NegotiationRow>> {
        self.with_conn(|conn| query_negotiation(conn, id))
    }

    pub fn get_negotiation_detail(&self, id: &str) -> StoreResult<Option<NegotiationDetailRow>> {
        self.with_conn(|conn| query_negotiation_detail(conn, id))
    }

    /// A member's negotiations newest-first, joined with the listing title
    /// and both handles for display.
    pub fn list_negotiations_for_member(
        &self,
        member_id: &str,
        role: Option<NegotiationRole>,
    ) -> StoreResult<Vec<NegotiationDetailRow>> {
        let filter = match role {
            Some(NegotiationRole::Buying) => "n.buyer_id = ?1",
            Some(NegotiationRole::Selling) => "n.seller_id = ?1",
            None => "(n.buyer_id = ?1 OR n.seller_id = ?1)",
        };
        let sql = format!(
            "SELECT n.id, n.listing_id, l.title, n.buyer_id, b.handle,
                    n.seller_id, s.handle, n.status, n.created_at
             FROM negotiations n
             JOIN listings l ON n.listing_id = l.id
             JOIN members b ON n.buyer_id = b.id
             JOIN members s ON n.seller_id = s.id
             WHERE {filter}
             ORDER BY n.created_at DESC, n.rowid DESC"
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([member_id], negotiation_detail_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Store a chat message. Succeeds only while the negotiation is accepted
    /// and the sender is one of its two participants; content is stored
    /// trimmed. Returns the message and the negotiation for event fan-out.
    pub fn create_message(
        &self,
        id: &str,
        negotiation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> StoreResult<(MessageRow, NegotiationRow)> {
        let content = content.trim();
        if content.is_empty() {
            return Err(StoreError::Validation("Message must not be empty".into()));
        }

        self.with_conn(|conn| {
            let negotiation = query_negotiation(conn, negotiation_id)?.ok_or_else(|| {
                StoreError::NotFound(format!("Negotiation not found: {negotiation_id}"))
            })?;

            if negotiation.buyer_id != sender_id && negotiation.seller_id != sender_id {
                return Err(StoreError::Authorization(
                    "Only negotiation participants may send messages".into(),
                ));
            }

            let status = parse_status(&negotiation.status)?;
            if !status.allows_messages() {
                return Err(StoreError::State(format!(
                    "Messages require an accepted negotiation (currently {})",
                    status.as_str()
                )));
            }

            conn.execute(
                "INSERT INTO messages (id, negotiation_id, sender_id, content)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, negotiation_id, sender_id, content],
            )?;

            let message = query_message(conn, id)?
                .ok_or_else(|| StoreError::NotFound("Message vanished".into()))?;
            Ok((message, negotiation))
        })
    }

    /// Full history for a negotiation, participants only, ascending by
    /// creation time with insertion order as the tiebreak so each sender's
    /// submission order is preserved.
    pub fn list_messages(
        &self,
        negotiation_id: &str,
        requester_id: &str,
    ) -> StoreResult<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let negotiation = query_negotiation(conn, negotiation_id)?.ok_or_else(|| {
                StoreError::NotFound(format!("Negotiation not found: {negotiation_id}"))
            })?;

            if negotiation.buyer_id != requester_id && negotiation.seller_id != requester_id {
                return Err(StoreError::Authorization(
                    "Only negotiation participants may read messages".into(),
                ));
            }

            let mut stmt = conn.prepare(
                "SELECT m.id, m.negotiation_id, m.sender_id, u.handle, m.content, m.created_at
                 FROM messages m
                 JOIN members u ON m.sender_id = u.id
                 WHERE m.negotiation_id = ?1
                 ORDER BY m.created_at ASC, m.rowid ASC",
            )?;
            let rows = stmt
                .query_map([negotiation_id], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Admin grants --

    /// Pure read: (is_admin, is_master). Never provisions anything.
    pub fn admin_flags(&self, member_id: &str) -> StoreResult<(bool, bool)> {
        self.with_conn(|conn| {
            let master: Option<bool> = conn
                .query_row(
                    "SELECT is_master FROM admin_grants WHERE member_id = ?1",
                    [member_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok((master.is_some(), master.unwrap_or(false)))
        })
    }

    /// Every member with admin flags, newest-first. Admin roster view.
    pub fn list_members_admin(&self) -> StoreResult<Vec<AdminMemberRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.email, m.handle, m.display_name, m.course,
                        g.member_id IS NOT NULL, COALESCE(g.is_master, 0), m.created_at
                 FROM members m
                 LEFT JOIN admin_grants g ON g.member_id = m.id
                 ORDER BY m.created_at DESC, m.rowid DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(AdminMemberRow {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        handle: row.get(2)?,
                        display_name: row.get(3)?,
                        course: row.get(4)?,
                        is_admin: row.get(5)?,
                        is_master: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Grant (or regrant) admin authority. Master-only; admins never manage
    /// their own grant through this path.
    pub fn upsert_grant(
        &self,
        actor_id: &str,
        target_id: &str,
        is_master: bool,
    ) -> StoreResult<GrantRow> {
        self.with_conn(|conn| {
            require_master(conn, actor_id)?;
            forbid_self(actor_id, target_id)?;

            if query_member_by_id(conn, target_id)?.is_none() {
                return Err(StoreError::NotFound(format!(
                    "Member not found: {target_id}"
                )));
            }

            // Regranting a master as non-master is a demotion in disguise.
            if !is_master {
                guard_last_master(conn, target_id)?;
            }

            conn.execute(
                "INSERT INTO admin_grants (member_id, is_master, granted_by)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(member_id) DO UPDATE SET is_master = excluded.is_master",
                params![target_id, is_master, actor_id],
            )?;

            query_grant(conn, target_id)?
                .ok_or_else(|| StoreError::NotFound("Grant vanished".into()))
        })
    }

    pub fn promote_grant(&self, actor_id: &str, target_id: &str) -> StoreResult<GrantRow> {
        self.with_conn(|conn| {
            require_master(conn, actor_id)?;
            forbid_self(actor_id, target_id)?;

            let grant = query_grant(conn, target_id)?.ok_or_else(|| {
                StoreError::NotFound(format!("No admin grant for member: {target_id}"))
            })?;
            if !grant.is_master {
                conn.execute(
                    "UPDATE admin_grants SET is_master = 1 WHERE member_id = ?1",
                    [target_id],
                )?;
            }

            query_grant(conn, target_id)?
                .ok_or_else(|| StoreError::NotFound("Grant vanished".into()))
        })
    }

    pub fn demote_grant(&self, actor_id: &str, target_id: &str) -> StoreResult<GrantRow> {
        self.with_conn(|conn| {
            require_master(conn, actor_id)?;
            forbid_self(actor_id, target_id)?;

            if query_grant(conn, target_id)?.is_none() {
                return Err(StoreError::NotFound(format!(
                    "No admin grant for member: {target_id}"
                )));
            }
            guard_last_master(conn, target_id)?;

            conn.execute(
                "UPDATE admin_grants SET is_master = 0 WHERE member_id = ?1",
                [target_id],
            )?;

            query_grant(conn, target_id)?
                .ok_or_else(|| StoreError::NotFound("Grant vanished".into()))
        })
    }

    pub fn remove_grant(&self, actor_id: &str, target_id: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            require_master(conn, actor_id)?;
            forbid_self(actor_id, target_id)?;

            if query_grant(conn, target_id)?.is_none() {
                return Err(StoreError::NotFound(format!(
                    "No admin grant for member: {target_id}"
                )));
            }
            guard_last_master(conn, target_id)?;

            conn.execute("DELETE FROM admin_grants WHERE member_id = ?1", [target_id])?;
            Ok(())
        })
    }

    /// Provisioning-time escape hatch: grant (or restore) a master
    /// AdminGrant with no granting actor. Used only by startup seeding,
    /// never by request paths.
    pub fn seed_master_grant(&self, member_id: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO admin_grants (member_id, is_master) VALUES (?1, 1)
                 ON CONFLICT(member_id) DO UPDATE SET is_master = 1",
                [member_id],
            )?;
            Ok(())
        })
    }

    /// Destructive member removal: any admin, never self, never the last
    /// master. Listings, negotiations, messages and grants cascade.
    pub fn delete_member(&self, actor_id: &str, target_id: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            if !query_is_admin(conn, actor_id)? {
                return Err(StoreError::Authorization(
                    "Only admins may delete members".into(),
                ));
            }
            forbid_self(actor_id, target_id)?;

            if query_member_by_id(conn, target_id)?.is_none() {
                return Err(StoreError::NotFound(format!(
                    "Member not found: {target_id}"
                )));
            }
            guard_last_master(conn, target_id)?;

            conn.execute("DELETE FROM members WHERE id = ?1", [target_id])?;
            Ok(())
        })
    }
}

// -- Guards --

fn require_master(conn: &Connection, actor_id: &str) -> StoreResult<()> {
    let master: Option<bool> = conn
        .query_row(
            "SELECT is_master FROM admin_grants WHERE member_id = ?1",
            [actor_id],
            |row| row.get(0),
        )
        .optional()?;
    if master == Some(true) {
        Ok(())
    } else {
        Err(StoreError::Authorization(
            "Only master admins may manage admin grants".into(),
        ))
    }
}

fn forbid_self(actor_id: &str, target_id: &str) -> StoreResult<()> {
    if actor_id == target_id {
        Err(StoreError::Validation(
            "You cannot perform this operation on yourself".into(),
        ))
    } else {
        Ok(())
    }
}

/// Fails when removing or demoting `target_id` would leave zero masters.
fn guard_last_master(conn: &Connection, target_id: &str) -> StoreResult<()> {
    let target_is_master: Option<bool> = conn
        .query_row(
            "SELECT is_master FROM admin_grants WHERE member_id = ?1",
            [target_id],
            |row| row.get(0),
        )
        .optional()?;
    if target_is_master != Some(true) {
        return Ok(());
    }

    let masters: i64 = conn.query_row(
        "SELECT COUNT(*) FROM admin_grants WHERE is_master = 1",
        [],
        |row| row.get(0),
    )?;
    if masters <= 1 {
        return Err(StoreError::Validation(
            "Cannot remove the last master admin".into(),
        ));
    }
    Ok(())
}

fn parse_status(raw: &str) -> StoreResult<NegotiationStatus> {
    NegotiationStatus::parse(raw)
        .ok_or_else(|| StoreError::State(format!("Corrupt negotiation status: {raw}")))
}

fn merge_optional(update: Option<&str>, current: Option<String>) -> Option<String> {
    match update {
        Some(value) => {
            let value = value.trim();
            if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            }
        }
        None => current,
    }
}

// -- Row queries --

fn query_member_by_email(conn: &Connection, email: &str) -> StoreResult<Option<MemberRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, email, handle, display_name, course, avatar_url, password, created_at
         FROM members WHERE email = ?1",
    )?;
    Ok(stmt.query_row([email], member_from_row).optional()?)
}

fn query_member_by_id(conn: &Connection, id: &str) -> StoreResult<Option<MemberRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, email, handle, display_name, course, avatar_url, password, created_at
         FROM members WHERE id = ?1",
    )?;
    Ok(stmt.query_row([id], member_from_row).optional()?)
}

fn query_is_admin(conn: &Connection, member_id: &str) -> StoreResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM admin_grants WHERE member_id = ?1",
            [member_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn query_listing(conn: &Connection, id: &str) -> StoreResult<Option<ListingRow>> {
    let mut stmt = conn.prepare(
        "SELECT l.id, l.seller_id, m.handle, l.title, l.description, l.price_cents,
                l.category, l.condition, l.image_url, l.created_at
         FROM listings l
         JOIN members m ON l.seller_id = m.id
         WHERE l.id = ?1",
    )?;
    Ok(stmt.query_row([id], listing_from_row).optional()?)
}

fn query_negotiation(conn: &Connection, id: &str) -> StoreResult<Option<NegotiationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, listing_id, buyer_id, seller_id, status, created_at
         FROM negotiations WHERE id = ?1",
    )?;
    Ok(stmt.query_row([id], negotiation_from_row).optional()?)
}

fn query_active_negotiation(
    conn: &Connection,
    listing_id: &str,
    buyer_id: &str,
) -> StoreResult<Option<NegotiationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, listing_id, buyer_id, seller_id, status, created_at
         FROM negotiations
         WHERE listing_id = ?1 AND buyer_id = ?2 AND status != 'rejected'",
    )?;
    Ok(stmt
        .query_row(params![listing_id, buyer_id], negotiation_from_row)
        .optional()?)
}

fn query_negotiation_detail(
    conn: &Connection,
    id: &str,
) -> StoreResult<Option<NegotiationDetailRow>> {
    let mut stmt = conn.prepare(
        "SELECT n.id, n.listing_id, l.title, n.buyer_id, b.handle,
                n.seller_id, s.handle, n.status, n.created_at
         FROM negotiations n
         JOIN listings l ON n.listing_id = l.id
         JOIN members b ON n.buyer_id = b.id
         JOIN members s ON n.seller_id = s.id
         WHERE n.id = ?1",
    )?;
    Ok(stmt
        .query_row([id], negotiation_detail_from_row)
        .optional()?)
}

fn query_message(conn: &Connection, id: &str) -> StoreResult<Option<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.negotiation_id, m.sender_id, u.handle, m.content, m.created_at
         FROM messages m
         JOIN members u ON m.sender_id = u.id
         WHERE m.id = ?1",
    )?;
    Ok(stmt.query_row([id], message_from_row).optional()?)
}

fn query_grant(conn: &Connection, member_id: &str) -> StoreResult<Option<GrantRow>> {
    let mut stmt = conn.prepare(
        "SELECT g.member_id, m.handle, g.is_master, g.granted_by, g.created_at
         FROM admin_grants g
         JOIN members m ON g.member_id = m.id
         WHERE g.member_id = ?1",
    )?;
    Ok(stmt
        .query_row([member_id], |row| {
            Ok(GrantRow {
                member_id: row.get(0)?,
                handle: row.get(1)?,
                is_master: row.get(2)?,
                granted_by: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?)
}

// -- Row mappers --

fn member_from_row(row: &rusqlite::Row) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        id: row.get(0)?,
        email: row.get(1)?,
        handle: row.get(2)?,
        display_name: row.get(3)?,
        course: row.get(4)?,
        avatar_url: row.get(5)?,
        password: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn listing_from_row(row: &rusqlite::Row) -> rusqlite::Result<ListingRow> {
    Ok(ListingRow {
        id: row.get(0)?,
        seller_id: row.get(1)?,
        seller_handle: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        price_cents: row.get(5)?,
        category: row.get(6)?,
        condition: row.get(7)?,
        image_url: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn negotiation_from_row(row: &rusqlite::Row) -> rusqlite::Result<NegotiationRow> {
    Ok(NegotiationRow {
        id: row.get(0)?,
        listing_id: row.get(1)?,
        buyer_id: row.get(2)?,
        seller_id: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn negotiation_detail_from_row(row: &rusqlite::Row) -> rusqlite::Result<NegotiationDetailRow> {
    Ok(NegotiationDetailRow {
        id: row.get(0)?,
        listing_id: row.get(1)?,
        listing_title: row.get(2)?,
        buyer_id: row.get(3)?,
        buyer_handle: row.get(4)?,
        seller_id: row.get(5)?,
        seller_handle: row.get(6)?,
        status: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn message_from_row(row: &rusqlite::Row) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        negotiation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_handle: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn add_member(db: &Database, handle: &str) -> String {
        let id = new_id();
        db.create_member(
            &id,
            &format!("{handle}@campus.edu"),
            handle,
            handle,
            None,
            "argon2-hash",
        )
        .unwrap();
        id
    }

    fn add_listing(db: &Database, seller_id: &str) -> String {
        let id = new_id();
        db.create_listing(
            &id,
            seller_id,
            "Calculus textbook",
            "Barely used, 3rd edition",
            2500,
            "books",
            "good",
            None,
        )
        .unwrap();
        id
    }

    fn make_master(db: &Database, member_id: &str) {
        db.seed_master_grant(member_id).unwrap();
    }

    // -- Members --

    #[test]
    fn duplicate_registration_is_a_validation_error() {
        let db = db();
        add_member(&db, "ada");
        let err = db
            .create_member(&new_id(), "ada@campus.edu", "ada2", "Ada", None, "h")
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn provisioning_is_idempotent() {
        let db = db();
        let first = db
            .ensure_member(&new_id(), "ops@campus.edu", "ops", "ops", "h")
            .unwrap();
        let second = db
            .ensure_member(&new_id(), "ops@campus.edu", "ops", "ops", "h")
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn admin_check_is_a_pure_read() {
        let db = db();
        let (admin, master) = db.admin_flags("nobody").unwrap();
        assert!(!admin && !master);

        // The check must not have provisioned anything.
        let members: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM members", [], |r| r.get(0))?)
            })
            .unwrap();
        let grants: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM admin_grants", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(members, 0);
        assert_eq!(grants, 0);
    }

    #[test]
    fn profile_update_merges_and_validates() {
        let db = db();
        let ada = add_member(&db, "ada");

        let row = db
            .update_profile(&ada, Some("Ada L."), Some("Mathematics"), None)
            .unwrap();
        assert_eq!(row.display_name, "Ada L.");
        assert_eq!(row.course.as_deref(), Some("Mathematics"));

        // Empty course clears it, untouched fields survive.
        let row = db.update_profile(&ada, None, Some(""), None).unwrap();
        assert_eq!(row.display_name, "Ada L.");
        assert_eq!(row.course, None);

        let err = db.update_profile(&ada, Some("   "), None, None).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    // -- Listings --

    #[test]
    fn listing_requires_fields_and_positive_price() {
        let db = db();
        let ada = add_member(&db, "ada");

        let err = db
            .create_listing(&new_id(), &ada, "  ", "desc", 100, "books", "good", None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let err = db
            .create_listing(&new_id(), &ada, "Lamp", "desc", 0, "home", "fair", None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn listing_search_matches_title_and_description() {
        let db = db();
        let ada = add_member(&db, "ada");
        db.create_listing(
            &new_id(),
            &ada,
            "Desk lamp",
            "Warm light, USB powered",
            1500,
            "home",
            "like_new",
            None,
        )
        .unwrap();
        add_listing(&db, &ada); // Calculus textbook, category books

        let all = db.list_listings(None, None).unwrap();
        assert_eq!(all.len(), 2);

        let hits = db.list_listings(Some("CALCULUS"), None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Calculus textbook");

        let hits = db.list_listings(Some("usb"), None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Desk lamp");

        let hits = db.list_listings(None, Some("books")).unwrap();
        assert_eq!(hits.len(), 1);

        let hits = db.list_listings(Some("lamp"), Some("books")).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn listing_deletion_is_owner_or_admin_only() {
        let db = db();
        let ada = add_member(&db, "ada");
        let bob = add_member(&db, "bob");
        let moderator = add_member(&db, "mod");
        make_master(&db, &moderator);

        let listing = add_listing(&db, &ada);
        let err = db.delete_listing(&listing, &bob).unwrap_err();
        assert!(matches!(err, StoreError::Authorization(_)));

        db.delete_listing(&listing, &ada).unwrap();
        assert!(db.get_listing(&listing).unwrap().is_none());

        let listing = add_listing(&db, &ada);
        db.delete_listing(&listing, &moderator).unwrap();
        assert!(db.get_listing(&listing).unwrap().is_none());
    }

    // -- Negotiations --

    #[test]
    fn self_trade_is_forbidden() {
        let db = db();
        let ada = add_member(&db, "ada");
        let listing = add_listing(&db, &ada);

        let err = db.create_negotiation(&new_id(), &listing, &ada).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn duplicate_request_returns_existing_negotiation() {
        let db = db();
        let ada = add_member(&db, "ada");
        let bob = add_member(&db, "bob");
        let listing = add_listing(&db, &ada);

        let (first, created) = db.create_negotiation(&new_id(), &listing, &bob).unwrap();
        assert!(created);
        assert_eq!(first.status, "pending");

        let (second, created) = db.create_negotiation(&new_id(), &listing, &bob).unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);

        // Still only one row.
        let all = db.list_negotiations_for_member(&bob, None).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn rejected_pair_may_request_again() {
        let db = db();
        let ada = add_member(&db, "ada");
        let bob = add_member(&db, "bob");
        let listing = add_listing(&db, &ada);

        let (first, _) = db.create_negotiation(&new_id(), &listing, &bob).unwrap();
        db.settle_negotiation(&first.id, &ada, NegotiationStatus::Rejected)
            .unwrap();

        let (second, created) = db.create_negotiation(&new_id(), &listing, &bob).unwrap();
        assert!(created);
        assert_ne!(second.id, first.id);
    }

    #[test]
    fn only_the_seller_settles() {
        let db = db();
        let ada = add_member(&db, "ada");
        let bob = add_member(&db, "bob");
        let eve = add_member(&db, "eve");
        let listing = add_listing(&db, &ada);
        let (negotiation, _) = db.create_negotiation(&new_id(), &listing, &bob).unwrap();

        for actor in [&bob, &eve] {
            let err = db
                .settle_negotiation(&negotiation.id, actor, NegotiationStatus::Accepted)
                .unwrap_err();
            assert!(matches!(err, StoreError::Authorization(_)));
        }

        let row = db
            .settle_negotiation(&negotiation.id, &ada, NegotiationStatus::Accepted)
            .unwrap();
        assert_eq!(row.status, "accepted");
    }

    #[test]
    fn settled_negotiations_stay_settled() {
        let db = db();
        let ada = add_member(&db, "ada");
        let bob = add_member(&db, "bob");
        let listing = add_listing(&db, &ada);
        let (negotiation, _) = db.create_negotiation(&new_id(), &listing, &bob).unwrap();

        db.settle_negotiation(&negotiation.id, &ada, NegotiationStatus::Accepted)
            .unwrap();

        for next in [NegotiationStatus::Rejected, NegotiationStatus::Accepted] {
            let err = db
                .settle_negotiation(&negotiation.id, &ada, next)
                .unwrap_err();
            assert!(matches!(err, StoreError::State(_)));
        }
    }

    #[test]
    fn completed_is_reserved() {
        let db = db();
        let ada = add_member(&db, "ada");
        let bob = add_member(&db, "bob");
        let listing = add_listing(&db, &ada);
        let (negotiation, _) = db.create_negotiation(&new_id(), &listing, &bob).unwrap();

        let err = db
            .settle_negotiation(&negotiation.id, &ada, NegotiationStatus::Completed)
            .unwrap_err();
        assert!(matches!(err, StoreError::State(_)));
    }

    #[test]
    fn role_filter_splits_buying_and_selling() {
        let db = db();
        let ada = add_member(&db, "ada");
        let bob = add_member(&db, "bob");
        let ada_listing = add_listing(&db, &ada);
        let bob_listing = add_listing(&db, &bob);

        db.create_negotiation(&new_id(), &ada_listing, &bob).unwrap();
        db.create_negotiation(&new_id(), &bob_listing, &ada).unwrap();

        let buying = db
            .list_negotiations_for_member(&ada, Some(NegotiationRole::Buying))
            .unwrap();
        assert_eq!(buying.len(), 1);
        assert_eq!(buying[0].listing_id, bob_listing);

        let selling = db
            .list_negotiations_for_member(&ada, Some(NegotiationRole::Selling))
            .unwrap();
        assert_eq!(selling.len(), 1);
        assert_eq!(selling[0].listing_id, ada_listing);

        assert_eq!(db.list_negotiations_for_member(&ada, None).unwrap().len(), 2);
    }

    // -- Messages --

    #[test]
    fn messages_require_accepted_state() {
        let db = db();
        let ada = add_member(&db, "ada");
        let bob = add_member(&db, "bob");
        let listing = add_listing(&db, &ada);
        let (negotiation, _) = db.create_negotiation(&new_id(), &listing, &bob).unwrap();

        let err = db
            .create_message(&new_id(), &negotiation.id, &bob, "hello")
            .unwrap_err();
        assert!(matches!(err, StoreError::State(_)));

        db.settle_negotiation(&negotiation.id, &ada, NegotiationStatus::Accepted)
            .unwrap();
        db.create_message(&new_id(), &negotiation.id, &bob, "Is this still available?")
            .unwrap();
    }

    #[test]
    fn rejected_negotiation_rejects_messages_from_both_sides() {
        let db = db();
        let ada = add_member(&db, "ada");
        let bob = add_member(&db, "bob");
        let listing = add_listing(&db, &ada);
        let (negotiation, _) = db.create_negotiation(&new_id(), &listing, &bob).unwrap();
        db.settle_negotiation(&negotiation.id, &ada, NegotiationStatus::Rejected)
            .unwrap();

        for sender in [&ada, &bob] {
            let err = db
                .create_message(&new_id(), &negotiation.id, sender, "hello?")
                .unwrap_err();
            assert!(matches!(err, StoreError::State(_)));
        }
    }

    #[test]
    fn non_participants_cannot_send_or_read() {
        let db = db();
        let ada = add_member(&db, "ada");
        let bob = add_member(&db, "bob");
        let eve = add_member(&db, "eve");
        let listing = add_listing(&db, &ada);
        let (negotiation, _) = db.create_negotiation(&new_id(), &listing, &bob).unwrap();
        db.settle_negotiation(&negotiation.id, &ada, NegotiationStatus::Accepted)
            .unwrap();

        let err = db
            .create_message(&new_id(), &negotiation.id, &eve, "let me in")
            .unwrap_err();
        assert!(matches!(err, StoreError::Authorization(_)));

        let err = db.list_messages(&negotiation.id, &eve).unwrap_err();
        assert!(matches!(err, StoreError::Authorization(_)));
    }

    #[test]
    fn message_content_is_trimmed_and_non_empty() {
        let db = db();
        let ada = add_member(&db, "ada");
        let bob = add_member(&db, "bob");
        let listing = add_listing(&db, &ada);
        let (negotiation, _) = db.create_negotiation(&new_id(), &listing, &bob).unwrap();
        db.settle_negotiation(&negotiation.id, &ada, NegotiationStatus::Accepted)
            .unwrap();

        let err = db
            .create_message(&new_id(), &negotiation.id, &bob, "   ")
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let (message, _) = db
            .create_message(&new_id(), &negotiation.id, &bob, "  hi there  ")
            .unwrap();
        assert_eq!(message.content, "hi there");
    }

    #[test]
    fn history_preserves_submission_order() {
        let db = db();
        let ada = add_member(&db, "ada");
        let bob = add_member(&db, "bob");
        let listing = add_listing(&db, &ada);
        let (negotiation, _) = db.create_negotiation(&new_id(), &listing, &bob).unwrap();
        db.settle_negotiation(&negotiation.id, &ada, NegotiationStatus::Accepted)
            .unwrap();

        for text in ["first", "second", "third"] {
            db.create_message(&new_id(), &negotiation.id, &bob, text)
                .unwrap();
        }

        let history = db.list_messages(&negotiation.id, &ada).unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["first", "second", "third"]);
    }

    // -- Admin grants --

    #[test]
    fn grant_management_is_master_only() {
        let db = db();
        let root = add_member(&db, "root");
        let ada = add_member(&db, "ada");
        let bob = add_member(&db, "bob");
        make_master(&db, &root);

        // Plain member
        let err = db.upsert_grant(&ada, &bob, false).unwrap_err();
        assert!(matches!(err, StoreError::Authorization(_)));

        // Non-master admin
        db.upsert_grant(&root, &ada, false).unwrap();
        let err = db.upsert_grant(&ada, &bob, false).unwrap_err();
        assert!(matches!(err, StoreError::Authorization(_)));

        let grant = db.upsert_grant(&root, &bob, true).unwrap();
        assert!(grant.is_master);
        assert_eq!(grant.granted_by.as_deref(), Some(root.as_str()));
    }

    #[test]
    fn the_last_master_is_protected() {
        let db = db();
        let root = add_member(&db, "root");
        let ada = add_member(&db, "ada");
        make_master(&db, &root);
        db.upsert_grant(&root, &ada, false).unwrap();

        // The sole master cannot strip their own authority.
        let err = db.demote_grant(&root, &root).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        let err = db.remove_grant(&root, &root).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        // A non-master admin cannot delete the last master member either.
        let err = db.delete_member(&ada, &root).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        // And the grant set is unchanged.
        let (admin, master) = db.admin_flags(&root).unwrap();
        assert!(admin && master);
    }

    #[test]
    fn removing_one_of_two_masters_succeeds() {
        let db = db();
        let root = add_member(&db, "root");
        let other = add_member(&db, "other");
        make_master(&db, &root);
        db.upsert_grant(&root, &other, true).unwrap();

        db.remove_grant(&root, &other).unwrap();
        let (admin, _) = db.admin_flags(&other).unwrap();
        assert!(!admin);
    }

    #[test]
    fn masters_cannot_target_themselves() {
        let db = db();
        let root = add_member(&db, "root");
        let other = add_member(&db, "other");
        make_master(&db, &root);
        db.upsert_grant(&root, &other, true).unwrap();

        // Even with another master present, self-targeting is refused.
        let err = db.demote_grant(&root, &root).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        let err = db.remove_grant(&root, &root).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        let err = db.upsert_grant(&root, &root, false).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn regrant_as_non_master_demotes() {
        let db = db();
        let root = add_member(&db, "root");
        let other = add_member(&db, "other");
        make_master(&db, &root);
        db.upsert_grant(&root, &other, true).unwrap();

        // Granting an existing master as non-master is a demotion.
        let grant = db.upsert_grant(&root, &other, false).unwrap();
        assert!(!grant.is_master);
        let (admin, master) = db.admin_flags(&other).unwrap();
        assert!(admin && !master);
    }

    #[test]
    fn member_deletion_cascades_and_respects_guards() {
        let db = db();
        let root = add_member(&db, "root");
        let ada = add_member(&db, "ada");
        let bob = add_member(&db, "bob");
        make_master(&db, &root);

        let listing = add_listing(&db, &ada);
        let (negotiation, _) = db.create_negotiation(&new_id(), &listing, &bob).unwrap();
        db.settle_negotiation(&negotiation.id, &ada, NegotiationStatus::Accepted)
            .unwrap();
        db.create_message(&new_id(), &negotiation.id, &bob, "hi")
            .unwrap();

        // Non-admins cannot delete; admins cannot delete themselves or the
        // last master.
        let err = db.delete_member(&bob, &ada).unwrap_err();
        assert!(matches!(err, StoreError::Authorization(_)));
        let err = db.delete_member(&root, &root).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        db.delete_member(&root, &ada).unwrap();
        assert!(db.get_member_by_id(&ada).unwrap().is_none());
        assert!(db.get_listing(&listing).unwrap().is_none());
        assert!(db.get_negotiation(&negotiation.id).unwrap().is_none());
    }
}
