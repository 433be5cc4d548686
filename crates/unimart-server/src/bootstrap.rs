use anyhow::{Context, Result, bail};
use argon2::{
    Argon2, PasswordHasher,
    password_hash::{SaltString, rand_core::OsRng},
};
use tracing::info;
use uuid::Uuid;

use unimart_db::Database;

use crate::config::Config;

/// Idempotent master-admin seeding, run once at startup.
///
/// There is no request-time "always admin" special case anywhere: this is
/// the only escape hatch, and after it has run the last-master floor in the
/// grant commands keeps at least one master present forever.
pub fn seed_master_admin(db: &Database, config: &Config) -> Result<()> {
    let Some(email) = config.bootstrap_admin_email.as_deref() else {
        return Ok(());
    };
    let email = email.trim().to_lowercase();
    let local = email
        .split('@')
        .next()
        .filter(|s| !s.is_empty())
        .context("UNIMART_BOOTSTRAP_ADMIN_EMAIL is not a valid email")?;

    let member_id = match db.get_member_by_email(&email)? {
        Some(member) => member.id,
        None => {
            let Some(password) = config.bootstrap_admin_password.as_deref() else {
                bail!(
                    "UNIMART_BOOTSTRAP_ADMIN_EMAIL names an unknown member and \
                     UNIMART_BOOTSTRAP_ADMIN_PASSWORD is not set"
                );
            };
            if password.len() < 8 {
                bail!("UNIMART_BOOTSTRAP_ADMIN_PASSWORD must be at least 8 characters");
            }

            let salt = SaltString::generate(&mut OsRng);
            let password_hash = Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map_err(|e| anyhow::anyhow!("Password hashing failed: {e}"))?
                .to_string();

            let id = db.ensure_member(
                &Uuid::new_v4().to_string(),
                &email,
                local,
                local,
                &password_hash,
            )?;
            info!("Bootstrap admin member created: {}", email);
            id
        }
    };

    let (_, is_master) = db.admin_flags(&member_id)?;
    if is_master {
        return Ok(());
    }

    db.seed_master_grant(&member_id)?;
    info!("Seeded master admin grant for {}", email);
    Ok(())
}
