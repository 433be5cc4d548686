use std::path::PathBuf;

use anyhow::Context;

/// Runtime configuration, read from the environment (a .env file is
/// loaded first when present).
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Institutional email domain members must belong to, e.g. "campus.edu".
    pub email_domain: String,
    pub upload_dir: PathBuf,
    /// When set, this member is seeded with a master admin grant at startup.
    pub bootstrap_admin_email: Option<String>,
    /// Password used only when the bootstrap member does not exist yet.
    pub bootstrap_admin_password: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let host = std::env::var("UNIMART_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = std::env::var("UNIMART_PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .context("UNIMART_PORT must be a port number")?;
        let db_path =
            PathBuf::from(std::env::var("UNIMART_DB_PATH").unwrap_or_else(|_| "unimart.db".into()));
        let jwt_secret =
            std::env::var("UNIMART_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
        let email_domain = std::env::var("UNIMART_EMAIL_DOMAIN")
            .context("UNIMART_EMAIL_DOMAIN must be set (e.g. campus.edu)")?
            .trim()
            .to_lowercase();
        let upload_dir = PathBuf::from(
            std::env::var("UNIMART_UPLOAD_DIR").unwrap_or_else(|_| "./uploads".into()),
        );
        let bootstrap_admin_email = std::env::var("UNIMART_BOOTSTRAP_ADMIN_EMAIL").ok();
        let bootstrap_admin_password = std::env::var("UNIMART_BOOTSTRAP_ADMIN_PASSWORD").ok();

        Ok(Self {
            host,
            port,
            db_path,
            jwt_secret,
            email_domain,
            upload_dir,
            bootstrap_admin_email,
            bootstrap_admin_password,
        })
    }
}
