//! Account management: `bpla-tracker create-user` and `hash-password`.

use anyhow::{Result, bail};
use bpla_tracker::config::TrackerConfig;
use bpla_tracker::tracker::auth::hash_password;
use bpla_tracker::tracker::db::TrackerDb;
use tracing::info;

pub fn cmd_create_user(
    config: &TrackerConfig,
    login: &str,
    full_name: &str,
    role: &str,
    password: &str,
) -> Result<()> {
    let login = login.trim();
    if login.is_empty() || password.is_empty() {
        bail!("Login and password must not be empty");
    }
    let db = TrackerDb::new(&config.storage.db_path)?;
    if db.get_user_by_login(login)?.is_some() {
        bail!("User '{}' already exists", login);
    }
    let hash = hash_password(password)?;
    let user = db.create_user(login, full_name.trim(), &hash, role.trim())?;
    info!(user_id = user.id, role = %user.role, "user created");
    println!("Created user '{}' (id {})", user.login, user.id);
    Ok(())
}

pub fn cmd_hash_password(password: &str) -> Result<()> {
    println!("{}", hash_password(password)?);
    Ok(())
}
