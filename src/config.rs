//! Layered configuration for the tracker.
//!
//! Settings are resolved in this order, later layers winning:
//! 1. built-in defaults
//! 2. `tracker.toml` (path given by `--config`, default `./tracker.toml`)
//! 3. environment variables (`BPLA_*`, with `.env` loaded via `dotenvy`)
//! 4. CLI flags, applied by the caller
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3000
//! dev_mode = false
//!
//! [storage]
//! db_path = "data/tracker.db"
//! data_dir = "data"
//!
//! [auth]
//! cookie_name = "bpla.sid"
//! session_ttl_hours = 24
//! remember_me_days = 30
//! secure_cookie = false
//! upload_roles = ["Администратор", "Начальник отдела испытания", "Отдел испытаний"]
//! admin_roles = ["Администратор"]
//!
//! [logging]
//! filter = "info,tower_http=info"
//! json = false
//! dir = "logs"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "tracker.toml";

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for a local front-end dev server.
    #[serde(default)]
    pub dev_mode: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Where the database and uploaded binaries live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Root for `firmwares/`, `dumps/`, `images/` and `avatars/`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/tracker.db")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Session cookie and role policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Server-side lifetime of a session created without "remember me".
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    #[serde(default = "default_remember_me_days")]
    pub remember_me_days: i64,
    #[serde(default)]
    pub secure_cookie: bool,
    /// Roles allowed to upload firmware/dumps and switch the current version.
    #[serde(default = "default_upload_roles")]
    pub upload_roles: Vec<String>,
    /// Roles allowed to edit catalogs and blueprints.
    #[serde(default = "default_admin_roles")]
    pub admin_roles: Vec<String>,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            session_ttl_hours: default_session_ttl_hours(),
            remember_me_days: default_remember_me_days(),
            secure_cookie: false,
            upload_roles: default_upload_roles(),
            admin_roles: default_admin_roles(),
        }
    }
}

fn default_cookie_name() -> String {
    "bpla.sid".to_string()
}

fn default_session_ttl_hours() -> i64 {
    24
}

fn default_remember_me_days() -> i64 {
    30
}

fn default_upload_roles() -> Vec<String> {
    vec![
        "Администратор".to_string(),
        "Начальник отдела испытания".to_string(),
        "Отдел испытаний".to_string(),
    ]
}

fn default_admin_roles() -> Vec<String> {
    vec!["Администратор".to_string()]
}

impl AuthSection {
    /// Expiry of a session opened at `now`, plus the cookie `Max-Age`.
    /// Only remembered logins get a persistent cookie.
    pub fn session_expiry(
        &self,
        now: DateTime<Utc>,
        remember_me: bool,
    ) -> Result<(DateTime<Utc>, Option<i64>)> {
        let (ttl, max_age) = if remember_me {
            let ttl = TimeDelta::try_days(self.remember_me_days).with_context(|| {
                format!("remember_me_days = {} is out of range", self.remember_me_days)
            })?;
            (ttl, Some(ttl.num_seconds()))
        } else {
            let ttl = TimeDelta::try_hours(self.session_ttl_hours).with_context(|| {
                format!("session_ttl_hours = {} is out of range", self.session_ttl_hours)
            })?;
            (ttl, None)
        };
        let expires_at = now
            .checked_add_signed(ttl)
            .context("Session expiry overflows the calendar")?;
        Ok((expires_at, max_age))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// `EnvFilter` directive; `RUST_LOG` overrides it when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
    /// Optional directory for a daily rolling log file.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
            dir: None,
        }
    }
}

fn default_log_filter() -> String {
    "info,tower_http=info".to_string()
}

/// Full tracker configuration as read from `tracker.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl TrackerConfig {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse tracker.toml")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load the file if it exists, fall back to defaults otherwise, then
    /// apply environment overrides.
    pub fn resolve(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `BPLA_*` overrides. The lookup is injected so tests do not
    /// have to mutate the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("BPLA_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("BPLA_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid BPLA_PORT '{}'", port))?;
        }
        if let Some(db_path) = lookup("BPLA_DB_PATH") {
            self.storage.db_path = PathBuf::from(db_path);
        }
        if let Some(data_dir) = lookup("BPLA_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(data_dir);
        }
        if let Some(json) = lookup("BPLA_LOG_JSON") {
            self.logging.json = matches!(json.as_str(), "1" | "true" | "yes");
        }
        if let Some(dir) = lookup("BPLA_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize tracker.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Human-readable warnings about suspicious settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.auth.session_ttl_hours <= 0 {
            warnings.push(format!(
                "session_ttl_hours = {} expires sessions immediately",
                self.auth.session_ttl_hours
            ));
        }
        if self.auth.remember_me_days <= 0 {
            warnings.push(format!(
                "remember_me_days = {} disables remembered logins",
                self.auth.remember_me_days
            ));
        }
        for remember_me in [false, true] {
            if let Err(e) = self.auth.session_expiry(Utc::now(), remember_me) {
                warnings.push(format!("{:#}: logins will fail", e));
            }
        }
        if self.auth.upload_roles.is_empty() {
            warnings.push("upload_roles is empty: nobody can upload firmware".to_string());
        }
        if self.auth.cookie_name.is_empty()
            || self.auth.cookie_name.contains([';', '=', ' '])
        {
            warnings.push(format!("Invalid cookie_name '{}'", self.auth.cookie_name));
        }
        warnings
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
