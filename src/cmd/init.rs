//! Project setup: `bpla-tracker init`.

use std::path::Path;

use anyhow::{Context, Result};
use bpla_tracker::config::TrackerConfig;
use bpla_tracker::tracker::db::TrackerDb;
use bpla_tracker::tracker::files::{AVATARS_DIR, IMAGES_DIR};
use bpla_tracker::tracker::models::FileKind;

pub fn cmd_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        println!(
            "{} already exists, keeping it (use --force to overwrite)",
            config_path.display()
        );
    } else {
        if let Some(parent) = config_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        TrackerConfig::default().save(config_path)?;
        println!("Wrote {}", config_path.display());
    }

    let config = TrackerConfig::resolve(config_path)?;
    let data_dir = &config.storage.data_dir;
    for sub in [
        AVATARS_DIR,
        IMAGES_DIR,
        FileKind::Firmware.dir_name(),
        FileKind::Dump.dir_name(),
    ] {
        let dir = data_dir.join(sub);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    TrackerDb::new(&config.storage.db_path)?;
    println!(
        "Tracker database initialized at {}",
        config.storage.db_path.display()
    );
    Ok(())
}
