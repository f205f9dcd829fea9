use anyhow::Result;
use bpla_tracker::config::TrackerConfig;
use bpla_tracker::tracker::db::TrackerDb;
use bpla_tracker::tracker::seed::seed_legacy;

pub fn cmd_seed(config: &TrackerConfig) -> Result<()> {
    let db = TrackerDb::new(&config.storage.db_path)?;
    let written = seed_legacy(&db)?;
    println!("Seeded {} blueprint(s)", written);
    Ok(())
}
