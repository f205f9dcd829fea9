//! Integration tests for the bpla-tracker CLI.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a tracker Command isolated from the caller's env
fn tracker(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("bpla-tracker");
    cmd.current_dir(dir.path());
    for var in [
        "BPLA_HOST",
        "BPLA_PORT",
        "BPLA_DB_PATH",
        "BPLA_DATA_DIR",
        "BPLA_LOG_JSON",
        "BPLA_LOG_DIR",
        "BPLA_USER_PASSWORD",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn init_project(dir: &TempDir) {
    tracker(dir).arg("init").assert().success();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        let dir = TempDir::new().unwrap();
        tracker(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("create-user"))
            .stdout(predicate::str::contains("seed"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        tracker(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("bpla-tracker"));
    }

    #[test]
    fn test_unknown_command_fails() {
        let dir = TempDir::new().unwrap();
        tracker(&dir).arg("launch").assert().failure();
    }

    #[test]
    fn test_hash_password_prints_bcrypt_hash() {
        let dir = TempDir::new().unwrap();
        tracker(&dir)
            .args(["hash-password", "s3cret"])
            .assert()
            .success()
            .stdout(predicate::str::is_match(r"^\$2[aby]\$10\$").unwrap());
    }
}

// =============================================================================
// Init
// =============================================================================

mod init {
    use super::*;

    #[test]
    fn test_init_creates_config_database_and_dirs() {
        let dir = TempDir::new().unwrap();
        tracker(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Wrote tracker.toml"))
            .stdout(predicate::str::contains("Tracker database initialized"));

        assert!(dir.path().join("tracker.toml").exists());
        assert!(dir.path().join("data/tracker.db").exists());
        for sub in ["avatars", "images", "firmwares", "dumps"] {
            assert!(dir.path().join("data").join(sub).is_dir(), "{}", sub);
        }

        let config = fs::read_to_string(dir.path().join("tracker.toml")).unwrap();
        assert!(config.contains("[server]"));
        assert!(config.contains("cookie_name = \"bpla.sid\""));
    }

    #[test]
    fn test_init_keeps_existing_config() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("tracker.toml"),
            "[storage]\ndb_path = \"custom/db.sqlite\"\ndata_dir = \"files\"\n",
        )
        .unwrap();

        tracker(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        assert!(dir.path().join("custom/db.sqlite").exists());
        assert!(dir.path().join("files/firmwares").is_dir());
        let config = fs::read_to_string(dir.path().join("tracker.toml")).unwrap();
        assert!(config.contains("custom/db.sqlite"));
    }

    #[test]
    fn test_init_honours_config_flag() {
        let dir = TempDir::new().unwrap();
        tracker(&dir)
            .args(["--config", "conf/site.toml", "init"])
            .assert()
            .success();
        assert!(dir.path().join("conf/site.toml").exists());
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("tracker.toml"), "[server\nport = ").unwrap();
        tracker(&dir)
            .arg("seed")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse tracker.toml"));
    }
}

// =============================================================================
// Data commands
// =============================================================================

mod data {
    use super::*;

    #[test]
    fn test_seed_is_idempotent() {
        let dir = TempDir::new().unwrap();
        init_project(&dir);

        tracker(&dir)
            .arg("seed")
            .assert()
            .success()
            .stdout(predicate::str::contains("Seeded 12 blueprint(s)"));
        tracker(&dir)
            .arg("seed")
            .assert()
            .success()
            .stdout(predicate::str::contains("Seeded 0 blueprint(s)"));
    }

    #[test]
    fn test_create_user_rejects_duplicates() {
        let dir = TempDir::new().unwrap();
        init_project(&dir);
        let create = |dir: &TempDir| {
            let mut cmd = tracker(dir);
            cmd.args([
                "create-user",
                "--login",
                "ivanov",
                "--full-name",
                "Иванов И.И.",
                "--role",
                "Цех",
            ])
            .env("BPLA_USER_PASSWORD", "pa55");
            cmd
        };

        create(&dir)
            .assert()
            .success()
            .stdout(predicate::str::contains("Created user 'ivanov'"));
        create(&dir)
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_create_user_requires_password() {
        let dir = TempDir::new().unwrap();
        init_project(&dir);
        tracker(&dir)
            .args(["create-user", "--login", "a", "--full-name", "A", "--role", "Цех"])
            .assert()
            .failure();
    }

    #[test]
    fn test_env_overrides_database_path() {
        let dir = TempDir::new().unwrap();
        init_project(&dir);
        tracker(&dir)
            .env("BPLA_DB_PATH", "elsewhere/tracker.db")
            .arg("seed")
            .assert()
            .success();
        assert!(dir.path().join("elsewhere/tracker.db").exists());
    }
}
