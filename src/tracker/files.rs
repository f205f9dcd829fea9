//! On-disk storage for uploaded firmware and dumps, plus the avatar gallery.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use super::models::FileKind;

const AVATAR_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "svg", "gif"];

/// Sub-directories of the data dir.
pub const AVATARS_DIR: &str = "avatars";
pub const IMAGES_DIR: &str = "images";

/// Replace anything that is not a letter, digit, `-` or `_` with `_`.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Lowercased extension of an uploaded file, with the leading dot, or an
/// empty string when there is none worth keeping.
fn extension_of(original_name: &str) -> String {
    Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 16 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// `<controller>_<kind>_<unix millis>_<random suffix><ext>`. The suffix
/// keeps uploads landing in the same millisecond apart.
pub fn stored_file_name(
    controller_label: &str,
    kind: FileKind,
    original_name: &str,
    now: DateTime<Utc>,
) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}_{}{}",
        sanitize_component(controller_label),
        kind.as_str(),
        now.timestamp_millis(),
        &suffix[..8],
        extension_of(original_name)
    )
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Root directory for files of `kind`.
pub fn kind_dir(data_dir: &Path, kind: FileKind) -> PathBuf {
    data_dir.join(kind.dir_name())
}

/// Write an upload under `<data_dir>/<kind dir>/<file_name>`. Never
/// replaces an existing file.
pub async fn store_file(
    data_dir: &Path,
    kind: FileKind,
    file_name: &str,
    bytes: &[u8],
) -> std::io::Result<PathBuf> {
    let dir = kind_dir(data_dir, kind);
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(file_name);
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(path)
}

/// Best-effort cleanup of a file whose DB record could not be written.
pub async fn discard_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove orphaned upload {}: {}", path.display(), e);
    }
}

fn is_avatar_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| AVATAR_EXTENSIONS.iter().any(|ok| e.eq_ignore_ascii_case(ok)))
}

/// Image files available as avatars, sorted by name. A missing directory
/// yields an empty list.
pub async fn list_avatars(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str()
            && is_avatar_file(name)
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_stored_file_name_layout() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let name = stored_file_name("Pixhawk 6C", FileKind::Firmware, "fw.APJ", now);
        let prefix = format!("Pixhawk_6C_firmware_{}_", now.timestamp_millis());
        assert!(name.starts_with(&prefix), "{}", name);
        assert!(name.ends_with(".apj"));
        assert_eq!(name.len(), prefix.len() + 8 + ".apj".len());
    }

    #[test]
    fn test_same_millisecond_names_differ() {
        let now = Utc::now();
        let first = stored_file_name("fc", FileKind::Firmware, "fw.apj", now);
        let second = stored_file_name("fc", FileKind::Firmware, "fw.apj", now);
        assert_ne!(first, second);
    }

    #[test]
    fn test_stored_file_name_strips_path_tricks() {
        let now = Utc::now();
        let name = stored_file_name("../../etc", FileKind::Dump, "x.tar.gz/../..", now);
        assert!(!name.contains('/'));
        assert!(!name.contains(".."));
        assert!(name.starts_with("______etc_dump_"));
    }

    #[test]
    fn test_missing_extension_is_dropped() {
        let now = Utc::now();
        let name = stored_file_name("fc", FileKind::Dump, "params", now);
        assert!(name.starts_with(&format!("fc_dump_{}_", now.timestamp_millis())));
        assert!(!name.contains('.'));
        assert_eq!(sanitize_component("   "), "unknown");
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_store_file_creates_kind_dir() {
        let dir = TempDir::new().unwrap();
        let path = store_file(dir.path(), FileKind::Firmware, "a.bin", b"data")
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("firmwares").join("a.bin"));
        assert_eq!(std::fs::read(&path).unwrap(), b"data");

        let err = store_file(dir.path(), FileKind::Firmware, "a.bin", b"other")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&path).unwrap(), b"data");

        discard_file(&path).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_list_avatars_filters_images() {
        let dir = TempDir::new().unwrap();
        for name in ["b.PNG", "a.svg", "notes.txt", "c.jpeg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let avatars = list_avatars(dir.path()).await.unwrap();
        assert_eq!(avatars, vec!["a.svg", "b.PNG", "c.jpeg"]);
    }

    #[tokio::test]
    async fn test_list_avatars_missing_dir() {
        let dir = TempDir::new().unwrap();
        let avatars = list_avatars(&dir.path().join("nope")).await.unwrap();
        assert!(avatars.is_empty());
    }
}
