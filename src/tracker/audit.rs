//! Best-effort audit trail of user actions.

use std::fmt;

use tracing::warn;

use super::db::DbHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Login,
    CreateBoard,
    UpdateBoard,
    DeleteBoard,
    UpdateParameter,
    UpdateComment,
    UpdateSemiFinished,
    UpdateConfig,
    UploadFirmware,
    UploadDump,
    SetActualFile,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "LOGIN",
            Self::CreateBoard => "CREATE_BOARD",
            Self::UpdateBoard => "UPDATE_BOARD",
            Self::DeleteBoard => "DELETE_BOARD",
            Self::UpdateParameter => "UPDATE_PARAMETER",
            Self::UpdateComment => "UPDATE_COMMENT",
            Self::UpdateSemiFinished => "UPDATE_SEMI_FINISHED",
            Self::UpdateConfig => "UPDATE_CONFIG",
            Self::UploadFirmware => "UPLOAD_FIRMWARE",
            Self::UploadDump => "UPLOAD_DUMP",
            Self::SetActualFile => "SET_ACTUAL_FILE",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append an audit entry. Failures are logged and swallowed so they never
/// fail the request that triggered them.
pub async fn record(db: &DbHandle, user_id: i64, action: AuditAction, details: String) {
    let result = db
        .call(move |db| db.insert_audit(Some(user_id), action.as_str(), &details))
        .await;
    if let Err(e) = result {
        warn!(user_id, %action, "Failed to write audit entry: {:#}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::db::TrackerDb;

    #[tokio::test]
    async fn test_record_appends_entry() {
        let db = DbHandle::new(TrackerDb::new_in_memory().unwrap());
        let user_id = db
            .call(|db| Ok(db.create_user("u", "Пользователь", "hash", "Цех")?.id))
            .await
            .unwrap();

        record(&db, user_id, AuditAction::DeleteBoard, "Удален борт №5".into()).await;

        let entries = db.call(|db| db.recent_audit(10)).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "DELETE_BOARD");
        assert_eq!(entries[0].full_name.as_deref(), Some("Пользователь"));
    }

    #[tokio::test]
    async fn test_record_swallows_failures() {
        let db = DbHandle::new(TrackerDb::new_in_memory().unwrap());
        // Unknown user violates the foreign key; the call must still return.
        record(&db, 999, AuditAction::Login, String::new()).await;
        let entries = db.call(|db| db.recent_audit(10)).await.unwrap();
        assert!(entries.is_empty());
    }
}
