use std::fmt;
use std::str::FromStr;

use bpla_common::{Department, DepartmentStatus, overall_status};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One tracked physical unit with its three department checklists.
///
/// Serialized flat (`workshop_params`, `electrical_status`, ...) so clients
/// address department columns by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Board {
    pub id: i64,
    pub number: String,
    pub bpla_id: i64,
    pub supplier_id: Option<i64>,
    pub controller_id: Option<i64>,
    pub description: Option<String>,
    pub creation_date: String,
    pub finished_date: Option<String>,

    pub workshop_params: Map<String, Value>,
    pub workshop_comments: Map<String, Value>,
    pub workshop_semi_finished: bool,
    pub workshop_status: DepartmentStatus,

    pub electrical_params: Map<String, Value>,
    pub electrical_comments: Map<String, Value>,
    pub electrical_semi_finished: bool,
    pub electrical_status: DepartmentStatus,

    pub setup_params: Map<String, Value>,
    pub setup_comments: Map<String, Value>,
    pub setup_semi_finished: bool,
    pub setup_status: DepartmentStatus,
}

impl Board {
    pub fn params(&self, department: Department) -> &Map<String, Value> {
        match department {
            Department::Workshop => &self.workshop_params,
            Department::Electrical => &self.electrical_params,
            Department::Setup => &self.setup_params,
        }
    }

    pub fn is_semi_finished(&self, department: Department) -> bool {
        match department {
            Department::Workshop => self.workshop_semi_finished,
            Department::Electrical => self.electrical_semi_finished,
            Department::Setup => self.setup_semi_finished,
        }
    }

    pub fn status(&self, department: Department) -> DepartmentStatus {
        match department {
            Department::Workshop => self.workshop_status,
            Department::Electrical => self.electrical_status,
            Department::Setup => self.setup_status,
        }
    }

    pub fn overall_status(&self) -> DepartmentStatus {
        overall_status(&[self.workshop_status, self.electrical_status, self.setup_status])
    }

    /// `creation_date` falls on the given `YYYY-MM-DD` day.
    pub fn created_on(&self, day: &str) -> bool {
        self.creation_date.starts_with(day)
    }
}

/// A UAV type. Configs are fetched separately per department.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bpla {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Supplier {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Controller {
    pub id: i64,
    pub name: String,
}

// ── Component catalog ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Telemetry,
    Bec,
    Gps,
    VideoTx,
    Pvd,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 5] = [
        Self::Telemetry,
        Self::Bec,
        Self::Gps,
        Self::VideoTx,
        Self::Pvd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telemetry => "telemetry",
            Self::Bec => "bec",
            Self::Gps => "gps",
            Self::VideoTx => "video_tx",
            Self::Pvd => "pvd",
        }
    }
}

impl FromStr for ComponentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "telemetry" => Ok(Self::Telemetry),
            "bec" => Ok(Self::Bec),
            "gps" => Ok(Self::Gps),
            "video_tx" => Ok(Self::VideoTx),
            "pvd" => Ok(Self::Pvd),
            _ => Err(format!("Invalid component kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Component {
    pub id: i64,
    pub model_name: String,
}

/// Component dropdowns for the electrical form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComponentCatalog {
    pub telemetry_modules: Vec<Component>,
    pub bec_models: Vec<Component>,
    pub gps_models: Vec<Component>,
    pub video_transmitters: Vec<Component>,
    pub pvd_models: Vec<Component>,
}

impl ComponentCatalog {
    pub fn slot_mut(&mut self, kind: ComponentKind) -> &mut Vec<Component> {
        match kind {
            ComponentKind::Telemetry => &mut self.telemetry_modules,
            ComponentKind::Bec => &mut self.bec_models,
            ComponentKind::Gps => &mut self.gps_models,
            ComponentKind::VideoTx => &mut self.video_transmitters,
            ComponentKind::Pvd => &mut self.pvd_models,
        }
    }
}

// ── Firmware and dumps ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Firmware,
    Dump,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Firmware => "firmware",
            Self::Dump => "dump",
        }
    }

    /// Sub-directory of the data dir and URL prefix for stored files.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Firmware => "firmwares",
            Self::Dump => "dumps",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored firmware or dump version for a (controller, bpla) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub id: i64,
    pub controller_id: i64,
    pub bpla_id: i64,
    pub file_name: String,
    pub original_name: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub actual: bool,
    pub uploaded_by: Option<i64>,
    pub uploaded_at: String,
}

/// Metadata for a file that has already been written to disk.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub controller_id: i64,
    pub bpla_id: i64,
    pub file_name: String,
    pub original_name: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub uploaded_by: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerConfig {
    pub current_firmware: Option<FileRecord>,
    pub previous_firmwares: Vec<FileRecord>,
    pub current_dump: Option<FileRecord>,
    pub previous_dumps: Vec<FileRecord>,
}

// ── Users and sessions ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub login: String,
    pub full_name: String,
    pub password_hash: String,
    pub role: String,
    pub avatar: Option<String>,
    pub last_login_date: Option<String>,
}

/// The part of a user that travels with a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: i64,
    pub full_name: String,
    pub role: String,
    pub avatar: Option<String>,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            full_name: user.full_name.clone(),
            role: user.role.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub action: String,
    pub details: String,
    pub created_at: String,
    pub full_name: Option<String>,
}

// ── Listing rows ──────────────────────────────────────────────────────

/// A board as shown in a department table.
#[derive(Debug, Clone, Serialize)]
pub struct BoardListing {
    #[serde(flatten)]
    pub board: Board,
    pub supplier_name: Option<String>,
    pub controller_name: Option<String>,
    pub bpla_name: Option<String>,
    pub status: DepartmentStatus,
    pub status_color: &'static str,
}

/// A board as shown in the cross-department summary.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    #[serde(flatten)]
    pub board: Board,
    pub supplier_name: Option<String>,
    pub bpla_name: Option<String>,
    pub status: DepartmentStatus,
    pub status_color: &'static str,
    pub workshop_complete: bool,
    pub electrical_complete: bool,
    pub setup_complete: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatisticsRow {
    pub bpla_name: Option<String>,
    pub green: i64,
    pub green_today: i64,
    pub red: i64,
    pub orange: i64,
}

/// A board joined with the names the listings display.
#[derive(Debug, Clone)]
pub struct BoardWithNames {
    pub board: Board,
    pub supplier_name: Option<String>,
    pub controller_name: Option<String>,
    pub bpla_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_board() -> Board {
        Board {
            id: 1,
            number: "5.2".into(),
            bpla_id: 2,
            supplier_id: None,
            controller_id: None,
            description: None,
            creation_date: "2026-03-01 10:00:00".into(),
            finished_date: None,
            workshop_params: Map::new(),
            workshop_comments: Map::new(),
            workshop_semi_finished: false,
            workshop_status: DepartmentStatus::Finished,
            electrical_params: Map::new(),
            electrical_comments: Map::new(),
            electrical_semi_finished: false,
            electrical_status: DepartmentStatus::InProgress,
            setup_params: Map::new(),
            setup_comments: Map::new(),
            setup_semi_finished: false,
            setup_status: DepartmentStatus::Finished,
        }
    }

    #[test]
    fn test_board_department_accessors() {
        let mut board = sample_board();
        board.electrical_params.insert("telemetry_id".into(), json!("7"));
        assert_eq!(
            board.params(Department::Electrical).get("telemetry_id"),
            Some(&json!("7"))
        );
        assert_eq!(board.status(Department::Workshop), DepartmentStatus::Finished);
        assert!(!board.is_semi_finished(Department::Setup));
    }

    #[test]
    fn test_board_overall_status() {
        let mut board = sample_board();
        assert_eq!(board.overall_status(), DepartmentStatus::InProgress);
        board.electrical_status = DepartmentStatus::Finished;
        assert_eq!(board.overall_status(), DepartmentStatus::Finished);
        board.setup_status = DepartmentStatus::Semifinished;
        assert_eq!(board.overall_status(), DepartmentStatus::Semifinished);
    }

    #[test]
    fn test_board_serializes_flat_columns() {
        let value = serde_json::to_value(sample_board()).unwrap();
        assert_eq!(value["workshop_status"], "finished");
        assert_eq!(value["electrical_semi_finished"], false);
        assert!(value["setup_params"].is_object());
    }

    #[test]
    fn test_listing_flattens_board() {
        let listing = BoardListing {
            board: sample_board(),
            supplier_name: Some("Acme".into()),
            controller_name: None,
            bpla_name: Some("Orlan".into()),
            status: DepartmentStatus::InProgress,
            status_color: DepartmentStatus::InProgress.color(),
        };
        let value = serde_json::to_value(listing).unwrap();
        assert_eq!(value["number"], "5.2");
        assert_eq!(value["status"], "in_progress");
        assert_eq!(value["status_color"], "orange");
    }

    #[test]
    fn test_session_user_uses_camel_case() {
        let user = SessionUser {
            id: 3,
            full_name: "Ivanov I.I.".into(),
            role: "Администратор".into(),
            avatar: None,
        };
        let value = serde_json::to_value(user).unwrap();
        assert_eq!(value["fullName"], "Ivanov I.I.");
        assert!(value.get("full_name").is_none());
    }

    #[test]
    fn test_component_kind_round_trip() {
        for kind in ComponentKind::ALL {
            assert_eq!(kind.as_str().parse::<ComponentKind>().unwrap(), kind);
        }
        assert!("servo".parse::<ComponentKind>().is_err());
    }

    #[test]
    fn test_created_on() {
        let board = sample_board();
        assert!(board.created_on("2026-03-01"));
        assert!(!board.created_on("2026-03-02"));
    }
}
