//! Typed error hierarchy for the tracker.
//!
//! `TrackerError` covers the domain failures the HTTP layer needs to tell
//! apart; `api::ApiError` maps them onto status codes.

use bpla_common::Department;
use thiserror::Error;

/// Errors from board, catalog, auth and file operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Board {id} not found")]
    BoardNotFound { id: i64 },

    #[error("UAV type {id} not found")]
    BplaNotFound { id: i64 },

    #[error("No {department} configuration for UAV type {bpla_id}")]
    ConfigNotFound { bpla_id: i64, department: Department },

    #[error("{kind} {id} not found")]
    RecordNotFound { kind: &'static str, id: i64 },

    #[error("Parameter '{parameter}' is not allowed for {department}")]
    InvalidParameter {
        department: Department,
        parameter: String,
    },

    #[error("Invalid department: {0}")]
    InvalidDepartment(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid login or password")]
    InvalidCredentials,

    #[error("Access denied")]
    Forbidden,

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("File storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bpla_common::ParseDepartmentError> for TrackerError {
    fn from(err: bpla_common::ParseDepartmentError) -> Self {
        Self::InvalidDepartment(err.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_not_found_carries_id() {
        let err = TrackerError::BoardNotFound { id: 42 };
        match &err {
            TrackerError::BoardNotFound { id } => assert_eq!(*id, 42),
            _ => panic!("Expected BoardNotFound"),
        }
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn invalid_parameter_names_department_and_key() {
        let err = TrackerError::InvalidParameter {
            department: Department::Electrical,
            parameter: "seal".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("seal"));
        assert!(msg.contains("electrical"));
    }

    #[test]
    fn parse_department_error_converts() {
        let err: TrackerError = "paint".parse::<Department>().unwrap_err().into();
        assert!(matches!(err, TrackerError::InvalidDepartment(ref d) if d == "paint"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&TrackerError::Unauthorized);
    }
}
