use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Derived progress of one department (or of the whole board) on a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepartmentStatus {
    InProgress,
    Finished,
    Semifinished,
}

impl DepartmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Finished => "finished",
            Self::Semifinished => "semifinished",
        }
    }

    /// Display color used by every listing page.
    pub fn color(&self) -> &'static str {
        match self {
            Self::InProgress => "orange",
            Self::Finished => "green",
            Self::Semifinished => "red",
        }
    }

    /// Listing order: work still on the bench first, blocked units last.
    pub fn sort_rank(&self) -> u8 {
        match self {
            Self::InProgress => 0,
            Self::Finished => 1,
            Self::Semifinished => 2,
        }
    }
}

impl fmt::Display for DepartmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepartmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "finished" => Ok(Self::Finished),
            "semifinished" => Ok(Self::Semifinished),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

/// Whether `key` holds a usable value: present, not null, and not a blank string.
pub fn is_param_set(params: &Map<String, Value>, key: &str) -> bool {
    match params.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// The single status rule every endpoint applies.
///
/// The semi-finished flag is an operator toggle and wins over parameter
/// state. Otherwise a department is finished only when it has at least one
/// configured key and every configured key is set.
pub fn derive_status<'a, I>(
    configured_keys: I,
    params: &Map<String, Value>,
    is_semi_finished: bool,
) -> DepartmentStatus
where
    I: IntoIterator<Item = &'a str>,
{
    if is_semi_finished {
        return DepartmentStatus::Semifinished;
    }

    let mut any_key = false;
    for key in configured_keys {
        any_key = true;
        if !is_param_set(params, key) {
            return DepartmentStatus::InProgress;
        }
    }

    if any_key {
        DepartmentStatus::Finished
    } else {
        DepartmentStatus::InProgress
    }
}

/// Whole-board status across departments: any blocked department blocks the
/// board, and the board is finished only when every department is.
pub fn overall_status(statuses: &[DepartmentStatus]) -> DepartmentStatus {
    if statuses.contains(&DepartmentStatus::Semifinished) {
        DepartmentStatus::Semifinished
    } else if !statuses.is_empty() && statuses.iter().all(|s| *s == DepartmentStatus::Finished) {
        DepartmentStatus::Finished
    } else {
        DepartmentStatus::InProgress
    }
}
