use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A production department that tracks its own checklist per board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Department {
    /// Mechanical assembly.
    Workshop,
    /// Avionics and wiring installation.
    Electrical,
    /// Final test and setup.
    Setup,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid department: {0}")]
pub struct ParseDepartmentError(pub String);

impl Department {
    pub const ALL: [Department; 3] = [Self::Workshop, Self::Electrical, Self::Setup];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workshop => "workshop",
            Self::Electrical => "electrical",
            Self::Setup => "setup",
        }
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Department {
    type Err = ParseDepartmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "workshop" => Ok(Self::Workshop),
            "electrical" => Ok(Self::Electrical),
            "setup" => Ok(Self::Setup),
            other => Err(ParseDepartmentError(other.to_string())),
        }
    }
}
