use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::department::Department;
use crate::status::{DepartmentStatus, derive_status};

/// Workshop parameter that records which engine model was fitted.
pub const ENGINE_PARAM: &str = "dvs";

const MAX_KEY_LEN: usize = 64;

/// Per-UAV-type form schema for one department ("chertezh").
///
/// `params` maps parameter key to its human label and keeps insertion order,
/// so the UI renders checklists in the order they were configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub engines: Vec<String>,
}

impl Blueprint {
    /// Build a blueprint from `(key, label)` pairs.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let params = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        Self {
            params,
            engines: Vec::new(),
        }
    }

    pub fn with_engines(mut self, engines: &[&str]) -> Self {
        self.engines = engines.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Server-side allow-list for single-key writes and comment targets.
    ///
    /// A key is allowed only if it is well-formed and either declared in
    /// `params` or, for the workshop, is the engine selector of a blueprint
    /// that lists engines.
    pub fn allows(&self, department: Department, key: &str) -> bool {
        if !is_valid_param_key(key) {
            return false;
        }
        if self.params.contains_key(key) {
            return true;
        }
        department == Department::Workshop && key == ENGINE_PARAM && !self.engines.is_empty()
    }

    pub fn status_for(&self, params: &Map<String, Value>, is_semi_finished: bool) -> DepartmentStatus {
        derive_status(self.keys(), params, is_semi_finished)
    }

    /// Add `other`'s keys and engines that this blueprint lacks. Existing
    /// labels win.
    pub fn merge(&mut self, other: &Blueprint) {
        for (key, label) in &other.params {
            if !self.params.contains_key(key) {
                self.params.insert(key.clone(), label.clone());
            }
        }
        for engine in &other.engines {
            if !self.engines.contains(engine) {
                self.engines.push(engine.clone());
            }
        }
    }

    /// Structural checks applied before a blueprint is stored.
    pub fn validate(&self) -> Result<(), String> {
        for key in self.params.keys() {
            if !is_valid_param_key(key) {
                return Err(format!("Invalid parameter key '{}'", key));
            }
        }
        for (key, label) in &self.params {
            if !label.is_string() {
                return Err(format!("Label for '{}' must be a string", key));
            }
        }
        Ok(())
    }
}

/// Parameter keys are plain identifiers: ASCII letters, digits and `_`.
pub fn is_valid_param_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
