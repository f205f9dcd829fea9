//! Listing filters for department tables and the summary page.
//!
//! Boards are loaded per UAV family by the DB layer and matched here, so
//! the rules stay free of dynamic SQL and lowercase Cyrillic numbers
//! correctly.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use bpla_common::{Blueprint, Department, DepartmentStatus, ENGINE_PARAM, is_param_set};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use super::models::{Board, BoardListing, BoardWithNames, StatisticsRow, SummaryRow};
use crate::errors::TrackerError;

/// Accept ids sent as numbers, numeric strings, or empty strings (from HTML
/// selects with nothing chosen).
pub fn lenient_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid id: {}", n))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid id: {}", s))),
        Some(other) => Err(serde::de::Error::custom(format!("invalid id: {}", other))),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_date(value: Option<String>, field: &str) -> Result<Option<NaiveDate>, TrackerError> {
    match non_blank(value) {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| TrackerError::BadRequest(format!("Invalid {}: {}", field, raw))),
        None => Ok(None),
    }
}

/// Body of `POST /api/<department>/filter`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DepartmentFilterRequest {
    #[serde(default, deserialize_with = "lenient_id")]
    pub bpla_id: Option<i64>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub supplier_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub controller_id: Option<i64>,
    /// Inclusive `YYYY-MM-DD` bounds on `finished_date`.
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default)]
    pub date_to: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub engines: Vec<String>,
    /// Remaining `key: true` pairs select boards where that parameter is set.
    #[serde(flatten)]
    pub flags: Map<String, Value>,
}

/// A validated department filter.
#[derive(Debug, Clone, Default)]
pub struct BoardFilter {
    pub number: Option<String>,
    pub supplier_id: Option<i64>,
    pub controller_id: Option<i64>,
    pub finished_from: Option<NaiveDate>,
    pub finished_to: Option<NaiveDate>,
    pub status: Option<DepartmentStatus>,
    pub engines: Vec<String>,
    pub required_params: Vec<String>,
}

impl BoardFilter {
    /// Validate a request against the family's blueprint. Returns the UAV
    /// type to load boards for and the filter to apply.
    pub fn from_request(
        req: DepartmentFilterRequest,
        department: Department,
        blueprint: &Blueprint,
    ) -> Result<(i64, Self), TrackerError> {
        let bpla_id = req.bpla_id.ok_or(TrackerError::MissingField("bpla_id"))?;
        let status = match non_blank(req.status) {
            Some(s) => Some(s.parse::<DepartmentStatus>().map_err(TrackerError::BadRequest)?),
            None => None,
        };
        let required_params = req
            .flags
            .iter()
            .filter(|(key, value)| value.as_bool() == Some(true) && blueprint.allows(department, key))
            .map(|(key, _)| key.clone())
            .collect();
        let engines = if department == Department::Workshop {
            req.engines
        } else {
            Vec::new()
        };
        let finished_from = parse_date(req.date_from, "date_from")?;
        let finished_to = parse_date(req.date_to, "date_to")?;

        Ok((
            bpla_id,
            Self {
                number: non_blank(req.number).map(|n| n.to_lowercase()),
                supplier_id: req.supplier_id,
                controller_id: req.controller_id,
                finished_from,
                finished_to,
                status,
                engines,
                required_params,
            },
        ))
    }

    pub fn matches(&self, board: &Board, department: Department) -> bool {
        if !matches_number(self.number.as_deref(), board) {
            return false;
        }
        if self.supplier_id.is_some() && board.supplier_id != self.supplier_id {
            return false;
        }
        if self.controller_id.is_some() && board.controller_id != self.controller_id {
            return false;
        }
        if !self.matches_finished_date(board) {
            return false;
        }
        if let Some(status) = self.status
            && board.status(department) != status
        {
            return false;
        }
        let params = board.params(department);
        if !self.engines.is_empty() {
            let engine = params.get(ENGINE_PARAM).and_then(Value::as_str);
            if !engine.is_some_and(|e| self.engines.iter().any(|wanted| wanted == e)) {
                return false;
            }
        }
        self.required_params.iter().all(|key| is_param_set(params, key))
    }

    /// Boards with no finish date never match a date bound.
    fn matches_finished_date(&self, board: &Board) -> bool {
        if self.finished_from.is_none() && self.finished_to.is_none() {
            return true;
        }
        let Some(finished) = board
            .finished_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            return false;
        };
        self.finished_from.is_none_or(|from| finished >= from)
            && self.finished_to.is_none_or(|to| finished <= to)
    }
}

/// Trimmed, case-insensitive substring match. `needle` is already lowercase.
fn matches_number(needle: Option<&str>, board: &Board) -> bool {
    match needle {
        Some(needle) => board.number.trim().to_lowercase().contains(needle),
        None => true,
    }
}

/// In progress first, then finished, then blocked; newest first within a
/// status.
fn listing_order(a: (DepartmentStatus, &Board), b: (DepartmentStatus, &Board)) -> Ordering {
    a.0.sort_rank()
        .cmp(&b.0.sort_rank())
        .then_with(|| b.1.creation_date.cmp(&a.1.creation_date))
        .then_with(|| b.1.id.cmp(&a.1.id))
}

pub fn department_listing(
    boards: Vec<BoardWithNames>,
    department: Department,
    filter: &BoardFilter,
) -> Vec<BoardListing> {
    let mut rows: Vec<BoardListing> = boards
        .into_iter()
        .filter(|b| filter.matches(&b.board, department))
        .map(|b| {
            let status = b.board.status(department);
            BoardListing {
                board: b.board,
                supplier_name: b.supplier_name,
                controller_name: b.controller_name,
                bpla_name: b.bpla_name,
                status,
                status_color: status.color(),
            }
        })
        .collect();
    rows.sort_by(|a, b| listing_order((a.status, &a.board), (b.status, &b.board)));
    rows
}

// ── Summary ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryStatus {
    Finished,
    Semifinished,
    InProgress,
    /// In progress and created today.
    Today,
}

impl std::str::FromStr for SummaryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "finished" => Ok(Self::Finished),
            "semifinished" | "overdue" => Ok(Self::Semifinished),
            "in_progress" => Ok(Self::InProgress),
            "today" => Ok(Self::Today),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

/// Body of `POST /api/summary/filter`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryFilterRequest {
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub supplier_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub bpla_id: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SummaryFilter {
    pub number: Option<String>,
    pub supplier_id: Option<i64>,
    pub bpla_id: Option<i64>,
    pub status: Option<SummaryStatus>,
}

impl TryFrom<SummaryFilterRequest> for SummaryFilter {
    type Error = TrackerError;

    fn try_from(req: SummaryFilterRequest) -> Result<Self, Self::Error> {
        let status = match non_blank(req.status) {
            Some(s) => Some(s.parse::<SummaryStatus>().map_err(TrackerError::BadRequest)?),
            None => None,
        };
        Ok(Self {
            number: non_blank(req.number).map(|n| n.to_lowercase()),
            supplier_id: req.supplier_id,
            bpla_id: req.bpla_id,
            status,
        })
    }
}

impl SummaryFilter {
    /// `today` is the current UTC date as `YYYY-MM-DD`.
    pub fn matches(&self, board: &Board, today: &str) -> bool {
        if !matches_number(self.number.as_deref(), board) {
            return false;
        }
        if self.supplier_id.is_some() && board.supplier_id != self.supplier_id {
            return false;
        }
        if let Some(bpla_id) = self.bpla_id
            && board.bpla_id != bpla_id
        {
            return false;
        }
        let overall = board.overall_status();
        match self.status {
            None => true,
            Some(SummaryStatus::Finished) => overall == DepartmentStatus::Finished,
            Some(SummaryStatus::Semifinished) => overall == DepartmentStatus::Semifinished,
            Some(SummaryStatus::InProgress) => overall == DepartmentStatus::InProgress,
            Some(SummaryStatus::Today) => {
                overall == DepartmentStatus::InProgress && board.created_on(today)
            }
        }
    }
}

pub fn summary_listing(
    boards: Vec<BoardWithNames>,
    filter: &SummaryFilter,
    today: &str,
) -> Vec<SummaryRow> {
    let mut rows: Vec<SummaryRow> = boards
        .into_iter()
        .filter(|b| filter.matches(&b.board, today))
        .map(|b| {
            let status = b.board.overall_status();
            let complete = |d| b.board.status(d) == DepartmentStatus::Finished;
            let workshop_complete = complete(Department::Workshop);
            let electrical_complete = complete(Department::Electrical);
            let setup_complete = complete(Department::Setup);
            SummaryRow {
                board: b.board,
                supplier_name: b.supplier_name,
                bpla_name: b.bpla_name,
                status,
                status_color: status.color(),
                workshop_complete,
                electrical_complete,
                setup_complete,
            }
        })
        .collect();
    rows.sort_by(|a, b| listing_order((a.status, &a.board), (b.status, &b.board)));
    rows
}

/// Per-type counts by overall status color.
pub fn statistics(boards: &[BoardWithNames], today: &str) -> Vec<StatisticsRow> {
    let mut by_type: BTreeMap<Option<String>, StatisticsRow> = BTreeMap::new();
    for b in boards {
        let row = by_type
            .entry(b.bpla_name.clone())
            .or_insert_with(|| StatisticsRow {
                bpla_name: b.bpla_name.clone(),
                ..Default::default()
            });
        match b.board.overall_status() {
            DepartmentStatus::Finished => {
                row.green += 1;
                if b.board.finished_date.as_deref() == Some(today) {
                    row.green_today += 1;
                }
            }
            DepartmentStatus::Semifinished => row.red += 1,
            DepartmentStatus::InProgress => row.orange += 1,
        }
    }
    by_type.into_values().collect()
}
