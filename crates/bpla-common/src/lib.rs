//! Shared domain types for the BPLA assembly tracker.
//!
//! Everything in this crate is pure: no I/O, no database, no HTTP. The
//! server crate binds these rules to storage so that every endpoint answers
//! "is this unit done, blocked, or in progress" the same way.
//!
//! | Module       | Responsibility                                          |
//! |--------------|---------------------------------------------------------|
//! | `department` | `Department` enum and its column/wire names             |
//! | `status`     | `DepartmentStatus` and the canonical derivation rule    |
//! | `blueprint`  | Per-UAV-type parameter schema and the PATCH allow-list  |
//! | `number`     | Dot-delimited board number ordering                     |

pub mod blueprint;
pub mod department;
pub mod number;
pub mod status;

pub use blueprint::{Blueprint, ENGINE_PARAM, is_valid_param_key};
pub use department::{Department, ParseDepartmentError};
pub use number::compare_board_numbers;
pub use status::{DepartmentStatus, derive_status, is_param_set, overall_status};
