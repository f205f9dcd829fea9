//! UAV assembly tracker: boards moving through workshop, electrical and
//! setup, with their firmware history and an audit trail.
//!
//! | Module   | Responsibility                                        |
//! |----------|-------------------------------------------------------|
//! | `api`    | axum routes, request types and `ApiError`             |
//! | `audit`  | best-effort audit entries for user actions            |
//! | `auth`   | bcrypt hashing, session cookies, the session guard    |
//! | `db`     | SQLite schema, migrations and all queries             |
//! | `files`  | upload storage, digests and the avatar gallery        |
//! | `filter` | department and summary listing filters                |
//! | `models` | rows and API payloads                                 |
//! | `seed`   | built-in blueprints for the legacy UAV types          |
//! | `server` | router assembly, static trees and `start_server`      |

pub mod api;
pub mod audit;
pub mod auth;
pub mod db;
pub mod files;
pub mod filter;
pub mod models;
pub mod seed;
pub mod server;
