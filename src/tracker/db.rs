use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bpla_common::{Blueprint, Department, DepartmentStatus, compare_board_numbers, overall_status};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::{Map, Value};

use super::models::*;
use crate::errors::TrackerError;

/// Timestamp layout shared with SQLite's `datetime('now')`.
pub const SQL_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

/// Async-safe handle to the tracker database.
///
/// Wraps `TrackerDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<TrackerDb>>,
}

impl DbHandle {
    pub fn new(db: TrackerDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&TrackerDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup, CLI
    /// commands and tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, TrackerDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

/// Column names of one department on the `boards` and `bpla` tables.
struct DeptColumns {
    params: &'static str,
    comments: &'static str,
    semi_finished: &'static str,
    config: &'static str,
}

fn columns(department: Department) -> DeptColumns {
    match department {
        Department::Workshop => DeptColumns {
            params: "workshop_params",
            comments: "workshop_comments",
            semi_finished: "workshop_semi_finished",
            config: "workshop_config",
        },
        Department::Electrical => DeptColumns {
            params: "electrical_params",
            comments: "electrical_comments",
            semi_finished: "electrical_semi_finished",
            config: "electrical_config",
        },
        Department::Setup => DeptColumns {
            params: "setup_params",
            comments: "setup_comments",
            semi_finished: "setup_semi_finished",
            config: "setup_config",
        },
    }
}

/// Bound JSON path for a single allow-listed key.
fn json_path(key: &str) -> String {
    format!("$.\"{}\"", key)
}

const BOARD_COLUMNS: &str = "b.id, b.number, b.bpla_id, b.supplier_id, b.controller_id, b.description,
     b.creation_date, b.finished_date,
     b.workshop_params, b.workshop_comments, b.workshop_semi_finished, b.workshop_status,
     b.electrical_params, b.electrical_comments, b.electrical_semi_finished, b.electrical_status,
     b.setup_params, b.setup_comments, b.setup_semi_finished, b.setup_status";

/// Fields accepted when a board is created.
#[derive(Debug, Clone, Default)]
pub struct NewBoard {
    pub number: String,
    pub bpla_id: i64,
    pub supplier_id: Option<i64>,
    pub controller_id: Option<i64>,
    pub description: Option<String>,
    pub workshop_params: Option<Map<String, Value>>,
    pub electrical_params: Option<Map<String, Value>>,
    pub setup_params: Option<Map<String, Value>>,
}

/// Full replacement of a board's editable fields. Parameter maps left as
/// `None` keep their stored values.
#[derive(Debug, Clone, Default)]
pub struct BoardUpdate {
    pub number: String,
    pub bpla_id: i64,
    pub supplier_id: Option<i64>,
    pub controller_id: Option<i64>,
    pub description: Option<String>,
    pub workshop_params: Option<Map<String, Value>>,
    pub electrical_params: Option<Map<String, Value>>,
    pub setup_params: Option<Map<String, Value>>,
}

pub struct TrackerDb {
    conn: Connection,
}

impl TrackerDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS bpla (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    parent_id INTEGER REFERENCES bpla(id) ON DELETE SET NULL,
                    workshop_config TEXT,
                    electrical_config TEXT,
                    setup_config TEXT
                );

                CREATE TABLE IF NOT EXISTS suppliers (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS controllers (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS bpla_controllers (
                    bpla_id INTEGER NOT NULL REFERENCES bpla(id) ON DELETE CASCADE,
                    controller_id INTEGER NOT NULL REFERENCES controllers(id) ON DELETE CASCADE,
                    PRIMARY KEY (bpla_id, controller_id)
                );

                CREATE TABLE IF NOT EXISTS components (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    kind TEXT NOT NULL,
                    model_name TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS boards (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    number TEXT NOT NULL,
                    bpla_id INTEGER NOT NULL REFERENCES bpla(id),
                    supplier_id INTEGER REFERENCES suppliers(id) ON DELETE SET NULL,
                    controller_id INTEGER REFERENCES controllers(id) ON DELETE SET NULL,
                    description TEXT,
                    creation_date TEXT NOT NULL DEFAULT (datetime('now')),
                    finished_date TEXT,
                    workshop_params TEXT NOT NULL DEFAULT '{}',
                    workshop_comments TEXT NOT NULL DEFAULT '{}',
                    workshop_semi_finished INTEGER NOT NULL DEFAULT 0,
                    workshop_status TEXT NOT NULL DEFAULT 'in_progress',
                    electrical_params TEXT NOT NULL DEFAULT '{}',
                    electrical_comments TEXT NOT NULL DEFAULT '{}',
                    electrical_semi_finished INTEGER NOT NULL DEFAULT 0,
                    electrical_status TEXT NOT NULL DEFAULT 'in_progress',
                    setup_params TEXT NOT NULL DEFAULT '{}',
                    setup_comments TEXT NOT NULL DEFAULT '{}',
                    setup_semi_finished INTEGER NOT NULL DEFAULT 0,
                    setup_status TEXT NOT NULL DEFAULT 'in_progress'
                );

                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    login TEXT NOT NULL UNIQUE,
                    full_name TEXT NOT NULL,
                    password_hash TEXT NOT NULL,
                    role TEXT NOT NULL,
                    avatar TEXT,
                    last_login_date TEXT
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    expires_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS firmwares (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    controller_id INTEGER NOT NULL REFERENCES controllers(id) ON DELETE CASCADE,
                    bpla_id INTEGER NOT NULL REFERENCES bpla(id) ON DELETE CASCADE,
                    file_name TEXT NOT NULL,
                    original_name TEXT NOT NULL,
                    size_bytes INTEGER NOT NULL,
                    sha256 TEXT NOT NULL,
                    actual INTEGER NOT NULL DEFAULT 0,
                    uploaded_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    uploaded_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS dumps (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    controller_id INTEGER NOT NULL REFERENCES controllers(id) ON DELETE CASCADE,
                    bpla_id INTEGER NOT NULL REFERENCES bpla(id) ON DELETE CASCADE,
                    file_name TEXT NOT NULL,
                    original_name TEXT NOT NULL,
                    size_bytes INTEGER NOT NULL,
                    sha256 TEXT NOT NULL,
                    actual INTEGER NOT NULL DEFAULT 0,
                    uploaded_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    uploaded_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS audit_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
                    action TEXT NOT NULL,
                    details TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_boards_bpla ON boards(bpla_id);
                CREATE INDEX IF NOT EXISTS idx_bpla_parent ON bpla(parent_id);
                CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
                CREATE INDEX IF NOT EXISTS idx_firmwares_pair ON firmwares(controller_id, bpla_id);
                CREATE INDEX IF NOT EXISTS idx_dumps_pair ON dumps(controller_id, bpla_id);
                CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_logs(created_at);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── UAV types and blueprints ──────────────────────────────────────

    pub fn create_bpla(&self, name: &str, parent_id: Option<i64>) -> Result<Bpla> {
        if let Some(parent) = parent_id
            && self.get_bpla(parent)?.is_none()
        {
            return Err(TrackerError::BplaNotFound { id: parent }.into());
        }
        self.conn
            .execute(
                "INSERT INTO bpla (name, parent_id) VALUES (?1, ?2)",
                params![name, parent_id],
            )
            .context("Failed to insert bpla")?;
        let id = self.conn.last_insert_rowid();
        self.get_bpla(id)?.context("UAV type not found after insert")
    }

    pub fn list_bpla(&self) -> Result<Vec<Bpla>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, parent_id FROM bpla ORDER BY name")
            .context("Failed to prepare list_bpla")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Bpla {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    parent_id: row.get(2)?,
                })
            })
            .context("Failed to query bpla")?;
        rows.map(|r| r.context("Failed to read bpla row")).collect()
    }

    pub fn get_bpla(&self, id: i64) -> Result<Option<Bpla>> {
        self.conn
            .query_row(
                "SELECT id, name, parent_id FROM bpla WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Bpla {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        parent_id: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to query bpla")
    }

    /// The department blueprint of a UAV type, `None` when the type has no
    /// config for that department.
    pub fn get_blueprint(&self, bpla_id: i64, department: Department) -> Result<Option<Blueprint>> {
        if self.get_bpla(bpla_id)?.is_none() {
            return Err(TrackerError::BplaNotFound { id: bpla_id }.into());
        }
        load_blueprint(&self.conn, bpla_id, department)
    }

    /// The type's blueprint merged with those of its direct child variants,
    /// so family listings can filter on keys only a child configures.
    pub fn family_blueprint(&self, bpla_id: i64, department: Department) -> Result<Blueprint> {
        let mut merged = self.get_blueprint(bpla_id, department)?.unwrap_or_default();
        let child_ids: Vec<i64> = {
            let mut stmt = self
                .conn
                .prepare("SELECT id FROM bpla WHERE parent_id = ?1 ORDER BY id")
                .context("Failed to prepare child variant query")?;
            let rows = stmt
                .query_map(params![bpla_id], |row| row.get(0))
                .context("Failed to query child variants")?;
            rows.collect::<rusqlite::Result<_>>()
                .context("Failed to read child variant id")?
        };
        for child_id in child_ids {
            if let Some(child) = load_blueprint(&self.conn, child_id, department)? {
                merged.merge(&child);
            }
        }
        Ok(merged)
    }

    /// Replace a department blueprint and restate that department's status on
    /// every board of the type.
    pub fn set_blueprint(
        &self,
        bpla_id: i64,
        department: Department,
        blueprint: &Blueprint,
    ) -> Result<usize> {
        blueprint
            .validate()
            .map_err(TrackerError::BadRequest)?;
        if self.get_bpla(bpla_id)?.is_none() {
            return Err(TrackerError::BplaNotFound { id: bpla_id }.into());
        }
        let json = serde_json::to_string(blueprint).context("Failed to serialize blueprint")?;

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            &format!("UPDATE bpla SET {} = ?1 WHERE id = ?2", columns(department).config),
            params![json, bpla_id],
        )
        .context("Failed to update blueprint")?;

        let board_ids: Vec<i64> = {
            let mut stmt = tx
                .prepare("SELECT id FROM boards WHERE bpla_id = ?1")
                .context("Failed to prepare board id query")?;
            let rows = stmt
                .query_map(params![bpla_id], |row| row.get(0))
                .context("Failed to query board ids")?;
            rows.collect::<rusqlite::Result<_>>()
                .context("Failed to read board id")?
        };
        for id in &board_ids {
            recompute_statuses(&tx, *id)?;
        }
        tx.commit().context("Failed to commit blueprint update")?;
        Ok(board_ids.len())
    }

    /// Write blueprints for types that do not have one yet, creating the
    /// type rows if needed. Returns how many configs were written.
    pub fn seed_blueprints(&self, seeds: &[(i64, Department, Blueprint)]) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let mut written = 0;
        for (bpla_id, department, blueprint) in seeds {
            tx.execute(
                "INSERT OR IGNORE INTO bpla (id, name) VALUES (?1, ?2)",
                params![bpla_id, format!("БПЛА {}", bpla_id)],
            )
            .context("Failed to insert seed bpla")?;
            let json =
                serde_json::to_string(blueprint).context("Failed to serialize blueprint")?;
            written += tx
                .execute(
                    &format!(
                        "UPDATE bpla SET {col} = ?1 WHERE id = ?2 AND {col} IS NULL",
                        col = columns(*department).config
                    ),
                    params![json, bpla_id],
                )
                .context("Failed to seed blueprint")?;
        }
        tx.commit().context("Failed to commit seed")?;
        Ok(written)
    }

    // ── Catalogs ──────────────────────────────────────────────────────

    pub fn create_supplier(&self, name: &str) -> Result<Supplier> {
        self.conn
            .execute("INSERT INTO suppliers (name) VALUES (?1)", params![name])
            .context("Failed to insert supplier")?;
        Ok(Supplier {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
        })
    }

    pub fn list_suppliers(&self) -> Result<Vec<Supplier>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM suppliers ORDER BY name")
            .context("Failed to prepare list_suppliers")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Supplier {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .context("Failed to query suppliers")?;
        rows.map(|r| r.context("Failed to read supplier row")).collect()
    }

    pub fn create_controller(&self, name: &str, bpla_ids: &[i64]) -> Result<Controller> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute("INSERT INTO controllers (name) VALUES (?1)", params![name])
            .context("Failed to insert controller")?;
        let id = tx.last_insert_rowid();
        for bpla_id in bpla_ids {
            let exists: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM bpla WHERE id = ?1)",
                    params![bpla_id],
                    |row| row.get(0),
                )
                .context("Failed to check bpla")?;
            if !exists {
                return Err(TrackerError::BplaNotFound { id: *bpla_id }.into());
            }
            tx.execute(
                "INSERT OR IGNORE INTO bpla_controllers (bpla_id, controller_id) VALUES (?1, ?2)",
                params![bpla_id, id],
            )
            .context("Failed to link controller")?;
        }
        tx.commit().context("Failed to commit controller")?;
        Ok(Controller {
            id,
            name: name.to_string(),
        })
    }

    pub fn list_controllers(&self) -> Result<Vec<Controller>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM controllers ORDER BY name")
            .context("Failed to prepare list_controllers")?;
        let rows = stmt
            .query_map([], read_controller)
            .context("Failed to query controllers")?;
        rows.map(|r| r.context("Failed to read controller row")).collect()
    }

    /// Controllers compatible with a UAV type.
    pub fn list_bpla_controllers(&self, bpla_id: i64) -> Result<Vec<Controller>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT c.id, c.name FROM controllers c
                 JOIN bpla_controllers bc ON c.id = bc.controller_id
                 WHERE bc.bpla_id = ?1 ORDER BY c.name",
            )
            .context("Failed to prepare list_bpla_controllers")?;
        let rows = stmt
            .query_map(params![bpla_id], read_controller)
            .context("Failed to query compatible controllers")?;
        rows.map(|r| r.context("Failed to read controller row")).collect()
    }

    pub fn get_controller(&self, id: i64) -> Result<Option<Controller>> {
        self.conn
            .query_row(
                "SELECT id, name FROM controllers WHERE id = ?1",
                params![id],
                read_controller,
            )
            .optional()
            .context("Failed to query controller")
    }

    pub fn add_component(&self, kind: ComponentKind, model_name: &str) -> Result<Component> {
        self.conn
            .execute(
                "INSERT INTO components (kind, model_name) VALUES (?1, ?2)",
                params![kind.as_str(), model_name],
            )
            .context("Failed to insert component")?;
        Ok(Component {
            id: self.conn.last_insert_rowid(),
            model_name: model_name.to_string(),
        })
    }

    pub fn component_catalog(&self) -> Result<ComponentCatalog> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, kind, model_name FROM components ORDER BY model_name")
            .context("Failed to prepare component_catalog")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .context("Failed to query components")?;
        let mut catalog = ComponentCatalog::default();
        for row in rows {
            let (id, kind, model_name) = row.context("Failed to read component row")?;
            let kind = ComponentKind::from_str(&kind)
                .map_err(|e| anyhow::anyhow!(e))
                .context("Failed to parse component kind")?;
            catalog.slot_mut(kind).push(Component { id, model_name });
        }
        Ok(catalog)
    }

    // ── Board CRUD ────────────────────────────────────────────────────

    pub fn create_board(&self, new: &NewBoard) -> Result<Board> {
        if self.get_bpla(new.bpla_id)?.is_none() {
            return Err(TrackerError::BplaNotFound { id: new.bpla_id }.into());
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO boards (number, bpla_id, supplier_id, controller_id, description,
                                 workshop_params, electrical_params, setup_params)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.number.trim(),
                new.bpla_id,
                new.supplier_id,
                new.controller_id,
                new.description,
                params_json(new.workshop_params.as_ref())?,
                params_json(new.electrical_params.as_ref())?,
                params_json(new.setup_params.as_ref())?,
            ],
        )
        .context("Failed to insert board")?;
        let id = tx.last_insert_rowid();
        recompute_statuses(&tx, id)?;
        tx.commit().context("Failed to commit board insert")?;
        self.get_board(id)?.context("Board not found after insert")
    }

    pub fn get_board(&self, id: i64) -> Result<Option<Board>> {
        load_board(&self.conn, id)
    }

    /// Replace a board's editable fields and restate all statuses.
    pub fn update_board(&self, id: i64, update: &BoardUpdate) -> Result<Board> {
        let current = self
            .get_board(id)?
            .ok_or(TrackerError::BoardNotFound { id })?;
        if self.get_bpla(update.bpla_id)?.is_none() {
            return Err(TrackerError::BplaNotFound { id: update.bpla_id }.into());
        }
        let workshop = update.workshop_params.as_ref().unwrap_or(&current.workshop_params);
        let electrical = update
            .electrical_params
            .as_ref()
            .unwrap_or(&current.electrical_params);
        let setup = update.setup_params.as_ref().unwrap_or(&current.setup_params);

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "UPDATE boards SET number = ?1, bpla_id = ?2, supplier_id = ?3, controller_id = ?4,
                    description = ?5, workshop_params = ?6, electrical_params = ?7, setup_params = ?8
             WHERE id = ?9",
            params![
                update.number.trim(),
                update.bpla_id,
                update.supplier_id,
                update.controller_id,
                update.description,
                params_json(Some(workshop))?,
                params_json(Some(electrical))?,
                params_json(Some(setup))?,
                id,
            ],
        )
        .context("Failed to update board")?;
        recompute_statuses(&tx, id)?;
        tx.commit().context("Failed to commit board update")?;
        self.get_board(id)?.context("Board not found after update")
    }

    /// Electrical form save: identity fields plus the whole electrical map.
    pub fn update_electrical(
        &self,
        id: i64,
        number: &str,
        supplier_id: Option<i64>,
        controller_id: Option<i64>,
        electrical_params: &Map<String, Value>,
    ) -> Result<Board> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let count = tx
            .execute(
                "UPDATE boards SET number = ?1, supplier_id = ?2, controller_id = ?3,
                        electrical_params = ?4
                 WHERE id = ?5",
                params![
                    number.trim(),
                    supplier_id,
                    controller_id,
                    params_json(Some(electrical_params))?,
                    id,
                ],
            )
            .context("Failed to update electrical fields")?;
        if count == 0 {
            return Err(TrackerError::BoardNotFound { id }.into());
        }
        recompute_statuses(&tx, id)?;
        tx.commit().context("Failed to commit electrical update")?;
        self.get_board(id)?.context("Board not found after update")
    }

    /// Delete a board, returning the removed row.
    pub fn delete_board(&self, id: i64) -> Result<Option<Board>> {
        let Some(board) = self.get_board(id)? else {
            return Ok(None);
        };
        self.conn
            .execute("DELETE FROM boards WHERE id = ?1", params![id])
            .context("Failed to delete board")?;
        Ok(Some(board))
    }

    /// Every board, ordered by number segments.
    pub fn list_boards(&self) -> Result<Vec<BoardWithNames>> {
        let mut boards = self.query_boards_with_names("", params![])?;
        boards.sort_by(|a, b| compare_board_numbers(&a.board.number, &b.board.number));
        Ok(boards)
    }

    /// Boards of a type and of its direct child variants.
    pub fn list_family_boards(&self, bpla_id: i64) -> Result<Vec<BoardWithNames>> {
        self.query_boards_with_names(
            "WHERE b.bpla_id = ?1 OR b.bpla_id IN (SELECT id FROM bpla WHERE parent_id = ?1)",
            params![bpla_id],
        )
    }

    fn query_boards_with_names<P: rusqlite::Params>(
        &self,
        where_clause: &str,
        params: P,
    ) -> Result<Vec<BoardWithNames>> {
        let sql = format!(
            "SELECT {BOARD_COLUMNS}, s.name, c.name, bp.name
             FROM boards b
             LEFT JOIN suppliers s ON b.supplier_id = s.id
             LEFT JOIN controllers c ON b.controller_id = c.id
             LEFT JOIN bpla bp ON b.bpla_id = bp.id
             {where_clause}"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare board listing")?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    BoardRow::read(row)?,
                    row.get::<_, Option<String>>(20)?,
                    row.get::<_, Option<String>>(21)?,
                    row.get::<_, Option<String>>(22)?,
                ))
            })
            .context("Failed to query boards")?;
        let mut boards = Vec::new();
        for row in rows {
            let (board, supplier_name, controller_name, bpla_name) =
                row.context("Failed to read board row")?;
            boards.push(BoardWithNames {
                board: board.into_board()?,
                supplier_name,
                controller_name,
                bpla_name,
            });
        }
        Ok(boards)
    }

    // ── Department writes ─────────────────────────────────────────────

    /// Set (or null out) one allow-listed parameter and restate statuses.
    pub fn set_parameter(
        &self,
        board_id: i64,
        department: Department,
        key: &str,
        value: Option<&str>,
    ) -> Result<Board> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        ensure_allowed(&tx, board_id, department, key)?;

        let cols = columns(department);
        tx.execute(
            &format!(
                "UPDATE boards SET {col} = json_set({col}, ?1, ?2) WHERE id = ?3",
                col = cols.params
            ),
            params![json_path(key), value, board_id],
        )
        .context("Failed to set parameter")?;
        recompute_statuses(&tx, board_id)?;
        tx.commit().context("Failed to commit parameter update")?;
        self.get_board(board_id)?.context("Board not found after update")
    }

    /// Store a comment and the semi-finished flag together. A blank comment
    /// removes the key.
    pub fn set_comment(
        &self,
        board_id: i64,
        department: Department,
        key: &str,
        comment: &str,
        is_semi_finished: bool,
    ) -> Result<Board> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        ensure_allowed(&tx, board_id, department, key)?;

        let cols = columns(department);
        let comment = comment.trim();
        if comment.is_empty() {
            tx.execute(
                &format!(
                    "UPDATE boards SET {col} = json_remove({col}, ?1) WHERE id = ?2",
                    col = cols.comments
                ),
                params![json_path(key), board_id],
            )
            .context("Failed to remove comment")?;
        } else {
            tx.execute(
                &format!(
                    "UPDATE boards SET {col} = json_set({col}, ?1, ?2) WHERE id = ?3",
                    col = cols.comments
                ),
                params![json_path(key), comment, board_id],
            )
            .context("Failed to set comment")?;
        }
        tx.execute(
            &format!("UPDATE boards SET {} = ?1 WHERE id = ?2", cols.semi_finished),
            params![is_semi_finished, board_id],
        )
        .context("Failed to set semi-finished flag")?;
        recompute_statuses(&tx, board_id)?;
        tx.commit().context("Failed to commit comment")?;
        self.get_board(board_id)?.context("Board not found after update")
    }

    pub fn set_semi_finished(
        &self,
        board_id: i64,
        department: Department,
        is_semi_finished: bool,
    ) -> Result<Board> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let count = tx
            .execute(
                &format!(
                    "UPDATE boards SET {} = ?1 WHERE id = ?2",
                    columns(department).semi_finished
                ),
                params![is_semi_finished, board_id],
            )
            .context("Failed to set semi-finished flag")?;
        if count == 0 {
            return Err(TrackerError::BoardNotFound { id: board_id }.into());
        }
        recompute_statuses(&tx, board_id)?;
        tx.commit().context("Failed to commit semi-finished flag")?;
        self.get_board(board_id)?.context("Board not found after update")
    }

    // ── Firmware and dumps ────────────────────────────────────────────

    /// Record an uploaded file and make it the current version of its pair.
    pub fn insert_file_record(&self, kind: FileKind, record: &NewFileRecord) -> Result<FileRecord> {
        let table = kind.dir_name();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            &format!("UPDATE {table} SET actual = 0 WHERE controller_id = ?1 AND bpla_id = ?2"),
            params![record.controller_id, record.bpla_id],
        )
        .with_context(|| format!("Failed to reset current {}", kind))?;
        tx.execute(
            &format!(
                "INSERT INTO {table} (controller_id, bpla_id, file_name, original_name, size_bytes,
                                      sha256, actual, uploaded_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)"
            ),
            params![
                record.controller_id,
                record.bpla_id,
                record.file_name,
                record.original_name,
                record.size_bytes,
                record.sha256,
                record.uploaded_by,
            ],
        )
        .with_context(|| format!("Failed to insert {}", kind))?;
        let id = tx.last_insert_rowid();
        tx.commit().with_context(|| format!("Failed to commit {}", kind))?;
        self.get_file_record(kind, id)?
            .with_context(|| format!("{} {} not found after insert", kind, id))
    }

    pub fn get_file_record(&self, kind: FileKind, id: i64) -> Result<Option<FileRecord>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT id, controller_id, bpla_id, file_name, original_name, size_bytes,
                            sha256, actual, uploaded_by, uploaded_at
                     FROM {} WHERE id = ?1",
                    kind.dir_name()
                ),
                params![id],
                read_file_record,
            )
            .optional()
            .with_context(|| format!("Failed to query {}", kind))
    }

    /// Make a historical version current. Exactly one row of the pair ends
    /// up with `actual` set.
    pub fn set_actual(&self, kind: FileKind, id: i64) -> Result<FileRecord> {
        let record = self.get_file_record(kind, id)?.ok_or(TrackerError::RecordNotFound {
            kind: kind.as_str(),
            id,
        })?;
        let table = kind.dir_name();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            &format!(
                "UPDATE {table} SET actual = (id = ?1) WHERE controller_id = ?2 AND bpla_id = ?3"
            ),
            params![id, record.controller_id, record.bpla_id],
        )
        .with_context(|| format!("Failed to switch current {}", kind))?;
        tx.commit().with_context(|| format!("Failed to commit {}", kind))?;
        self.get_file_record(kind, id)?
            .with_context(|| format!("{} {} not found after update", kind, id))
    }

    fn list_file_records(
        &self,
        kind: FileKind,
        controller_id: i64,
        bpla_id: i64,
    ) -> Result<Vec<FileRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT id, controller_id, bpla_id, file_name, original_name, size_bytes,
                        sha256, actual, uploaded_by, uploaded_at
                 FROM {} WHERE controller_id = ?1 AND bpla_id = ?2
                 ORDER BY uploaded_at DESC, id DESC",
                kind.dir_name()
            ))
            .with_context(|| format!("Failed to prepare {} listing", kind))?;
        let rows = stmt
            .query_map(params![controller_id, bpla_id], read_file_record)
            .with_context(|| format!("Failed to query {}", kind))?;
        rows.map(|r| r.context("Failed to read file record row")).collect()
    }

    /// Current and previous firmware/dump versions for a (controller, bpla) pair.
    pub fn controller_config(&self, controller_id: i64, bpla_id: i64) -> Result<ControllerConfig> {
        let (current_firmware, previous_firmwares) =
            split_current(self.list_file_records(FileKind::Firmware, controller_id, bpla_id)?);
        let (current_dump, previous_dumps) =
            split_current(self.list_file_records(FileKind::Dump, controller_id, bpla_id)?);
        Ok(ControllerConfig {
            current_firmware,
            previous_firmwares,
            current_dump,
            previous_dumps,
        })
    }

    // ── Users and sessions ────────────────────────────────────────────

    pub fn create_user(
        &self,
        login: &str,
        full_name: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<User> {
        self.conn
            .execute(
                "INSERT INTO users (login, full_name, password_hash, role) VALUES (?1, ?2, ?3, ?4)",
                params![login, full_name, password_hash, role],
            )
            .with_context(|| format!("Failed to insert user '{}'", login))?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, login, full_name, password_hash, role, avatar, last_login_date
                 FROM users WHERE id = ?1",
                params![id],
                read_user,
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn get_user_by_login(&self, login: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, login, full_name, password_hash, role, avatar, last_login_date
                 FROM users WHERE login = ?1",
                params![login],
                read_user,
            )
            .optional()
            .context("Failed to query user by login")
    }

    pub fn record_login(&self, user_id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET last_login_date = datetime('now') WHERE id = ?1",
                params![user_id],
            )
            .context("Failed to update last_login_date")?;
        Ok(())
    }

    pub fn set_avatar(&self, user_id: i64, avatar: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE users SET avatar = ?1 WHERE id = ?2",
                params![avatar, user_id],
            )
            .context("Failed to update avatar")?;
        Ok(())
    }

    pub fn create_session(&self, user_id: i64, expires_at: DateTime<Utc>) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO sessions (id, user_id, expires_at) VALUES (?1, ?2, ?3)",
                params![id, user_id, expires_at.format(SQL_DATETIME).to_string()],
            )
            .context("Failed to insert session")?;
        Ok(id)
    }

    /// The user behind a live session, `None` for unknown or expired ids.
    pub fn session_user(&self, session_id: &str, now: DateTime<Utc>) -> Result<Option<SessionUser>> {
        self.conn
            .query_row(
                "SELECT u.id, u.full_name, u.role, u.avatar
                 FROM sessions s JOIN users u ON s.user_id = u.id
                 WHERE s.id = ?1 AND s.expires_at > ?2",
                params![session_id, now.format(SQL_DATETIME).to_string()],
                |row| {
                    Ok(SessionUser {
                        id: row.get(0)?,
                        full_name: row.get(1)?,
                        role: row.get(2)?,
                        avatar: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("Failed to query session")
    }

    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM sessions WHERE id = ?1", params![session_id])
            .context("Failed to delete session")?;
        Ok(())
    }

    pub fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                params![now.format(SQL_DATETIME).to_string()],
            )
            .context("Failed to purge sessions")
    }

    // ── Audit log ─────────────────────────────────────────────────────

    pub fn insert_audit(&self, user_id: Option<i64>, action: &str, details: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO audit_logs (user_id, action, details) VALUES (?1, ?2, ?3)",
                params![user_id, action, details],
            )
            .context("Failed to insert audit entry")?;
        Ok(())
    }

    pub fn recent_audit(&self, limit: i64) -> Result<Vec<AuditEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT l.action, l.details, l.created_at, u.full_name
                 FROM audit_logs l LEFT JOIN users u ON l.user_id = u.id
                 ORDER BY l.created_at DESC, l.id DESC
                 LIMIT ?1",
            )
            .context("Failed to prepare recent_audit")?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(AuditEntry {
                    action: row.get(0)?,
                    details: row.get(1)?,
                    created_at: row.get(2)?,
                    full_name: row.get(3)?,
                })
            })
            .context("Failed to query audit log")?;
        rows.map(|r| r.context("Failed to read audit row")).collect()
    }
}

// ── Shared helpers (usable inside a transaction) ─────────────────────

fn params_json(params: Option<&Map<String, Value>>) -> Result<String> {
    match params {
        Some(map) => serde_json::to_string(map).context("Failed to serialize parameters"),
        None => Ok("{}".to_string()),
    }
}

fn load_board(conn: &Connection, id: i64) -> Result<Option<Board>> {
    let row = conn
        .query_row(
            &format!("SELECT {BOARD_COLUMNS} FROM boards b WHERE b.id = ?1"),
            params![id],
            BoardRow::read,
        )
        .optional()
        .context("Failed to query board")?;
    row.map(BoardRow::into_board).transpose()
}

fn load_blueprint(
    conn: &Connection,
    bpla_id: i64,
    department: Department,
) -> Result<Option<Blueprint>> {
    let raw: Option<Option<String>> = conn
        .query_row(
            &format!("SELECT {} FROM bpla WHERE id = ?1", columns(department).config),
            params![bpla_id],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to query blueprint")?;
    match raw.flatten() {
        Some(json) => {
            let blueprint =
                serde_json::from_str(&json).context("Failed to parse blueprint JSON")?;
            Ok(Some(blueprint))
        }
        None => Ok(None),
    }
}

/// Reject keys outside the board type's blueprint for `department`.
fn ensure_allowed(conn: &Connection, board_id: i64, department: Department, key: &str) -> Result<()> {
    let bpla_id: i64 = conn
        .query_row(
            "SELECT bpla_id FROM boards WHERE id = ?1",
            params![board_id],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to query board type")?
        .ok_or(TrackerError::BoardNotFound { id: board_id })?;
    let allowed = load_blueprint(conn, bpla_id, department)?
        .is_some_and(|bp| bp.allows(department, key));
    if !allowed {
        return Err(TrackerError::InvalidParameter {
            department,
            parameter: key.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Restate all department statuses and `finished_date` from stored params,
/// flags and blueprints.
fn recompute_statuses(conn: &Connection, board_id: i64) -> Result<()> {
    let board = load_board(conn, board_id)?.ok_or(TrackerError::BoardNotFound { id: board_id })?;

    let mut statuses = [DepartmentStatus::InProgress; 3];
    for (slot, department) in statuses.iter_mut().zip(Department::ALL) {
        let blueprint = load_blueprint(conn, board.bpla_id, department)?.unwrap_or_default();
        *slot = blueprint.status_for(
            board.params(department),
            board.is_semi_finished(department),
        );
    }
    let finished = overall_status(&statuses) == DepartmentStatus::Finished;

    conn.execute(
        "UPDATE boards SET workshop_status = ?1, electrical_status = ?2, setup_status = ?3,
                finished_date = CASE WHEN ?4 THEN COALESCE(finished_date, date('now')) ELSE NULL END
         WHERE id = ?5",
        params![
            statuses[0].as_str(),
            statuses[1].as_str(),
            statuses[2].as_str(),
            finished,
            board_id,
        ],
    )
    .context("Failed to update board statuses")?;
    Ok(())
}

fn split_current(records: Vec<FileRecord>) -> (Option<FileRecord>, Vec<FileRecord>) {
    let mut current = None;
    let mut previous = Vec::new();
    for record in records {
        if record.actual && current.is_none() {
            current = Some(record);
        } else {
            previous.push(record);
        }
    }
    (current, previous)
}

fn read_controller(row: &Row<'_>) -> rusqlite::Result<Controller> {
    Ok(Controller {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}

fn read_file_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        controller_id: row.get(1)?,
        bpla_id: row.get(2)?,
        file_name: row.get(3)?,
        original_name: row.get(4)?,
        size_bytes: row.get(5)?,
        sha256: row.get(6)?,
        actual: row.get(7)?,
        uploaded_by: row.get(8)?,
        uploaded_at: row.get(9)?,
    })
}

fn read_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        login: row.get(1)?,
        full_name: row.get(2)?,
        password_hash: row.get(3)?,
        role: row.get(4)?,
        avatar: row.get(5)?,
        last_login_date: row.get(6)?,
    })
}

/// Intermediate row struct for reading boards from SQLite before parsing the
/// JSON columns and status strings.
struct BoardRow {
    id: i64,
    number: String,
    bpla_id: i64,
    supplier_id: Option<i64>,
    controller_id: Option<i64>,
    description: Option<String>,
    creation_date: String,
    finished_date: Option<String>,
    departments: [(String, String, bool, String); 3],
}

impl BoardRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        let dept = |base: usize| -> rusqlite::Result<(String, String, bool, String)> {
            Ok((
                row.get(base)?,
                row.get(base + 1)?,
                row.get(base + 2)?,
                row.get(base + 3)?,
            ))
        };
        Ok(Self {
            id: row.get(0)?,
            number: row.get(1)?,
            bpla_id: row.get(2)?,
            supplier_id: row.get(3)?,
            controller_id: row.get(4)?,
            description: row.get(5)?,
            creation_date: row.get(6)?,
            finished_date: row.get(7)?,
            departments: [dept(8)?, dept(12)?, dept(16)?],
        })
    }

    fn into_board(self) -> Result<Board> {
        let [workshop, electrical, setup] = self.departments;
        let (workshop_params, workshop_comments, workshop_semi_finished, workshop_status) =
            parse_department(workshop)?;
        let (electrical_params, electrical_comments, electrical_semi_finished, electrical_status) =
            parse_department(electrical)?;
        let (setup_params, setup_comments, setup_semi_finished, setup_status) =
            parse_department(setup)?;

        Ok(Board {
            id: self.id,
            number: self.number,
            bpla_id: self.bpla_id,
            supplier_id: self.supplier_id,
            controller_id: self.controller_id,
            description: self.description,
            creation_date: self.creation_date,
            finished_date: self.finished_date,
            workshop_params,
            workshop_comments,
            workshop_semi_finished,
            workshop_status,
            electrical_params,
            electrical_comments,
            electrical_semi_finished,
            electrical_status,
            setup_params,
            setup_comments,
            setup_semi_finished,
            setup_status,
        })
    }
}

type DepartmentColumns = (Map<String, Value>, Map<String, Value>, bool, DepartmentStatus);

fn parse_department(raw: (String, String, bool, String)) -> Result<DepartmentColumns> {
    let (params, comments, semi_finished, status) = raw;
    let params = serde_json::from_str(&params).context("Failed to parse params JSON")?;
    let comments = serde_json::from_str(&comments).context("Failed to parse comments JSON")?;
    let status = DepartmentStatus::from_str(&status)
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to parse department status")?;
    Ok((params, comments, semi_finished, status))
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn electrical_blueprint() -> Blueprint {
        Blueprint::from_pairs([
            ("telemetry_id", "Модуль телеметрии"),
            ("bec_id", "BEC"),
            ("gps_id", "GPS модуль"),
        ])
    }

    /// A database with one UAV type that has workshop, electrical and setup
    /// blueprints.
    fn seeded_db() -> Result<(TrackerDb, i64)> {
        let db = TrackerDb::new_in_memory()?;
        let bpla = db.create_bpla("Орлан", None)?;
        db.set_blueprint(
            bpla.id,
            Department::Workshop,
            &Blueprint::from_pairs([("rods", "Тяги")]).with_engines(&["DLE-60", "DLE-35"]),
        )?;
        db.set_blueprint(bpla.id, Department::Electrical, &electrical_blueprint())?;
        db.set_blueprint(
            bpla.id,
            Department::Setup,
            &Blueprint::from_pairs([("traction_date", "Тяга")]),
        )?;
        Ok((db, bpla.id))
    }

    fn new_board(number: &str, bpla_id: i64) -> NewBoard {
        NewBoard {
            number: number.to_string(),
            bpla_id,
            ..Default::default()
        }
    }

    fn tracker_error(err: &anyhow::Error) -> &TrackerError {
        err.downcast_ref::<TrackerError>()
            .expect("expected a TrackerError")
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = TrackerDb::new_in_memory()?;
        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
             ('bpla', 'boards', 'users', 'sessions', 'firmwares', 'dumps', 'audit_logs')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 7);
        // Migrations are idempotent.
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_create_board_starts_in_progress() -> Result<()> {
        let (db, bpla_id) = seeded_db()?;
        let board = db.create_board(&new_board(" 5.2 ", bpla_id))?;
        assert_eq!(board.number, "5.2");
        assert_eq!(board.electrical_status, DepartmentStatus::InProgress);
        assert!(board.finished_date.is_none());
        assert!(!board.creation_date.is_empty());
        Ok(())
    }

    #[test]
    fn test_create_board_rejects_unknown_type() -> Result<()> {
        let db = TrackerDb::new_in_memory()?;
        let err = db.create_board(&new_board("1", 99)).unwrap_err();
        assert!(matches!(tracker_error(&err), TrackerError::BplaNotFound { id: 99 }));
        Ok(())
    }

    #[test]
    fn test_electrical_finishes_once_every_key_is_set() -> Result<()> {
        let (db, bpla_id) = seeded_db()?;
        let board = db.create_board(&new_board("5.2", bpla_id))?;

        let board = db.set_parameter(board.id, Department::Electrical, "telemetry_id", Some("7"))?;
        assert_eq!(board.electrical_status, DepartmentStatus::InProgress);
        assert_eq!(board.electrical_params["telemetry_id"], json!("7"));

        db.set_parameter(board.id, Department::Electrical, "bec_id", Some("1"))?;
        let board = db.set_parameter(board.id, Department::Electrical, "gps_id", Some("3"))?;
        assert_eq!(board.electrical_status, DepartmentStatus::Finished);
        Ok(())
    }

    #[test]
    fn test_set_then_null_returns_to_in_progress_and_keeps_flag() -> Result<()> {
        let (db, bpla_id) = seeded_db()?;
        let board = db.create_board(&new_board("7", bpla_id))?;
        db.set_semi_finished(board.id, Department::Setup, true)?;

        let board = db.set_parameter(board.id, Department::Setup, "traction_date", Some("2026-01-10"))?;
        assert_eq!(board.setup_status, DepartmentStatus::Semifinished);
        let board = db.set_parameter(board.id, Department::Setup, "traction_date", None)?;
        assert!(board.setup_semi_finished);
        assert_eq!(board.setup_params["traction_date"], Value::Null);

        let board = db.set_semi_finished(board.id, Department::Setup, false)?;
        assert_eq!(board.setup_status, DepartmentStatus::InProgress);
        Ok(())
    }

    #[test]
    fn test_clearing_semi_finished_recomputes_finished() -> Result<()> {
        let (db, bpla_id) = seeded_db()?;
        let board = db.create_board(&new_board("8", bpla_id))?;
        db.set_parameter(board.id, Department::Workshop, "rods", Some("да"))?;
        let board = db.set_semi_finished(board.id, Department::Workshop, true)?;
        assert_eq!(board.workshop_status, DepartmentStatus::Semifinished);
        let board = db.set_semi_finished(board.id, Department::Workshop, false)?;
        assert_eq!(board.workshop_status, DepartmentStatus::Finished);
        Ok(())
    }

    #[test]
    fn test_disallowed_key_is_rejected_without_mutation() -> Result<()> {
        let (db, bpla_id) = seeded_db()?;
        let board = db.create_board(&new_board("9", bpla_id))?;

        let err = db
            .set_parameter(board.id, Department::Electrical, "seal_number", Some("x"))
            .unwrap_err();
        assert!(matches!(
            tracker_error(&err),
            TrackerError::InvalidParameter { .. }
        ));
        let err = db
            .set_parameter(board.id, Department::Electrical, "a\"}", Some("x"))
            .unwrap_err();
        assert!(matches!(
            tracker_error(&err),
            TrackerError::InvalidParameter { .. }
        ));

        let after = db.get_board(board.id)?.expect("board should exist");
        assert_eq!(after, board);
        Ok(())
    }

    #[test]
    fn test_engine_key_is_allowed_for_workshop() -> Result<()> {
        let (db, bpla_id) = seeded_db()?;
        let board = db.create_board(&new_board("10", bpla_id))?;
        let board = db.set_parameter(board.id, Department::Workshop, "dvs", Some("DLE-60"))?;
        assert_eq!(board.workshop_params["dvs"], json!("DLE-60"));
        // Engine choice is not a checklist item.
        assert_eq!(board.workshop_status, DepartmentStatus::InProgress);
        Ok(())
    }

    #[test]
    fn test_set_parameter_on_missing_board() -> Result<()> {
        let (db, _) = seeded_db()?;
        let err = db
            .set_parameter(404, Department::Workshop, "rods", Some("x"))
            .unwrap_err();
        assert!(matches!(tracker_error(&err), TrackerError::BoardNotFound { id: 404 }));
        Ok(())
    }

    #[test]
    fn test_comment_and_flag_are_written_together() -> Result<()> {
        let (db, bpla_id) = seeded_db()?;
        let board = db.create_board(&new_board("11", bpla_id))?;

        let board = db.set_comment(board.id, Department::Electrical, "gps_id", "нет антенны", true)?;
        assert_eq!(board.electrical_comments["gps_id"], json!("нет антенны"));
        assert!(board.electrical_semi_finished);
        assert_eq!(board.electrical_status, DepartmentStatus::Semifinished);
        assert_eq!(board.overall_status(), DepartmentStatus::Semifinished);

        let board = db.set_comment(board.id, Department::Electrical, "gps_id", "   ", false)?;
        assert!(board.electrical_comments.get("gps_id").is_none());
        assert_eq!(board.electrical_status, DepartmentStatus::InProgress);
        Ok(())
    }

    #[test]
    fn test_finished_date_follows_overall_status() -> Result<()> {
        let (db, bpla_id) = seeded_db()?;
        let board = db.create_board(&new_board("12", bpla_id))?;
        db.set_parameter(board.id, Department::Workshop, "rods", Some("да"))?;
        for key in ["telemetry_id", "bec_id", "gps_id"] {
            db.set_parameter(board.id, Department::Electrical, key, Some("1"))?;
        }
        let board = db.set_parameter(board.id, Department::Setup, "traction_date", Some("2026-02-01"))?;
        assert_eq!(board.overall_status(), DepartmentStatus::Finished);
        assert!(board.finished_date.is_some());

        let board = db.set_parameter(board.id, Department::Setup, "traction_date", Some(""))?;
        assert_eq!(board.overall_status(), DepartmentStatus::InProgress);
        assert!(board.finished_date.is_none());
        Ok(())
    }

    #[test]
    fn test_blueprint_change_recomputes_existing_boards() -> Result<()> {
        let (db, bpla_id) = seeded_db()?;
        let board = db.create_board(&new_board("13", bpla_id))?;
        for key in ["telemetry_id", "bec_id", "gps_id"] {
            db.set_parameter(board.id, Department::Electrical, key, Some("1"))?;
        }
        assert_eq!(
            db.get_board(board.id)?.unwrap().electrical_status,
            DepartmentStatus::Finished
        );

        let mut blueprint = electrical_blueprint();
        blueprint.params.insert("seal_number".into(), json!("Номер пломбы"));
        let touched = db.set_blueprint(bpla_id, Department::Electrical, &blueprint)?;
        assert_eq!(touched, 1);
        assert_eq!(
            db.get_board(board.id)?.unwrap().electrical_status,
            DepartmentStatus::InProgress
        );
        Ok(())
    }

    #[test]
    fn test_get_blueprint_missing_config_and_type() -> Result<()> {
        let db = TrackerDb::new_in_memory()?;
        let bpla = db.create_bpla("Supercam", None)?;
        assert!(db.get_blueprint(bpla.id, Department::Setup)?.is_none());
        let err = db.get_blueprint(77, Department::Setup).unwrap_err();
        assert!(matches!(tracker_error(&err), TrackerError::BplaNotFound { id: 77 }));
        Ok(())
    }

    #[test]
    fn test_update_board_replaces_fields_and_recomputes() -> Result<()> {
        let (db, bpla_id) = seeded_db()?;
        let other = db.create_bpla("Орлан-М", Some(bpla_id))?;
        let board = db.create_board(&new_board("14", bpla_id))?;

        let updated = db.update_board(
            board.id,
            &BoardUpdate {
                number: "14.1".into(),
                bpla_id: other.id,
                description: Some("перевод".into()),
                workshop_params: Some(json!({"rods": "да"}).as_object().cloned().unwrap()),
                ..Default::default()
            },
        )?;
        assert_eq!(updated.number, "14.1");
        assert_eq!(updated.bpla_id, other.id);
        // The new type has no workshop blueprint, so nothing can finish.
        assert_eq!(updated.workshop_status, DepartmentStatus::InProgress);
        Ok(())
    }

    #[test]
    fn test_update_electrical_replaces_map() -> Result<()> {
        let (db, bpla_id) = seeded_db()?;
        let board = db.create_board(&new_board("15", bpla_id))?;
        let params = json!({"telemetry_id": "1", "bec_id": "2", "gps_id": "3"});
        let board = db.update_electrical(
            board.id,
            "15",
            None,
            None,
            params.as_object().unwrap(),
        )?;
        assert_eq!(board.electrical_status, DepartmentStatus::Finished);

        let err = db
            .update_electrical(999, "x", None, None, &Map::new())
            .unwrap_err();
        assert!(matches!(tracker_error(&err), TrackerError::BoardNotFound { .. }));
        Ok(())
    }

    #[test]
    fn test_delete_board() -> Result<()> {
        let (db, bpla_id) = seeded_db()?;
        let board = db.create_board(&new_board("16", bpla_id))?;
        let deleted = db.delete_board(board.id)?.expect("deleted board");
        assert_eq!(deleted.number, "16");
        assert!(db.get_board(board.id)?.is_none());
        assert!(db.delete_board(board.id)?.is_none());
        assert!(db.list_boards()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_list_boards_orders_by_number_segments() -> Result<()> {
        let (db, bpla_id) = seeded_db()?;
        for number in ["5.10", "12.1", "5.2"] {
            db.create_board(&new_board(number, bpla_id))?;
        }
        let numbers: Vec<String> = db
            .list_boards()?
            .into_iter()
            .map(|b| b.board.number)
            .collect();
        assert_eq!(numbers, vec!["5.2", "5.10", "12.1"]);
        Ok(())
    }

    #[test]
    fn test_family_listing_includes_child_variants() -> Result<()> {
        let (db, parent) = seeded_db()?;
        let child = db.create_bpla("Орлан-10М", Some(parent))?;
        let unrelated = db.create_bpla("Гранат", None)?;
        db.create_board(&new_board("1", parent))?;
        db.create_board(&new_board("2", child.id))?;
        db.create_board(&new_board("3", unrelated.id))?;

        let family = db.list_family_boards(parent)?;
        assert_eq!(family.len(), 2);
        assert!(family.iter().all(|b| b.bpla_name.is_some()));
        assert_eq!(db.list_family_boards(child.id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_family_blueprint_merges_child_keys() -> Result<()> {
        let (db, parent) = seeded_db()?;
        let child = db.create_bpla("Орлан-10М", Some(parent))?;
        db.set_blueprint(
            child.id,
            Department::Setup,
            &Blueprint::from_pairs([("osd_date", "OSD")]),
        )?;

        let merged = db.family_blueprint(parent, Department::Setup)?;
        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["traction_date", "osd_date"]);
        let child_only = db.family_blueprint(child.id, Department::Setup)?;
        assert_eq!(child_only.keys().collect::<Vec<_>>(), vec!["osd_date"]);
        assert!(db.family_blueprint(999, Department::Setup).is_err());
        Ok(())
    }

    #[test]
    fn test_catalogs() -> Result<()> {
        let (db, bpla_id) = seeded_db()?;
        db.create_supplier("Завод №1")?;
        assert_eq!(db.list_suppliers()?.len(), 1);

        let fc = db.create_controller("Pixhawk", &[bpla_id])?;
        db.create_controller("Matek", &[])?;
        assert_eq!(db.list_controllers()?.len(), 2);
        assert_eq!(db.list_bpla_controllers(bpla_id)?, vec![fc]);

        db.add_component(ComponentKind::Gps, "M8N")?;
        db.add_component(ComponentKind::Gps, "M10")?;
        db.add_component(ComponentKind::Pvd, "MS4525")?;
        let catalog = db.component_catalog()?;
        assert_eq!(catalog.gps_models.len(), 2);
        assert_eq!(catalog.gps_models[0].model_name, "M10");
        assert_eq!(catalog.pvd_models.len(), 1);
        assert!(catalog.telemetry_modules.is_empty());
        Ok(())
    }

    fn file(controller_id: i64, bpla_id: i64, name: &str) -> NewFileRecord {
        NewFileRecord {
            controller_id,
            bpla_id,
            file_name: name.to_string(),
            original_name: name.to_string(),
            size_bytes: 4,
            sha256: "00".repeat(32),
            uploaded_by: None,
        }
    }

    #[test]
    fn test_second_upload_leaves_exactly_one_actual() -> Result<()> {
        let (db, bpla_id) = seeded_db()?;
        let fc = db.create_controller("Pixhawk", &[bpla_id])?;

        let first = db.insert_file_record(FileKind::Firmware, &file(fc.id, bpla_id, "a.bin"))?;
        let second = db.insert_file_record(FileKind::Firmware, &file(fc.id, bpla_id, "b.bin"))?;
        assert!(second.actual);

        let config = db.controller_config(fc.id, bpla_id)?;
        assert_eq!(config.current_firmware.as_ref().map(|f| f.id), Some(second.id));
        assert_eq!(config.previous_firmwares.len(), 1);
        assert_eq!(config.previous_firmwares[0].id, first.id);
        assert!(config.current_dump.is_none());

        let restored = db.set_actual(FileKind::Firmware, first.id)?;
        assert!(restored.actual);
        let config = db.controller_config(fc.id, bpla_id)?;
        assert_eq!(config.current_firmware.map(|f| f.id), Some(first.id));
        assert!(config.previous_firmwares.iter().all(|f| !f.actual));
        Ok(())
    }

    #[test]
    fn test_set_actual_unknown_record() -> Result<()> {
        let db = TrackerDb::new_in_memory()?;
        let err = db.set_actual(FileKind::Dump, 5).unwrap_err();
        assert!(matches!(
            tracker_error(&err),
            TrackerError::RecordNotFound { kind: "dump", id: 5 }
        ));
        Ok(())
    }

    #[test]
    fn test_sessions_expire() -> Result<()> {
        let db = TrackerDb::new_in_memory()?;
        let user = db.create_user("ivanov", "Иванов И.И.", "hash", "Цех")?;
        let now = Utc::now();

        let live = db.create_session(user.id, now + chrono::Duration::hours(1))?;
        let stale = db.create_session(user.id, now - chrono::Duration::hours(1))?;

        let session_user = db.session_user(&live, now)?.expect("live session");
        assert_eq!(session_user.full_name, "Иванов И.И.");
        assert!(db.session_user(&stale, now)?.is_none());

        assert_eq!(db.purge_expired_sessions(now)?, 1);
        db.delete_session(&live)?;
        assert!(db.session_user(&live, now)?.is_none());
        Ok(())
    }

    #[test]
    fn test_users_login_and_avatar() -> Result<()> {
        let db = TrackerDb::new_in_memory()?;
        let user = db.create_user("petrov", "Петров П.П.", "hash", "Администратор")?;
        assert!(db.create_user("petrov", "Дубль", "hash", "x").is_err());

        db.record_login(user.id)?;
        db.set_avatar(user.id, "cat.png")?;
        let user = db.get_user_by_login("petrov")?.expect("user");
        assert!(user.last_login_date.is_some());
        assert_eq!(user.avatar.as_deref(), Some("cat.png"));
        assert!(db.get_user_by_login("nobody")?.is_none());
        Ok(())
    }

    #[test]
    fn test_audit_log_joins_user_name() -> Result<()> {
        let db = TrackerDb::new_in_memory()?;
        let user = db.create_user("sidorov", "Сидоров С.С.", "hash", "Цех")?;
        db.insert_audit(Some(user.id), "CREATE_BOARD", "Добавлен борт №1")?;
        db.insert_audit(None, "SEED", "")?;

        let entries = db.recent_audit(100)?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "SEED");
        assert_eq!(entries[1].full_name.as_deref(), Some("Сидоров С.С."));
        assert_eq!(db.recent_audit(1)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_seed_blueprints_does_not_overwrite() -> Result<()> {
        let db = TrackerDb::new_in_memory()?;
        let seeds = vec![(2, Department::Electrical, electrical_blueprint())];
        assert_eq!(db.seed_blueprints(&seeds)?, 1);
        assert_eq!(db.seed_blueprints(&seeds)?, 0);
        assert!(db.get_blueprint(2, Department::Electrical)?.is_some());
        Ok(())
    }
}
