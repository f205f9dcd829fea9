use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{
        DefaultBodyLimit, FromRequest, FromRequestParts, Multipart, Path, Query, Request, State,
        multipart::MultipartError,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode, header, request::Parts},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use bpla_common::{Blueprint, Department};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{error, info};

use super::audit::{self, AuditAction};
use super::auth::{
    clear_cookie, require_role, require_session, session_cookie, session_id_from_headers,
    verify_password,
};
use super::db::{BoardUpdate, DbHandle, NewBoard};
use super::files;
use super::filter::{
    self, BoardFilter, DepartmentFilterRequest, SummaryFilter, SummaryFilterRequest, lenient_id,
};
use super::models::*;
use crate::config::TrackerConfig;
use crate::errors::TrackerError;

/// Largest accepted firmware or dump upload.
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub config: TrackerConfig,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
    #[serde(default, rename = "rememberMe")]
    pub remember_me: bool,
}

#[derive(Deserialize)]
pub struct AvatarRequest {
    pub avatar: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateBplaRequest {
    pub name: String,
    #[serde(default, deserialize_with = "lenient_id")]
    pub parent_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct NamedRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateControllerRequest {
    pub name: String,
    #[serde(default)]
    pub bpla_ids: Vec<i64>,
}

#[derive(Deserialize)]
pub struct CreateComponentRequest {
    pub kind: ComponentKind,
    pub model_name: String,
}

/// Body of `POST /api/add_board` and `PUT /api/board/{id}`.
#[derive(Deserialize)]
pub struct BoardRequest {
    pub number: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub bpla_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub supplier_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub controller_id: Option<i64>,
    pub description: Option<String>,
    pub workshop_params: Option<Map<String, Value>>,
    pub electrical_params: Option<Map<String, Value>>,
    pub setup_params: Option<Map<String, Value>>,
}

impl BoardRequest {
    fn required(&self) -> Result<(String, i64), TrackerError> {
        let number = self
            .number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or(TrackerError::MissingField("number"))?;
        let bpla_id = self.bpla_id.ok_or(TrackerError::MissingField("bpla_id"))?;
        Ok((number.to_string(), bpla_id))
    }
}

#[derive(Deserialize)]
pub struct ElectricalUpdateRequest {
    pub number: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub supplier_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub controller_id: Option<i64>,
    #[serde(default)]
    pub electrical_params: Map<String, Value>,
}

#[derive(Deserialize)]
pub struct SetParameterRequest {
    pub parameter: Option<String>,
    #[serde(default)]
    pub value: Value,
}

#[derive(Deserialize)]
pub struct CommentRequest {
    pub department: Option<String>,
    pub parameter: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub is_semi_finished: bool,
}

#[derive(Deserialize)]
pub struct SemiFinishedRequest {
    pub department: Option<String>,
    #[serde(default)]
    pub is_semi_finished: bool,
}

#[derive(Deserialize)]
pub struct ControllerConfigQuery {
    #[serde(default, rename = "bplaId", deserialize_with = "lenient_id")]
    pub bpla_id: Option<i64>,
}

fn parse_department(raw: Option<&str>) -> Result<Department, TrackerError> {
    let raw = raw.ok_or(TrackerError::MissingField("department"))?;
    Ok(raw.parse::<Department>()?)
}

/// Parameter values are stored as strings; `null` clears the key.
fn parameter_value(value: Value) -> Result<Option<String>, TrackerError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(TrackerError::BadRequest(format!(
            "Unsupported parameter value: {}",
            other
        ))),
    }
}

fn today() -> String {
    Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        let msg = err.to_string();
        match err {
            TrackerError::BoardNotFound { .. }
            | TrackerError::BplaNotFound { .. }
            | TrackerError::ConfigNotFound { .. }
            | TrackerError::RecordNotFound { .. } => ApiError::NotFound(msg),
            TrackerError::InvalidParameter { .. }
            | TrackerError::InvalidDepartment(_)
            | TrackerError::MissingField(_)
            | TrackerError::BadRequest(_) => ApiError::BadRequest(msg),
            TrackerError::Unauthorized | TrackerError::InvalidCredentials => {
                ApiError::Unauthorized(msg)
            }
            TrackerError::Forbidden => ApiError::Forbidden(msg),
            TrackerError::Database(_) | TrackerError::Io(_) => {
                error!("{:#}", anyhow::Error::from(err));
                ApiError::Internal("Internal server error".to_string())
            }
        }
    }
}

/// DB-layer errors carry a `TrackerError` when the failure is a domain one;
/// anything else is an internal error.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<TrackerError>() {
            Ok(domain) => domain.into(),
            Err(other) => TrackerError::Database(other).into(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(err.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

// ── Extractors ────────────────────────────────────────────────────────

/// `Json` whose rejection is a `{"error"}` 400.
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// `Query` whose rejection is a `{"error"}` 400.
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// `Path` whose rejection is a `{"error"}` 400.
pub struct ApiPath<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    Path<T>: FromRequestParts<S, Rejection = PathRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

// ── Router ────────────────────────────────────────────────────────────

/// All API routes. Everything except login/logout/status, the avatar list
/// and the health check requires a live session.
pub fn api_router(state: &SharedState) -> Router<SharedState> {
    let public = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/status", get(auth_status))
        .route("/api/avatars", get(list_avatars))
        .route("/health", get(health_check));

    let mut protected = Router::new()
        .route("/api/user/avatar", put(update_avatar))
        .route("/api/bpla", get(list_bpla).post(create_bpla))
        .route("/api/bpla/{id}/controllers", get(list_bpla_controllers))
        .route("/api/electrical/components", post(create_component))
        .route("/api/electrical/components/{bpla_id}", get(component_catalog))
        .route("/api/suppliers", get(list_suppliers).post(create_supplier))
        .route("/api/controllers", get(list_controllers).post(create_controller))
        .route("/api/controller/{id}/config", get(controller_config))
        .route("/api/boards", get(list_boards))
        .route("/api/add_board", post(create_board))
        .route(
            "/api/board/{id}",
            get(get_board).put(update_board).delete(delete_board),
        )
        .route("/api/board/{id}/set-semifinished", patch(set_semi_finished))
        .route("/api/electrical/{id}", put(update_electrical))
        .route("/api/workshop/{id}/comment", post(set_comment))
        .route("/api/summary/filter", post(summary_filter))
        .route("/api/summary/statistics", get(summary_statistics))
        .route(
            "/api/firmware/upload",
            post(upload_firmware).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            "/api/dump/upload",
            post(upload_dump).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/firmware/{id}/actual", patch(set_actual_firmware))
        .route("/api/dump/{id}/actual", patch(set_actual_dump))
        .route("/api/logs", get(list_logs));

    for department in Department::ALL {
        let name = department.as_str();
        protected = protected
            .route(
                &format!("/api/{name}/{{id}}/parameter"),
                patch(
                    move |state: State<SharedState>,
                          user: Extension<SessionUser>,
                          id: ApiPath<i64>,
                          req: ApiJson<SetParameterRequest>| {
                        set_parameter(state, user, id, req, department)
                    },
                ),
            )
            .route(
                &format!("/api/{name}/filter"),
                post(
                    move |state: State<SharedState>, req: ApiJson<DepartmentFilterRequest>| {
                        filter_department(state, req, department)
                    },
                ),
            )
            .route(
                &format!("/api/bpla/{{id}}/{name}-config"),
                get(move |state: State<SharedState>, id: ApiPath<i64>| {
                    get_config(state, id, department)
                })
                .put(
                    move |state: State<SharedState>,
                          user: Extension<SessionUser>,
                          id: ApiPath<i64>,
                          req: ApiJson<Blueprint>| {
                        put_config(state, user, id, req, department)
                    },
                ),
            );
    }

    let protected =
        protected.route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    public.merge(protected)
}

// ── Auth handlers ─────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn login(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let login = req.login.trim().to_string();
    let user = state
        .db
        .call(move |db| db.get_user_by_login(&login))
        .await?
        .ok_or(TrackerError::InvalidCredentials)?;

    let password = req.password;
    let hash = user.password_hash.clone();
    let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| ApiError::Internal(format!("Password check failed: {}", e)))?;
    if !matches {
        info!(login = %user.login, "rejected login");
        return Err(TrackerError::InvalidCredentials.into());
    }

    let auth = &state.config.auth;
    let (expires_at, max_age) = auth.session_expiry(Utc::now(), req.remember_me)?;
    let user_id = user.id;
    let session_id = state
        .db
        .call(move |db| {
            db.record_login(user_id)?;
            db.create_session(user_id, expires_at)
        })
        .await?;
    audit::record(&state.db, user_id, AuditAction::Login, String::new()).await;
    info!(user_id, remember_me = req.remember_me, "user logged in");

    let cookie = session_cookie(&auth.cookie_name, &session_id, max_age, auth.secure_cookie);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(SessionUser::from(&user)),
    ))
}

async fn logout(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let auth = &state.config.auth;
    if let Some(session_id) = session_id_from_headers(&headers, &auth.cookie_name) {
        state
            .db
            .call(move |db| db.delete_session(&session_id))
            .await?;
    }
    Ok((
        [(header::SET_COOKIE, clear_cookie(&auth.cookie_name, auth.secure_cookie))],
        Json(json!({"message": "Logged out"})),
    ))
}

async fn auth_status(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = match session_id_from_headers(&headers, &state.config.auth.cookie_name) {
        Some(session_id) => {
            state
                .db
                .call(move |db| db.session_user(&session_id, Utc::now()))
                .await?
        }
        None => None,
    };
    Ok(Json(match user {
        Some(user) => json!({"loggedIn": true, "user": user}),
        None => json!({"loggedIn": false}),
    }))
}

fn avatars_dir(state: &AppState) -> std::path::PathBuf {
    state.config.storage.data_dir.join(files::AVATARS_DIR)
}

async fn list_avatars(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let avatars = files::list_avatars(&avatars_dir(&state))
        .await
        .map_err(TrackerError::from)?;
    Ok(Json(avatars))
}

async fn update_avatar(
    State(state): State<SharedState>,
    Extension(user): Extension<SessionUser>,
    ApiJson(req): ApiJson<AvatarRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let avatar = req
        .avatar
        .filter(|a| !a.trim().is_empty())
        .ok_or(TrackerError::MissingField("avatar"))?;
    let available = files::list_avatars(&avatars_dir(&state))
        .await
        .map_err(TrackerError::from)?;
    if !available.contains(&avatar) {
        return Err(TrackerError::BadRequest(format!("Unknown avatar '{}'", avatar)).into());
    }
    let stored = avatar.clone();
    state
        .db
        .call(move |db| db.set_avatar(user.id, &stored))
        .await?;
    Ok(Json(json!({"success": true, "avatar": avatar})))
}

// ── UAV types and catalogs ────────────────────────────────────────────

async fn list_bpla(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let types = state.db.call(|db| db.list_bpla()).await?;
    Ok(Json(types))
}

async fn create_bpla(
    State(state): State<SharedState>,
    Extension(user): Extension<SessionUser>,
    ApiJson(req): ApiJson<CreateBplaRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&user, &state.config.auth.admin_roles)?;
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(TrackerError::MissingField("name").into());
    }
    let parent_id = req.parent_id;
    let bpla = state
        .db
        .call(move |db| db.create_bpla(&name, parent_id))
        .await?;
    Ok((StatusCode::CREATED, Json(bpla)))
}

async fn get_config(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
    department: Department,
) -> Result<Json<Blueprint>, ApiError> {
    let blueprint = state
        .db
        .call(move |db| db.get_blueprint(id, department))
        .await?
        .ok_or(TrackerError::ConfigNotFound {
            bpla_id: id,
            department,
        })?;
    Ok(Json(blueprint))
}

async fn put_config(
    State(state): State<SharedState>,
    Extension(user): Extension<SessionUser>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(blueprint): ApiJson<Blueprint>,
    department: Department,
) -> Result<Json<Blueprint>, ApiError> {
    require_role(&user, &state.config.auth.admin_roles)?;
    let stored = blueprint.clone();
    let touched = state
        .db
        .call(move |db| db.set_blueprint(id, department, &stored))
        .await?;
    info!(bpla_id = id, %department, boards = touched, "blueprint replaced");
    audit::record(
        &state.db,
        user.id,
        AuditAction::UpdateConfig,
        format!("Изменена конфигурация {} для БПЛА ID {}", department, id),
    )
    .await;
    Ok(Json(blueprint))
}

async fn list_bpla_controllers(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let controllers = state.db.call(move |db| db.list_bpla_controllers(id)).await?;
    Ok(Json(controllers))
}

async fn component_catalog(
    State(state): State<SharedState>,
    ApiPath(_bpla_id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let catalog = state.db.call(|db| db.component_catalog()).await?;
    Ok(Json(catalog))
}

async fn create_component(
    State(state): State<SharedState>,
    Extension(user): Extension<SessionUser>,
    ApiJson(req): ApiJson<CreateComponentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&user, &state.config.auth.admin_roles)?;
    let model_name = req.model_name.trim().to_string();
    if model_name.is_empty() {
        return Err(TrackerError::MissingField("model_name").into());
    }
    let kind = req.kind;
    let component = state
        .db
        .call(move |db| db.add_component(kind, &model_name))
        .await?;
    Ok((StatusCode::CREATED, Json(component)))
}

async fn list_suppliers(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let suppliers = state.db.call(|db| db.list_suppliers()).await?;
    Ok(Json(suppliers))
}

async fn create_supplier(
    State(state): State<SharedState>,
    Extension(user): Extension<SessionUser>,
    ApiJson(req): ApiJson<NamedRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&user, &state.config.auth.admin_roles)?;
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(TrackerError::MissingField("name").into());
    }
    let supplier = state.db.call(move |db| db.create_supplier(&name)).await?;
    Ok((StatusCode::CREATED, Json(supplier)))
}

async fn list_controllers(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let controllers = state.db.call(|db| db.list_controllers()).await?;
    Ok(Json(controllers))
}

async fn create_controller(
    State(state): State<SharedState>,
    Extension(user): Extension<SessionUser>,
    ApiJson(req): ApiJson<CreateControllerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&user, &state.config.auth.admin_roles)?;
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(TrackerError::MissingField("name").into());
    }
    let bpla_ids = req.bpla_ids;
    let controller = state
        .db
        .call(move |db| db.create_controller(&name, &bpla_ids))
        .await?;
    Ok((StatusCode::CREATED, Json(controller)))
}

// ── Boards ────────────────────────────────────────────────────────────

async fn list_boards(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let boards = state.db.call(|db| db.list_boards()).await?;
    let rows: Vec<BoardListing> = boards
        .into_iter()
        .map(|b| {
            let status = b.board.overall_status();
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
    Ok(Json(rows))
}

async fn get_board(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .db
        .call(move |db| db.get_board(id))
        .await?
        .ok_or(TrackerError::BoardNotFound { id })?;
    Ok(Json(board))
}

async fn create_board(
    State(state): State<SharedState>,
    Extension(user): Extension<SessionUser>,
    ApiJson(req): ApiJson<BoardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (number, bpla_id) = req.required()?;
    let new = NewBoard {
        number,
        bpla_id,
        supplier_id: req.supplier_id,
        controller_id: req.controller_id,
        description: req.description,
        workshop_params: req.workshop_params,
        electrical_params: req.electrical_params,
        setup_params: req.setup_params,
    };
    let board = state.db.call(move |db| db.create_board(&new)).await?;
    audit::record(
        &state.db,
        user.id,
        AuditAction::CreateBoard,
        format!("Добавлен борт №{}", board.number),
    )
    .await;
    Ok((StatusCode::CREATED, Json(board)))
}

async fn update_board(
    State(state): State<SharedState>,
    Extension(user): Extension<SessionUser>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<BoardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (number, bpla_id) = req.required()?;
    let update = BoardUpdate {
        number,
        bpla_id,
        supplier_id: req.supplier_id,
        controller_id: req.controller_id,
        description: req.description,
        workshop_params: req.workshop_params,
        electrical_params: req.electrical_params,
        setup_params: req.setup_params,
    };
    let board = state
        .db
        .call(move |db| db.update_board(id, &update))
        .await?;
    audit::record(
        &state.db,
        user.id,
        AuditAction::UpdateBoard,
        format!("Обновлен борт №{}", board.number),
    )
    .await;
    Ok(Json(board))
}

async fn delete_board(
    State(state): State<SharedState>,
    Extension(user): Extension<SessionUser>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .db
        .call(move |db| db.delete_board(id))
        .await?
        .ok_or(TrackerError::BoardNotFound { id })?;
    audit::record(
        &state.db,
        user.id,
        AuditAction::DeleteBoard,
        format!("Удален борт №{}", board.number),
    )
    .await;
    Ok(Json(json!({"message": "Deleted", "board": board})))
}

async fn update_electrical(
    State(state): State<SharedState>,
    Extension(user): Extension<SessionUser>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<ElectricalUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let number = req
        .number
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or(TrackerError::MissingField("number"))?;
    let board = state
        .db
        .call(move |db| {
            db.update_electrical(
                id,
                &number,
                req.supplier_id,
                req.controller_id,
                &req.electrical_params,
            )
        })
        .await?;
    audit::record(
        &state.db,
        user.id,
        AuditAction::UpdateBoard,
        format!("Обновлен электромонтаж борта №{}", board.number),
    )
    .await;
    Ok(Json(board))
}

// ── Department writes ─────────────────────────────────────────────────

async fn set_parameter(
    State(state): State<SharedState>,
    Extension(user): Extension<SessionUser>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<SetParameterRequest>,
    department: Department,
) -> Result<Json<Board>, ApiError> {
    let parameter = req
        .parameter
        .filter(|p| !p.is_empty())
        .ok_or(TrackerError::MissingField("parameter"))?;
    let value = parameter_value(req.value)?;

    let details = format!(
        "Борт ID {}: {}.{} = {}",
        id,
        department,
        parameter,
        value.as_deref().unwrap_or("null")
    );
    let board = state
        .db
        .call(move |db| db.set_parameter(id, department, &parameter, value.as_deref()))
        .await?;
    audit::record(&state.db, user.id, AuditAction::UpdateParameter, details).await;
    Ok(Json(board))
}

async fn set_comment(
    State(state): State<SharedState>,
    Extension(user): Extension<SessionUser>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<CommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let department = parse_department(req.department.as_deref())?;
    let parameter = req
        .parameter
        .filter(|p| !p.is_empty())
        .ok_or(TrackerError::MissingField("parameter"))?;
    let comment = req.comment.unwrap_or_default();
    let is_semi_finished = req.is_semi_finished;

    let details = format!(
        "Борт ID {}: комментарий {}.{}, ПФ = {}",
        id, department, parameter, is_semi_finished
    );
    let board = state
        .db
        .call(move |db| db.set_comment(id, department, &parameter, &comment, is_semi_finished))
        .await?;
    audit::record(&state.db, user.id, AuditAction::UpdateComment, details).await;
    Ok(Json(board))
}

async fn set_semi_finished(
    State(state): State<SharedState>,
    Extension(user): Extension<SessionUser>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<SemiFinishedRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let department = parse_department(req.department.as_deref())?;
    let is_semi_finished = req.is_semi_finished;
    let board = state
        .db
        .call(move |db| db.set_semi_finished(id, department, is_semi_finished))
        .await?;
    audit::record(
        &state.db,
        user.id,
        AuditAction::UpdateSemiFinished,
        format!("Борт ID {}: {} ПФ = {}", id, department, is_semi_finished),
    )
    .await;
    Ok(Json(board))
}

// ── Filters and summary ───────────────────────────────────────────────

async fn filter_department(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<DepartmentFilterRequest>,
    department: Department,
) -> Result<Json<Vec<BoardListing>>, ApiError> {
    let bpla_id = req.bpla_id.ok_or(TrackerError::MissingField("bpla_id"))?;
    let (blueprint, boards) = state
        .db
        .call(move |db| {
            let blueprint = db.family_blueprint(bpla_id, department)?;
            Ok((blueprint, db.list_family_boards(bpla_id)?))
        })
        .await?;
    let (_, board_filter) = BoardFilter::from_request(req, department, &blueprint)?;
    Ok(Json(filter::department_listing(boards, department, &board_filter)))
}

async fn summary_filter(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<SummaryFilterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let summary_filter = SummaryFilter::try_from(req)?;
    let boards = state.db.call(|db| db.list_boards()).await?;
    Ok(Json(filter::summary_listing(boards, &summary_filter, &today())))
}

async fn summary_statistics(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let boards = state.db.call(|db| db.list_boards()).await?;
    Ok(Json(filter::statistics(&boards, &today())))
}

// ── Firmware and dumps ────────────────────────────────────────────────

struct UploadForm {
    controller_id: i64,
    bpla_id: i64,
    controller_name: Option<String>,
    original_name: String,
    bytes: Vec<u8>,
}

fn form_id(raw: Option<String>, field: &'static str) -> Result<i64, TrackerError> {
    let raw = raw
        .filter(|v| !v.trim().is_empty())
        .ok_or(TrackerError::MissingField(field))?;
    raw.trim()
        .parse()
        .map_err(|_| TrackerError::BadRequest(format!("Invalid {}: {}", field, raw)))
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut controller_id = None;
    let mut bpla_id = None;
    let mut controller_name = None;
    let mut file = None;

    while let Some(field) = multipart.next_field().await? {
        if let Some(file_name) = field.file_name().map(str::to_string) {
            let bytes = field.bytes().await?;
            file = Some((file_name, bytes.to_vec()));
            continue;
        }
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("controller_id") => controller_id = Some(field.text().await?),
            Some("bpla_id") => bpla_id = Some(field.text().await?),
            Some("controller_name") => controller_name = Some(field.text().await?),
            _ => {}
        }
    }

    let (original_name, bytes) = file.ok_or(TrackerError::MissingField("file"))?;
    if bytes.is_empty() {
        return Err(TrackerError::BadRequest("Uploaded file is empty".to_string()).into());
    }
    Ok(UploadForm {
        controller_id: form_id(controller_id, "controller_id")?,
        bpla_id: form_id(bpla_id, "bpla_id")?,
        controller_name: controller_name.filter(|n| !n.trim().is_empty()),
        original_name,
        bytes,
    })
}

async fn store_upload(
    state: &AppState,
    user: &SessionUser,
    kind: FileKind,
    multipart: Multipart,
) -> Result<(StatusCode, Json<FileRecord>), ApiError> {
    require_role(user, &state.config.auth.upload_roles)?;
    let form = read_upload_form(multipart).await?;

    let (controller_id, bpla_id) = (form.controller_id, form.bpla_id);
    let controller = state
        .db
        .call(move |db| {
            if db.get_bpla(bpla_id)?.is_none() {
                return Err(TrackerError::BplaNotFound { id: bpla_id }.into());
            }
            db.get_controller(controller_id)
        })
        .await?
        .ok_or(TrackerError::RecordNotFound {
            kind: "controller",
            id: controller_id,
        })?;

    let label = form.controller_name.unwrap_or(controller.name);
    let file_name = files::stored_file_name(&label, kind, &form.original_name, Utc::now());
    let data_dir = &state.config.storage.data_dir;
    let path = files::store_file(data_dir, kind, &file_name, &form.bytes)
        .await
        .map_err(TrackerError::from)?;

    let record = NewFileRecord {
        controller_id,
        bpla_id,
        file_name: file_name.clone(),
        original_name: form.original_name,
        size_bytes: form.bytes.len() as i64,
        sha256: files::sha256_hex(&form.bytes),
        uploaded_by: Some(user.id),
    };
    let stored = match state
        .db
        .call(move |db| db.insert_file_record(kind, &record))
        .await
    {
        Ok(stored) => stored,
        Err(e) => {
            files::discard_file(&path).await;
            return Err(e.into());
        }
    };

    info!(%kind, controller_id, bpla_id, file = %file_name, "upload stored");
    let action = match kind {
        FileKind::Firmware => AuditAction::UploadFirmware,
        FileKind::Dump => AuditAction::UploadDump,
    };
    audit::record(
        &state.db,
        user.id,
        action,
        format!("Загружен файл {} ({})", stored.file_name, stored.original_name),
    )
    .await;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn upload_firmware(
    State(state): State<SharedState>,
    Extension(user): Extension<SessionUser>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    store_upload(&state, &user, FileKind::Firmware, multipart).await
}

async fn upload_dump(
    State(state): State<SharedState>,
    Extension(user): Extension<SessionUser>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    store_upload(&state, &user, FileKind::Dump, multipart).await
}

async fn make_actual(
    state: &AppState,
    user: &SessionUser,
    kind: FileKind,
    id: i64,
) -> Result<Json<FileRecord>, ApiError> {
    require_role(user, &state.config.auth.upload_roles)?;
    let record = state.db.call(move |db| db.set_actual(kind, id)).await?;
    audit::record(
        &state.db,
        user.id,
        AuditAction::SetActualFile,
        format!("Текущая версия {}: {}", kind, record.file_name),
    )
    .await;
    Ok(Json(record))
}

async fn set_actual_firmware(
    State(state): State<SharedState>,
    Extension(user): Extension<SessionUser>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    make_actual(&state, &user, FileKind::Firmware, id).await
}

async fn set_actual_dump(
    State(state): State<SharedState>,
    Extension(user): Extension<SessionUser>,
    ApiPath(id): ApiPath<i64>,
) -> Result<impl IntoResponse, ApiError> {
    make_actual(&state, &user, FileKind::Dump, id).await
}

async fn controller_config(
    State(state): State<SharedState>,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<ControllerConfigQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let bpla_id = query.bpla_id.ok_or(TrackerError::MissingField("bplaId"))?;
    let config = state
        .db
        .call(move |db| db.controller_config(id, bpla_id))
        .await?;
    Ok(Json(config))
}

async fn list_logs(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let entries = state.db.call(|db| db.recent_audit(100)).await?;
    Ok(Json(entries))
}

// ── Tests ─────────────────────────────────────────────────────────────
