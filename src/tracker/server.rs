use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, middleware};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::api::{self, AppState, SharedState};
use super::auth::require_session;
use super::db::{DbHandle, TrackerDb};
use super::files::{AVATARS_DIR, IMAGES_DIR};
use super::models::FileKind;
use crate::config::TrackerConfig;

/// Build the full application router: API, public images and avatars, and
/// the session-protected firmware and dump trees.
pub fn build_router(state: SharedState) -> Router {
    let data_dir = state.config.storage.data_dir.clone();

    let mut stored_files = Router::new();
    for kind in [FileKind::Firmware, FileKind::Dump] {
        stored_files = stored_files.nest_service(
            &format!("/{}", kind.dir_name()),
            ServeDir::new(data_dir.join(kind.dir_name())),
        );
    }
    let stored_files =
        stored_files.layer(middleware::from_fn_with_state(state.clone(), require_session));

    let mut app = api::api_router(&state);
    for public in [IMAGES_DIR, AVATARS_DIR] {
        app = app.nest_service(&format!("/{}", public), ServeDir::new(data_dir.join(public)));
    }
    let mut app = app
        .merge(stored_files)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    if state.config.server.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Open the database and build the shared state.
pub fn open_state(config: TrackerConfig) -> Result<SharedState> {
    let db = TrackerDb::new(&config.storage.db_path).with_context(|| {
        format!(
            "Failed to open tracker database at {}",
            config.storage.db_path.display()
        )
    })?;
    let purged = db.purge_expired_sessions(chrono::Utc::now())?;
    if purged > 0 {
        info!(purged, "expired sessions removed");
    }
    Ok(Arc::new(AppState {
        db: DbHandle::new(db),
        config,
    }))
}

/// Start the tracker server and run until Ctrl+C.
pub async fn start_server(config: TrackerConfig) -> Result<()> {
    for warning in config.validate() {
        warn!("{}", warning);
    }
    let addr = config.bind_addr();
    let state = open_state(config)?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    info!("BPLA tracker running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{Duration, Utc};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state(data_dir: &TempDir) -> SharedState {
        let mut config = TrackerConfig::default();
        config.storage.data_dir = data_dir.path().to_path_buf();
        config.storage.db_path = data_dir.path().join("tracker.db");
        open_state(config).unwrap()
    }

    async fn get(router: Router, uri: &str, cookie: Option<&str>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header("cookie", cookie);
        }
        let response = router
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_images_and_avatars_are_public() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        std::fs::create_dir_all(dir.path().join("avatars")).unwrap();
        std::fs::write(dir.path().join("images/logo.svg"), b"<svg/>").unwrap();
        std::fs::write(dir.path().join("avatars/fox.png"), b"png").unwrap();
        let router = build_router(test_state(&dir));

        let (status, body) = get(router.clone(), "/images/logo.svg", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"<svg/>");
        let (status, body) = get(router, "/avatars/fox.png", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"png");
    }

    #[tokio::test]
    async fn test_firmware_files_require_session() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("firmwares")).unwrap();
        std::fs::write(dir.path().join("firmwares/fc_firmware_1.apj"), b"fw").unwrap();
        let state = test_state(&dir);
        let cookie = {
            let db = state.db.lock_sync().unwrap();
            let user = db.create_user("t", "Тест", "unused", "Цех").unwrap();
            let id = db
                .create_session(user.id, Utc::now() + Duration::hours(1))
                .unwrap();
            format!("bpla.sid={}", id)
        };
        let router = build_router(state);

        let (status, _) = get(router.clone(), "/firmwares/fc_firmware_1.apj", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) =
            get(router, "/firmwares/fc_firmware_1.apj", Some(&cookie)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"fw");
    }

    #[tokio::test]
    async fn test_open_state_creates_database() {
        let dir = TempDir::new().unwrap();
        let mut config = TrackerConfig::default();
        config.storage.db_path = dir.path().join("nested/tracker.db");
        open_state(config).unwrap();
        assert!(dir.path().join("nested/tracker.db").exists());
    }

    #[tokio::test]
    async fn test_health_through_full_router() {
        let dir = TempDir::new().unwrap();
        let router = build_router(test_state(&dir));
        let (status, body) = get(router, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }
}
