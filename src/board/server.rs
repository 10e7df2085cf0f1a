use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

use super::api::{self, AppState, SharedState};
use super::attachments::{AttachmentStore, UploadPolicy};
use super::db::{BoardDb, DbHandle};
use super::ws::{self, Keepalive};
use crate::config::BoardsyncToml;

/// Configuration for the board server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub uploads_dir: PathBuf,
    pub dev_mode: bool,
    pub upload_policy: UploadPolicy,
    pub keepalive: Keepalive,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&BoardsyncToml::default())
    }
}

impl From<&BoardsyncToml> for ServerConfig {
    fn from(toml: &BoardsyncToml) -> Self {
        Self {
            host: toml.server.host.clone(),
            port: toml.server.port,
            db_path: toml.storage.db_path.clone(),
            uploads_dir: toml.storage.uploads_dir.clone(),
            dev_mode: toml.server.dev_mode,
            upload_policy: toml.upload_policy(),
            keepalive: toml.keepalive(),
        }
    }
}

/// Build the full application router: API, WebSocket endpoint and stored
/// uploads.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let attachments = state.service.attachments();
    let uploads = ServeDir::new(attachments.dir());
    let max_upload_bytes = attachments.policy().max_bytes;

    let mut app = api::api_router(max_upload_bytes)
        .route("/ws", get(ws::ws_handler))
        .nest_service("/uploads", uploads)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Open the database, wire the shared state and return it.
pub fn open_state(config: &ServerConfig) -> Result<SharedState> {
    if let Some(parent) = config.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    std::fs::create_dir_all(&config.uploads_dir).with_context(|| {
        format!(
            "Failed to create uploads directory {}",
            config.uploads_dir.display()
        )
    })?;

    let db = BoardDb::new(&config.db_path).context("Failed to initialize board database")?;
    let attachments = AttachmentStore::new(&config.uploads_dir, config.upload_policy.clone());
    Ok(Arc::new(AppState::new(
        DbHandle::new(db),
        attachments,
        config.keepalive,
    )))
}

/// Start the board server and run until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let state = open_state(&config)?;
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    serve(listener, state, config.dev_mode, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves, then close
/// every registered socket.
pub async fn serve(
    listener: TcpListener,
    state: SharedState,
    dev_mode: bool,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let local_addr = listener.local_addr()?;
    let registry = Arc::clone(&state.registry);
    let app = build_router(state, dev_mode);
    info!(addr = %local_addr, dev_mode, "boardsync listening");

    let shutdown = {
        let registry = Arc::clone(&registry);
        async move {
            shutdown.await;
            // Open sockets would otherwise hold graceful shutdown forever.
            registry.clear();
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    registry.clear();
    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_config(dir: &std::path::Path) -> ServerConfig {
        ServerConfig {
            db_path: dir.join("data").join("board.db"),
            uploads_dir: dir.join("uploads"),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(open_state(&test_config(dir.path())).unwrap(), false);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_open_state_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        open_state(&config).unwrap();
        assert!(config.db_path.exists());
        assert!(config.uploads_dir.is_dir());
    }

    #[tokio::test]
    async fn test_uploads_are_served() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let state = open_state(&config).unwrap();
        std::fs::write(config.uploads_dir.join("file-1-abc.txt"), b"hello").unwrap();

        let app = build_router(state, false);
        let req = Request::builder()
            .uri("/uploads/file-1-abc.txt")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn test_dev_mode_allows_cross_origin() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(open_state(&test_config(dir.path())).unwrap(), true);
        let req = Request::builder()
            .uri("/api/projects")
            .header("origin", "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn test_api_create_project_via_full_router() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(open_state(&test_config(dir.path())).unwrap(), false);

        let req = Request::builder()
            .method("POST")
            .uri("/api/users")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"email":"owner@example.com"}"#))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let user: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        let req = Request::builder()
            .method("POST")
            .uri("/api/projects")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"name": "server-test", "ownerId": user["id"]}).to_string(),
            ))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let project: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(project["name"], "server-test");
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let state = open_state(&test_config(dir.path())).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, state, false, async {
            let _ = rx.await;
        }));
        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 5000);
        assert_eq!(config.db_path, PathBuf::from(".boardsync/board.db"));
        assert_eq!(config.uploads_dir, PathBuf::from("uploads"));
        assert!(!config.dev_mode);
    }
}
