//! Integration tests for boardsync
//!
//! These tests drive the binary, the full HTTP router and a live server
//! with real WebSocket clients.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Helper to create a boardsync Command
fn boardsync() -> Command {
    cargo_bin_cmd!("boardsync")
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_boardsync_help() {
        boardsync()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("init"));
    }

    #[test]
    fn test_boardsync_version() {
        boardsync()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_serve_help_lists_flags() {
        boardsync()
            .args(["serve", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--db-path"))
            .stdout(predicate::str::contains("--uploads-dir"))
            .stdout(predicate::str::contains("--dev"));
    }

    #[test]
    fn test_init_creates_database() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("data").join("board.db");

        boardsync()
            .current_dir(dir.path())
            .args(["init", "--db-path"])
            .arg(&db_path)
            .assert()
            .success()
            .stdout(predicate::str::contains("Board database initialized"));

        assert!(db_path.exists());
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("board.db");
        for _ in 0..2 {
            boardsync()
                .current_dir(dir.path())
                .args(["init", "--db-path"])
                .arg(&db_path)
                .assert()
                .success();
        }
    }

    #[test]
    fn test_serve_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("boardsync.toml");
        std::fs::write(&config, "[realtime]\nping_interval_secs = 0\n").unwrap();

        boardsync()
            .current_dir(dir.path())
            .args(["serve", "--config"])
            .arg(&config)
            .assert()
            .failure()
            .stderr(predicate::str::contains("ping_interval_secs"));
    }

    #[test]
    fn test_unknown_command_fails() {
        boardsync().arg("bogus").assert().failure();
    }
}

// =============================================================================
// HTTP scenario over the full router
// =============================================================================

mod board_http {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use boardsync::board::server::{ServerConfig, build_router, open_state};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app(dir: &TempDir) -> Router {
        let config = ServerConfig {
            db_path: dir.path().join("board.db"),
            uploads_dir: dir.path().join("uploads"),
            ..ServerConfig::default()
        };
        build_router(open_state(&config).unwrap(), false)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn column_cards(view: &Value, column: &str) -> Vec<(String, i64)> {
        view["columns"]
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["name"] == column)
            .unwrap()["cards"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| {
                (
                    c["title"].as_str().unwrap().to_string(),
                    c["position"].as_i64().unwrap(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_site_project_scenario() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let (status, user) = call(&app, "POST", "/api/users", Some(json!({"email": "ana@example.com"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, project) = call(
            &app,
            "POST",
            "/api/projects",
            Some(json!({"name": "Site", "ownerId": user["id"]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let pid = project["id"].as_str().unwrap().to_string();

        let (_, view) = call(&app, "GET", &format!("/api/projects/{pid}"), None).await;
        let columns: Vec<(String, i64)> = view["columns"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| {
                (
                    c["name"].as_str().unwrap().to_string(),
                    c["position"].as_i64().unwrap(),
                )
            })
            .collect();
        assert_eq!(
            columns,
            vec![
                ("Backlog".to_string(), 0),
                ("Em Progresso".to_string(), 1),
                ("Em Revisão".to_string(), 2),
                ("Concluído".to_string(), 3),
            ]
        );
        let backlog = view["columns"][0]["id"].as_str().unwrap().to_string();

        let (_, design) = call(
            &app,
            "POST",
            &format!("/api/columns/{backlog}/cards"),
            Some(json!({"title": "Design"})),
        )
        .await;
        let (_, copy) = call(
            &app,
            "POST",
            &format!("/api/columns/{backlog}/cards"),
            Some(json!({"title": "Copy"})),
        )
        .await;
        assert_eq!(design["position"], 0);
        assert_eq!(copy["position"], 1);

        let (status, moved) = call(
            &app,
            "POST",
            &format!("/api/cards/{}/move", copy["id"].as_str().unwrap()),
            Some(json!({"columnId": backlog, "position": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(moved["position"], 0);

        let (_, view) = call(&app, "GET", &format!("/api/projects/{pid}"), None).await;
        assert_eq!(
            column_cards(&view, "Backlog"),
            vec![("Copy".to_string(), 0), ("Design".to_string(), 1)]
        );
        assert_eq!(view["counts"]["cards"], 2);
        assert_eq!(view["counts"]["completedCards"], 0);

        let (_, activity) = call(&app, "GET", &format!("/api/projects/{pid}/activity"), None).await;
        let actions: Vec<&str> = activity
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["action"].as_str().unwrap())
            .collect();
        assert!(actions.contains(&"project_created"));
        assert_eq!(actions.iter().filter(|a| **a == "card_created").count(), 2);
    }

    #[tokio::test]
    async fn test_project_delete_cascades() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let (_, user) = call(&app, "POST", "/api/users", Some(json!({}))).await;
        let (_, project) = call(
            &app,
            "POST",
            "/api/projects",
            Some(json!({"name": "Temp", "ownerId": user["id"]})),
        )
        .await;
        let pid = project["id"].as_str().unwrap().to_string();
        let (_, columns) = call(&app, "GET", &format!("/api/projects/{pid}/columns"), None).await;
        let backlog = columns[0]["id"].as_str().unwrap().to_string();
        let (_, card) = call(
            &app,
            "POST",
            &format!("/api/columns/{backlog}/cards"),
            Some(json!({"title": "Orphan?"})),
        )
        .await;

        let (status, _) = call(&app, "DELETE", &format!("/api/projects/{pid}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, "GET", &format!("/api/cards/{}", card["id"].as_str().unwrap()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = call(&app, "GET", &format!("/api/projects/{pid}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }
}

// =============================================================================
// Live server with WebSocket clients
// =============================================================================

mod realtime {
    use super::*;
    use boardsync::board::api::SharedState;
    use boardsync::board::models::{CreateColumn, CreateProject, CreateUser};
    use boardsync::board::server::{ServerConfig, open_state, serve};
    use boardsync::board::ws::Keepalive;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::Value;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

    type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

    struct LiveServer {
        addr: SocketAddr,
        state: SharedState,
        shutdown: Option<oneshot::Sender<()>>,
        task: tokio::task::JoinHandle<anyhow::Result<()>>,
        _dir: TempDir,
    }

    async fn start() -> LiveServer {
        start_with(Keepalive::default()).await
    }

    async fn start_with(keepalive: Keepalive) -> LiveServer {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            db_path: dir.path().join("board.db"),
            uploads_dir: dir.path().join("uploads"),
            keepalive,
            ..ServerConfig::default()
        };
        let state = open_state(&config).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(serve(listener, state.clone(), false, async {
            let _ = rx.await;
        }));
        LiveServer {
            addr,
            state,
            shutdown: Some(tx),
            task,
            _dir: dir,
        }
    }

    async fn seed_project(state: &SharedState) -> String {
        let user = state.service.create_user(CreateUser::default()).await.unwrap();
        let project = state
            .service
            .create_project(CreateProject {
                name: "Site".into(),
                owner_id: user.id,
                ..Default::default()
            })
            .await
            .unwrap();
        project.id
    }

    async fn connect(addr: SocketAddr, project_id: &str) -> WsClient {
        let url = format!("ws://{addr}/ws?projectId={project_id}");
        let (ws, _) = connect_async(url).await.unwrap();
        ws
    }

    async fn wait_for_connections(state: &SharedState, project_id: &str, expected: usize) {
        for _ in 0..200 {
            if state.registry.connection_count(project_id) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {expected} connections, found {}",
            state.registry.connection_count(project_id)
        );
    }

    async fn wait_for_idle(state: &SharedState, expected: usize) {
        for _ in 0..200 {
            if state.registry.idle_count() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {expected} idle connections, found {}",
            state.registry.idle_count()
        );
    }

    /// Waits for a close frame or the end of the stream.
    async fn wait_for_close(ws: &mut WsClient) {
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "socket was not closed");
    }

    /// Next text frame as JSON, skipping control frames.
    async fn next_json(ws: &mut WsClient) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("websocket error");
            if msg.is_text() {
                return serde_json::from_str(msg.to_text().unwrap()).unwrap();
            }
        }
    }

    async fn expect_silence(ws: &mut WsClient) {
        match tokio::time::timeout(Duration::from_millis(200), ws.next()).await {
            Err(_) => {}
            Ok(Some(Ok(msg))) if !msg.is_text() => {}
            Ok(other) => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_message_relayed_to_all_with_timestamp() {
        let server = start().await;
        let pid = seed_project(&server.state).await;
        let mut a = connect(server.addr, &pid).await;
        let mut b = connect(server.addr, &pid).await;
        wait_for_connections(&server.state, &pid, 2).await;

        a.send(Message::text(r#"{"foo":1}"#)).await.unwrap();

        for ws in [&mut a, &mut b] {
            let value = next_json(ws).await;
            assert_eq!(value["foo"], 1);
            let ts = value["timestamp"].as_str().unwrap();
            assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
            assert_eq!(value.as_object().unwrap().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_utf8_binary_message_is_relayed() {
        let server = start().await;
        let pid = seed_project(&server.state).await;
        let mut a = connect(server.addr, &pid).await;
        let mut b = connect(server.addr, &pid).await;
        wait_for_connections(&server.state, &pid, 2).await;

        a.send(Message::binary(br#"{"foo":2}"#.to_vec())).await.unwrap();
        for ws in [&mut a, &mut b] {
            let value = next_json(ws).await;
            assert_eq!(value["foo"], 2);
            assert!(value["timestamp"].is_string());
        }

        // Bytes that are not UTF-8 are dropped.
        a.send(Message::binary(vec![0xff, 0xfe, 0x00])).await.unwrap();
        expect_silence(&mut b).await;
    }

    #[tokio::test]
    async fn test_mutation_broadcast_is_project_scoped() {
        let server = start().await;
        let pid = seed_project(&server.state).await;
        let other = seed_project(&server.state).await;
        let mut watcher = connect(server.addr, &pid).await;
        let mut bystander = connect(server.addr, &other).await;
        wait_for_connections(&server.state, &pid, 1).await;
        wait_for_connections(&server.state, &other, 1).await;

        let column = server
            .state
            .service
            .create_column(
                pid.clone(),
                CreateColumn {
                    name: "QA".into(),
                    color: None,
                },
            )
            .await
            .unwrap();

        let event = next_json(&mut watcher).await;
        assert_eq!(event["type"], "column_created");
        assert_eq!(event["data"]["id"], column.id.as_str());
        assert_eq!(event["data"]["position"], 4);
        expect_silence(&mut bystander).await;
    }

    #[tokio::test]
    async fn test_unknown_project_connection_is_inert() {
        let server = start().await;
        let mut ws = connect(server.addr, "no-such-project").await;

        ws.send(Message::text(r#"{"foo":1}"#)).await.unwrap();
        expect_silence(&mut ws).await;
        assert_eq!(server.state.registry.project_count(), 0);
        assert_eq!(server.state.registry.idle_count(), 1);

        ws.close(None).await.unwrap();
        wait_for_idle(&server.state, 0).await;
    }

    #[tokio::test]
    async fn test_silent_peer_is_dropped_after_pong_timeout() {
        let server = start_with(Keepalive {
            ping_interval: Duration::from_millis(200),
            pong_timeout: Duration::from_millis(300),
        })
        .await;
        let pid = seed_project(&server.state).await;

        // Never polled, so the client never answers a ping.
        let _silent = connect(server.addr, &pid).await;
        wait_for_connections(&server.state, &pid, 1).await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        wait_for_connections(&server.state, &pid, 0).await;
        assert_eq!(server.state.registry.project_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_unregisters() {
        let server = start().await;
        let pid = seed_project(&server.state).await;
        let mut ws = connect(server.addr, &pid).await;
        wait_for_connections(&server.state, &pid, 1).await;

        ws.close(None).await.unwrap();
        wait_for_connections(&server.state, &pid, 0).await;
        assert_eq!(server.state.registry.project_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_sockets() {
        let mut server = start().await;
        let pid = seed_project(&server.state).await;
        let mut ws = connect(server.addr, &pid).await;
        wait_for_connections(&server.state, &pid, 1).await;

        server.shutdown.take().unwrap().send(()).unwrap();
        wait_for_close(&mut ws).await;

        let result = tokio::time::timeout(Duration::from_secs(5), server.task)
            .await
            .expect("server did not stop");
        result.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_sockets() {
        let mut server = start().await;
        let mut anonymous = connect_async(format!("ws://{}/ws", server.addr))
            .await
            .unwrap()
            .0;
        let mut unknown = connect(server.addr, "no-such-project").await;
        wait_for_idle(&server.state, 2).await;

        server.shutdown.take().unwrap().send(()).unwrap();
        wait_for_close(&mut anonymous).await;
        wait_for_close(&mut unknown).await;
        assert_eq!(server.state.registry.idle_count(), 0);

        let result = tokio::time::timeout(Duration::from_secs(5), server.task)
            .await
            .expect("server did not stop");
        result.unwrap().unwrap();
    }
}
