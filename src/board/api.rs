use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State,
        multipart::MultipartError, rejection::JsonRejection,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::Deserialize;
use tracing::error;

use crate::errors::BoardError;

use super::attachments::AttachmentStore;
use super::db::DbHandle;
use super::dispatch::Broadcaster;
use super::models::*;
use super::registry::ConnectionRegistry;
use super::service::{BoardService, Upload};
use super::ws::Keepalive;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub service: BoardService,
    pub registry: Arc<ConnectionRegistry>,
    pub keepalive: Keepalive,
}

impl AppState {
    /// Wire the registry, dispatcher and service around a database handle.
    pub fn new(db: DbHandle, attachments: AttachmentStore, keepalive: Keepalive) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        Self {
            service: BoardService::new(db, broadcaster, attachments),
            registry,
            keepalive,
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListProjectsQuery {
    pub owner_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderColumnsRequest {
    pub column_orders: Vec<PositionUpdate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderCardsRequest {
    pub card_orders: Vec<PositionUpdate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveCardRequest {
    pub column_id: String,
    pub position: i32,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest {
        message: String,
        field: Option<String>,
    },
    NotFound(String),
    PayloadTooLarge(String),
    UnsupportedMediaType(String),
    Internal(String),
}

impl From<BoardError> for ApiError {
    fn from(e: BoardError) -> Self {
        let message = e.to_string();
        match e {
            BoardError::Validation { field, .. } => ApiError::BadRequest {
                message,
                field: Some(field),
            },
            BoardError::NotFound { .. } => ApiError::NotFound(message),
            BoardError::UnsupportedMediaType { .. } => ApiError::UnsupportedMediaType(message),
            BoardError::PayloadTooLarge { .. } => ApiError::PayloadTooLarge(message),
            BoardError::Transport(_) | BoardError::LockPoisoned | BoardError::Persistence(_) => {
                ApiError::Internal(message)
            }
        }
    }
}

/// Name between the first pair of backticks in a serde error, e.g.
/// "missing field `name`".
fn field_from_serde_message(message: &str) -> Option<String> {
    let start = message.find('`')? + 1;
    let end = start + message[start..].find('`')?;
    Some(message[start..end].to_string())
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = rejection.body_text();
        if rejection.status() == StatusCode::UNSUPPORTED_MEDIA_TYPE {
            return ApiError::UnsupportedMediaType(message);
        }
        ApiError::BadRequest {
            field: field_from_serde_message(&message),
            message,
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        let message = e.body_text();
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(message)
        } else {
            ApiError::BadRequest {
                message,
                field: None,
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, field) = match self {
            ApiError::BadRequest { message, field } => (StatusCode::BAD_REQUEST, message, field),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg, None),
            ApiError::UnsupportedMediaType(msg) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg, None),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg, None)
            }
        };
        let body = match field {
            Some(field) => serde_json::json!({"error": message, "field": field}),
            None => serde_json::json!({"error": message}),
        };
        (status, Json(body)).into_response()
    }
}

/// `Json` extractor whose rejections use the API error format.
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

// ── Router ────────────────────────────────────────────────────────────

/// HTTP mutation and read surface. `max_upload_bytes` bounds the multipart
/// body of attachment uploads.
pub fn api_router(max_upload_bytes: u64) -> Router<SharedState> {
    // Headroom for multipart framing around a file at the limit.
    let upload_body_limit = usize::try_from(max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(64 * 1024);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/users", post(create_user))
        .route("/api/users/{id}", get(get_user))
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/{id}",
            get(get_project).patch(update_project).delete(delete_project),
        )
        .route("/api/projects/{id}/activity", get(project_activity))
        .route(
            "/api/projects/{id}/columns",
            get(list_columns).post(create_column),
        )
        .route("/api/projects/{id}/columns/reorder", post(reorder_columns))
        .route("/api/projects/{id}/tags", get(list_tags).post(create_tag))
        .route(
            "/api/projects/{id}/entities",
            get(list_entities).post(create_entity),
        )
        .route(
            "/api/columns/{id}",
            patch(update_column).delete(delete_column),
        )
        .route("/api/columns/{id}/cards", post(create_card))
        .route("/api/columns/{id}/cards/reorder", post(reorder_cards))
        .route(
            "/api/cards/{id}",
            get(get_card).patch(update_card).delete(delete_card),
        )
        .route("/api/cards/{id}/move", post(move_card))
        .route("/api/cards/{id}/activity", get(card_activity))
        .route(
            "/api/cards/{id}/tags/{tag_id}",
            post(add_card_tag).delete(remove_card_tag),
        )
        .route(
            "/api/cards/{id}/entities/{entity_id}",
            post(add_card_entity).delete(remove_card_entity),
        )
        .route(
            "/api/cards/{id}/checklist",
            get(list_checklist).post(create_checklist_item),
        )
        .route(
            "/api/cards/{id}/comments",
            get(list_comments).post(create_comment),
        )
        .route(
            "/api/cards/{id}/attachments",
            get(list_attachments)
                .post(upload_attachment)
                .layer(DefaultBodyLimit::max(upload_body_limit)),
        )
        .route("/api/tags/{id}", patch(update_tag).delete(delete_tag))
        .route(
            "/api/entities/{id}",
            patch(update_entity).delete(delete_entity),
        )
        .route(
            "/api/checklist/{id}",
            patch(update_checklist_item).delete(delete_checklist_item),
        )
        .route("/api/comments/{id}", axum::routing::delete(delete_comment))
        .route(
            "/api/attachments/{id}",
            axum::routing::delete(delete_attachment),
        )
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn create_user(
    State(state): State<SharedState>,
    ApiJson(input): ApiJson<CreateUser>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.service.create_user(input).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.service.get_user(id).await?))
}

async fn list_projects(
    State(state): State<SharedState>,
    Query(query): Query<ListProjectsQuery>,
) -> Result<Json<Vec<Project>>, ApiError> {
    Ok(Json(state.service.list_projects(query.owner_id).await?))
}

async fn create_project(
    State(state): State<SharedState>,
    ApiJson(input): ApiJson<CreateProject>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state.service.create_project(input).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ProjectView>, ApiError> {
    Ok(Json(state.service.get_project_view(id).await?))
}

async fn update_project(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ApiJson(changes): ApiJson<ProjectChanges>,
) -> Result<Json<Project>, ApiError> {
    Ok(Json(state.service.update_project(id, changes).await?))
}

async fn delete_project(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_project(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn project_activity(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityLogEntry>>, ApiError> {
    Ok(Json(state.service.project_activity(id, query.limit).await?))
}

async fn list_columns(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<ColumnWithCards>>, ApiError> {
    Ok(Json(state.service.list_columns(project_id).await?))
}

async fn create_column(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
    ApiJson(input): ApiJson<CreateColumn>,
) -> Result<impl IntoResponse, ApiError> {
    let column = state.service.create_column(project_id, input).await?;
    Ok((StatusCode::CREATED, Json(column)))
}

async fn reorder_columns(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
    ApiJson(req): ApiJson<ReorderColumnsRequest>,
) -> Result<Json<Vec<PositionUpdate>>, ApiError> {
    Ok(Json(
        state
            .service
            .reorder_columns(project_id, req.column_orders)
            .await?,
    ))
}

async fn update_column(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ApiJson(changes): ApiJson<ColumnChanges>,
) -> Result<Json<Column>, ApiError> {
    Ok(Json(state.service.update_column(id, changes).await?))
}

async fn delete_column(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_column(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_card(
    State(state): State<SharedState>,
    Path(column_id): Path<String>,
    ApiJson(input): ApiJson<CreateCard>,
) -> Result<impl IntoResponse, ApiError> {
    let card = state.service.create_card(column_id, input).await?;
    Ok((StatusCode::CREATED, Json(card)))
}

async fn reorder_cards(
    State(state): State<SharedState>,
    Path(column_id): Path<String>,
    ApiJson(req): ApiJson<ReorderCardsRequest>,
) -> Result<Json<Vec<PositionUpdate>>, ApiError> {
    Ok(Json(
        state
            .service
            .reorder_cards(column_id, req.card_orders)
            .await?,
    ))
}

async fn get_card(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<CardDetail>, ApiError> {
    Ok(Json(state.service.get_card_detail(id).await?))
}

async fn update_card(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ApiJson(changes): ApiJson<CardChanges>,
) -> Result<Json<Card>, ApiError> {
    Ok(Json(state.service.update_card(id, changes).await?))
}

async fn move_card(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<MoveCardRequest>,
) -> Result<Json<Card>, ApiError> {
    Ok(Json(
        state
            .service
            .move_card(id, req.column_id, req.position)
            .await?,
    ))
}

async fn delete_card(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_card(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn card_activity(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityLogEntry>>, ApiError> {
    Ok(Json(state.service.card_activity(id, query.limit).await?))
}

async fn list_tags(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<Tag>>, ApiError> {
    Ok(Json(state.service.list_tags(project_id).await?))
}

async fn create_tag(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
    ApiJson(input): ApiJson<CreateTag>,
) -> Result<impl IntoResponse, ApiError> {
    let tag = state.service.create_tag(project_id, input).await?;
    Ok((StatusCode::CREATED, Json(tag)))
}

async fn update_tag(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ApiJson(changes): ApiJson<TagChanges>,
) -> Result<Json<Tag>, ApiError> {
    Ok(Json(state.service.update_tag(id, changes).await?))
}

async fn delete_tag(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_tag(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_card_tag(
    State(state): State<SharedState>,
    Path((card_id, tag_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.service.add_card_tag(card_id, tag_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_card_tag(
    State(state): State<SharedState>,
    Path((card_id, tag_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.service.remove_card_tag(card_id, tag_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_entities(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<Entity>>, ApiError> {
    Ok(Json(state.service.list_entities(project_id).await?))
}

async fn create_entity(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
    ApiJson(input): ApiJson<CreateEntity>,
) -> Result<impl IntoResponse, ApiError> {
    let entity = state.service.create_entity(project_id, input).await?;
    Ok((StatusCode::CREATED, Json(entity)))
}

async fn update_entity(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ApiJson(changes): ApiJson<EntityChanges>,
) -> Result<Json<Entity>, ApiError> {
    Ok(Json(state.service.update_entity(id, changes).await?))
}

async fn delete_entity(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_entity(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_card_entity(
    State(state): State<SharedState>,
    Path((card_id, entity_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.service.add_card_entity(card_id, entity_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_card_entity(
    State(state): State<SharedState>,
    Path((card_id, entity_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.service.remove_card_entity(card_id, entity_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_checklist(
    State(state): State<SharedState>,
    Path(card_id): Path<String>,
) -> Result<Json<Vec<ChecklistItem>>, ApiError> {
    Ok(Json(state.service.list_checklist(card_id).await?))
}

async fn create_checklist_item(
    State(state): State<SharedState>,
    Path(card_id): Path<String>,
    ApiJson(input): ApiJson<CreateChecklistItem>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state.service.create_checklist_item(card_id, input).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn update_checklist_item(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ApiJson(changes): ApiJson<ChecklistChanges>,
) -> Result<Json<ChecklistItem>, ApiError> {
    Ok(Json(state.service.update_checklist_item(id, changes).await?))
}

async fn delete_checklist_item(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_checklist_item(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_comments(
    State(state): State<SharedState>,
    Path(card_id): Path<String>,
) -> Result<Json<Vec<CommentWithAuthor>>, ApiError> {
    Ok(Json(state.service.list_comments(card_id).await?))
}

async fn create_comment(
    State(state): State<SharedState>,
    Path(card_id): Path<String>,
    ApiJson(input): ApiJson<CreateComment>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = state.service.create_comment(card_id, input).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn delete_comment(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_comment(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_attachments(
    State(state): State<SharedState>,
    Path(card_id): Path<String>,
) -> Result<Json<Vec<AttachmentWithUploader>>, ApiError> {
    Ok(Json(state.service.list_attachments(card_id).await?))
}

/// Multipart upload: a `file` part and an optional `uploadedById` text part.
async fn upload_attachment(
    State(state): State<SharedState>,
    Path(card_id): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut file = None;
    let mut uploaded_by_id = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let original_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await?;
                file = Some((original_name, content_type, bytes.to_vec()));
            }
            Some("uploadedById") => {
                let value = field.text().await?;
                if !value.trim().is_empty() {
                    uploaded_by_id = Some(value.trim().to_string());
                }
            }
            _ => {}
        }
    }

    let Some((original_name, content_type, bytes)) = file else {
        return Err(ApiError::BadRequest {
            message: "No file uploaded".into(),
            field: Some("file".into()),
        });
    };
    let attachment = state
        .service
        .upload_attachment(
            card_id,
            Upload {
                original_name,
                content_type,
                bytes,
                uploaded_by_id,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(attachment)))
}

async fn delete_attachment(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_attachment(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::attachments::{DEFAULT_MAX_BYTES, UploadPolicy};
    use crate::board::db::BoardDb;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        state: SharedState,
        _uploads: tempfile::TempDir,
    }

    fn test_app() -> TestApp {
        let uploads = tempfile::tempdir().unwrap();
        let state = Arc::new(AppState::new(
            DbHandle::new(BoardDb::new_in_memory().unwrap()),
            AttachmentStore::new(uploads.path(), UploadPolicy::default()),
            Keepalive::default(),
        ));
        TestApp {
            router: api_router(DEFAULT_MAX_BYTES).with_state(Arc::clone(&state)),
            state,
            _uploads: uploads,
        }
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> Response {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        app.router.clone().oneshot(request).await.unwrap()
    }

    /// Creates a user and a project; returns the project JSON.
    async fn seed_project(app: &TestApp, name: &str) -> Value {
        let user: Value =
            body_json(send(app, "POST", "/api/users", Some(json!({"firstName": "Ana"}))).await.into_body()).await;
        let response = send(
            app,
            "POST",
            "/api/projects",
            Some(json!({"name": name, "ownerId": user["id"]})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response.into_body()).await
    }

    fn multipart_body(boundary: &str, filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        body
    }

    async fn upload(app: &TestApp, card_id: &str, filename: &str, content_type: &str, data: &[u8]) -> Response {
        let boundary = "boardsync-test-boundary";
        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/cards/{card_id}/attachments"))
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(multipart_body(boundary, filename, content_type, data)))
            .unwrap();
        app.router.clone().oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();
        let response = send(&app, "GET", "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_create_project_applies_defaults() {
        let app = test_app();
        let project = seed_project(&app, "Site").await;
        assert_eq!(project["name"], "Site");
        assert_eq!(project["color"], "#0066CC");
        assert_eq!(project["icon"], "project-diagram");
        assert_eq!(project["progress"], 0);

        let id = project["id"].as_str().unwrap();
        let view: Value = body_json(send(&app, "GET", &format!("/api/projects/{id}"), None).await.into_body()).await;
        let names: Vec<_> = view["columns"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Backlog", "Em Progresso", "Em Revisão", "Concluído"]);
    }

    #[tokio::test]
    async fn test_list_projects_filters_by_owner() {
        let app = test_app();
        let a = seed_project(&app, "A").await;
        seed_project(&app, "B").await;

        let all: Vec<Value> = body_json(send(&app, "GET", "/api/projects", None).await.into_body()).await;
        assert_eq!(all.len(), 2);
        let uri = format!("/api/projects?ownerId={}", a["ownerId"].as_str().unwrap());
        let mine: Vec<Value> = body_json(send(&app, "GET", &uri, None).await.into_body()).await;
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0]["name"], "A");
    }

    #[tokio::test]
    async fn test_validation_error_names_field() {
        let app = test_app();
        let project = seed_project(&app, "Site").await;
        let uri = format!("/api/projects/{}/columns", project["id"].as_str().unwrap());
        let response = send(&app, "POST", &uri, Some(json!({"name": "QA", "color": "blue"}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["field"], "color");
        assert!(body["error"].as_str().unwrap().contains("color"));
    }

    #[tokio::test]
    async fn test_missing_json_field_is_bad_request() {
        let app = test_app();
        let response = send(&app, "POST", "/api/projects", Some(json!({"name": "No owner"}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["field"], "ownerId");
    }

    #[tokio::test]
    async fn test_unknown_project_is_not_found() {
        let app = test_app();
        let response = send(&app, "GET", "/api/projects/nope", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["error"], "Project nope not found");
        assert!(body.get("field").is_none());
    }

    #[tokio::test]
    async fn test_child_lists_of_unknown_parent_are_not_found() {
        let app = test_app();
        for (uri, message) in [
            ("/api/projects/ghost/tags", "Project ghost not found"),
            ("/api/projects/ghost/entities", "Project ghost not found"),
            ("/api/cards/ghost/checklist", "Card ghost not found"),
            ("/api/cards/ghost/comments", "Card ghost not found"),
            ("/api/cards/ghost/attachments", "Card ghost not found"),
        ] {
            let response = send(&app, "GET", uri, None).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
            let body: Value = body_json(response.into_body()).await;
            assert_eq!(body["error"], message, "{uri}");
        }

        // A real parent with no children still lists as empty.
        let project = seed_project(&app, "Site").await;
        let uri = format!("/api/projects/{}/tags", project["id"].as_str().unwrap());
        let response = send(&app, "GET", &uri, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_card_lifecycle() {
        let app = test_app();
        let project = seed_project(&app, "Site").await;
        let pid = project["id"].as_str().unwrap();
        let columns: Vec<Value> =
            body_json(send(&app, "GET", &format!("/api/projects/{pid}/columns"), None).await.into_body()).await;
        let backlog = columns[0]["id"].as_str().unwrap();
        let review = columns[2]["id"].as_str().unwrap();

        let response = send(
            &app,
            "POST",
            &format!("/api/columns/{backlog}/cards"),
            Some(json!({"title": "Design", "priority": "high"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let card: Value = body_json(response.into_body()).await;
        let card_id = card["id"].as_str().unwrap();
        assert_eq!(card["position"], 0);
        assert_eq!(card["createdById"], project["ownerId"]);

        let response = send(
            &app,
            "POST",
            &format!("/api/cards/{card_id}/move"),
            Some(json!({"columnId": review, "position": 5})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let moved: Value = body_json(response.into_body()).await;
        assert_eq!(moved["columnId"], review);
        assert_eq!(moved["position"], 0);

        let response = send(
            &app,
            "PATCH",
            &format!("/api/cards/{card_id}"),
            Some(json!({"completed": true, "description": null})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let detail: Value = body_json(send(&app, "GET", &format!("/api/cards/{card_id}"), None).await.into_body()).await;
        assert_eq!(detail["completed"], true);
        assert_eq!(detail["counts"]["comments"], 0);

        let activity: Vec<Value> =
            body_json(send(&app, "GET", &format!("/api/cards/{card_id}/activity"), None).await.into_body()).await;
        assert_eq!(activity[0]["action"], "card_created");

        let response = send(&app, "DELETE", &format!("/api/cards/{card_id}"), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = send(&app, "DELETE", &format!("/api/cards/{card_id}"), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reorder_columns_endpoint() {
        let app = test_app();
        let project = seed_project(&app, "Site").await;
        let pid = project["id"].as_str().unwrap();
        let columns: Vec<Value> =
            body_json(send(&app, "GET", &format!("/api/projects/{pid}/columns"), None).await.into_body()).await;
        let orders: Vec<Value> = columns
            .iter()
            .rev()
            .enumerate()
            .map(|(i, c)| json!({"id": c["id"], "position": i}))
            .collect();

        let response = send(
            &app,
            "POST",
            &format!("/api/projects/{pid}/columns/reorder"),
            Some(json!({"columnOrders": orders})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let settled: Vec<Value> = body_json(response.into_body()).await;
        assert_eq!(settled[0]["id"], columns[3]["id"]);

        let response = send(
            &app,
            "POST",
            &format!("/api/projects/{pid}/columns/reorder"),
            Some(json!({"columnOrders": [{"id": columns[0]["id"], "position": -1}]})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_mutation_reaches_subscribers() {
        let app = test_app();
        let project = seed_project(&app, "Site").await;
        let pid = project["id"].as_str().unwrap();
        let (handle, mut rx) = app.state.registry.open_connection();
        app.state.registry.subscribe(pid, handle);

        send(
            &app,
            "PATCH",
            &format!("/api/projects/{pid}"),
            Some(json!({"progress": 40})),
        )
        .await;
        let event: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(event["type"], "project_updated");
        assert_eq!(event["data"]["progress"], 40);
    }

    #[tokio::test]
    async fn test_tag_link_and_unlink() {
        let app = test_app();
        let project = seed_project(&app, "Site").await;
        let pid = project["id"].as_str().unwrap();
        let columns: Vec<Value> =
            body_json(send(&app, "GET", &format!("/api/projects/{pid}/columns"), None).await.into_body()).await;
        let card: Value = body_json(
            send(
                &app,
                "POST",
                &format!("/api/columns/{}/cards", columns[0]["id"].as_str().unwrap()),
                Some(json!({"title": "Tagged"})),
            )
            .await
            .into_body(),
        )
        .await;
        let tag: Value = body_json(
            send(
                &app,
                "POST",
                &format!("/api/projects/{pid}/tags"),
                Some(json!({"name": "bug", "color": "#FF0000"})),
            )
            .await
            .into_body(),
        )
        .await;
        let link = format!(
            "/api/cards/{}/tags/{}",
            card["id"].as_str().unwrap(),
            tag["id"].as_str().unwrap()
        );
        assert_eq!(send(&app, "POST", &link, None).await.status(), StatusCode::NO_CONTENT);
        assert_eq!(send(&app, "DELETE", &link, None).await.status(), StatusCode::NO_CONTENT);
        assert_eq!(send(&app, "DELETE", &link, None).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_attachment_upload_rules() {
        let app = test_app();
        let project = seed_project(&app, "Site").await;
        let pid = project["id"].as_str().unwrap();
        let columns: Vec<Value> =
            body_json(send(&app, "GET", &format!("/api/projects/{pid}/columns"), None).await.into_body()).await;
        let card: Value = body_json(
            send(
                &app,
                "POST",
                &format!("/api/columns/{}/cards", columns[0]["id"].as_str().unwrap()),
                Some(json!({"title": "Files"})),
            )
            .await
            .into_body(),
        )
        .await;
        let card_id = card["id"].as_str().unwrap();

        let response = upload(&app, card_id, "brief.pdf", "application/pdf", b"%PDF-1.4").await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let attachment: Value = body_json(response.into_body()).await;
        assert_eq!(attachment["originalName"], "brief.pdf");
        assert!(attachment["url"].as_str().unwrap().starts_with("/uploads/file-"));

        let response = upload(&app, card_id, "setup.exe", "application/octet-stream", b"MZ").await;
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let big = vec![b'a'; (DEFAULT_MAX_BYTES + 1) as usize];
        let response = upload(&app, card_id, "big.txt", "text/plain", &big).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let listed: Vec<Value> =
            body_json(send(&app, "GET", &format!("/api/cards/{card_id}/attachments"), None).await.into_body()).await;
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn test_field_from_serde_message() {
        assert_eq!(
            field_from_serde_message("missing field `ownerId` at line 1 column 17").as_deref(),
            Some("ownerId")
        );
        assert_eq!(field_from_serde_message("expected value"), None);
    }
}
