use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Params, Row, params};

use crate::errors::{BoardError, Result};

use super::models::*;
use super::position::{self, SiblingScope};
use super::validate::{parse_entity_type, parse_priority, validate_orders};

/// Columns every new project starts with, in board order.
pub const DEFAULT_COLUMNS: [(&str, &str); 4] = [
    ("Backlog", "#6B7280"),
    ("Em Progresso", "#3B82F6"),
    ("Em Revisão", "#F59E0B"),
    ("Concluído", "#10B981"),
];

pub const DEFAULT_PROJECT_COLOR: &str = "#0066CC";
pub const DEFAULT_PROJECT_ICON: &str = "project-diagram";
pub const DEFAULT_COLUMN_COLOR: &str = "#6B7280";
pub const DEFAULT_ACTIVITY_LIMIT: i64 = 50;

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| BoardError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup and tests;
    /// never call this from an async hot path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, BoardDb>> {
        self.inner.lock().map_err(|_| BoardError::LockPoisoned)
    }
}

/// Outcome of a card move: the card in its new place and the column it
/// left.
#[derive(Debug, Clone)]
pub struct CardMove {
    pub card: Card,
    pub from_column_id: String,
}

pub struct BoardDb {
    conn: Connection,
}

// ── Column mappings ──────────────────────────────────────────────────

impl FromSql for Priority {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

impl ToSql for Priority {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for EntityType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

impl ToSql for EntityType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn json_text(value: &Option<serde_json::Value>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

const USER_FIELDS: &str = "id, email, first_name, last_name, profile_image_url, created_at, updated_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        profile_image_url: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const PROJECT_FIELDS: &str =
    "id, name, description, color, icon, progress, deadline, owner_id, created_at, updated_at";

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        color: row.get(3)?,
        icon: row.get(4)?,
        progress: row.get(5)?,
        deadline: row.get(6)?,
        owner_id: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

const COLUMN_FIELDS: &str = "id, name, color, position, project_id, created_at, updated_at";

fn column_from_row(row: &Row<'_>) -> rusqlite::Result<Column> {
    Ok(Column {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
        position: row.get(3)?,
        project_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const CARD_FIELDS: &str = "id, title, description, priority, position, deadline, completed, column_id, assignee_id, created_by_id, created_at, updated_at";

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<Card> {
    Ok(Card {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        priority: row.get(3)?,
        position: row.get(4)?,
        deadline: row.get(5)?,
        completed: row.get(6)?,
        column_id: row.get(7)?,
        assignee_id: row.get(8)?,
        created_by_id: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

const TAG_FIELDS: &str = "id, name, color, project_id, created_at";

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
        project_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

const ENTITY_FIELDS: &str = "id, name, type, data, project_id, created_at, updated_at";

fn entity_from_row(row: &Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        entity_type: row.get(2)?,
        data: json_column(row, 3)?,
        project_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const CHECKLIST_FIELDS: &str = "id, title, completed, position, card_id, created_at, updated_at";

fn checklist_from_row(row: &Row<'_>) -> rusqlite::Result<ChecklistItem> {
    Ok(ChecklistItem {
        id: row.get(0)?,
        title: row.get(1)?,
        completed: row.get(2)?,
        position: row.get(3)?,
        card_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const COMMENT_FIELDS: &str = "id, content, card_id, author_id, created_at, updated_at";

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        content: row.get(1)?,
        card_id: row.get(2)?,
        author_id: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

const ATTACHMENT_FIELDS: &str =
    "id, filename, original_name, mime_type, size, url, card_id, uploaded_by_id, created_at";

fn attachment_from_row(row: &Row<'_>) -> rusqlite::Result<Attachment> {
    Ok(Attachment {
        id: row.get(0)?,
        filename: row.get(1)?,
        original_name: row.get(2)?,
        mime_type: row.get(3)?,
        size: row.get(4)?,
        url: row.get(5)?,
        card_id: row.get(6)?,
        uploaded_by_id: row.get(7)?,
        created_at: row.get(8)?,
    })
}

const ACTIVITY_FIELDS: &str =
    "id, action, description, metadata, card_id, project_id, user_id, created_at";

fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<ActivityLogEntry> {
    Ok(ActivityLogEntry {
        id: row.get(0)?,
        action: row.get(1)?,
        description: row.get(2)?,
        metadata: json_column(row, 3)?,
        card_id: row.get(4)?,
        project_id: row.get(5)?,
        user_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
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

    fn run_migrations(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    email TEXT UNIQUE,
                    first_name TEXT,
                    last_name TEXT,
                    profile_image_url TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT,
                    color TEXT NOT NULL DEFAULT '#0066CC',
                    icon TEXT NOT NULL DEFAULT 'project-diagram',
                    progress INTEGER NOT NULL DEFAULT 0,
                    deadline TEXT,
                    owner_id TEXT NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS board_columns (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    color TEXT NOT NULL DEFAULT '#6B7280',
                    position INTEGER NOT NULL,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS cards (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    description TEXT,
                    priority TEXT NOT NULL DEFAULT 'medium',
                    position INTEGER NOT NULL,
                    deadline TEXT,
                    completed INTEGER NOT NULL DEFAULT 0,
                    column_id TEXT NOT NULL REFERENCES board_columns(id) ON DELETE CASCADE,
                    assignee_id TEXT REFERENCES users(id),
                    created_by_id TEXT NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS tags (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    color TEXT NOT NULL,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS card_tags (
                    card_id TEXT NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
                    tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                    PRIMARY KEY (card_id, tag_id)
                );

                CREATE TABLE IF NOT EXISTS entities (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    type TEXT NOT NULL,
                    data TEXT,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS card_entities (
                    card_id TEXT NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
                    entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
                    PRIMARY KEY (card_id, entity_id)
                );

                CREATE TABLE IF NOT EXISTS checklist_items (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    completed INTEGER NOT NULL DEFAULT 0,
                    position INTEGER NOT NULL,
                    card_id TEXT NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS comments (
                    id TEXT PRIMARY KEY,
                    content TEXT NOT NULL,
                    card_id TEXT NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
                    author_id TEXT NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS attachments (
                    id TEXT PRIMARY KEY,
                    filename TEXT NOT NULL,
                    original_name TEXT NOT NULL,
                    mime_type TEXT NOT NULL,
                    size INTEGER NOT NULL,
                    url TEXT NOT NULL,
                    card_id TEXT NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
                    uploaded_by_id TEXT NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS activity_log (
                    id TEXT PRIMARY KEY,
                    action TEXT NOT NULL,
                    description TEXT NOT NULL,
                    metadata TEXT,
                    card_id TEXT,
                    project_id TEXT,
                    user_id TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_columns_project ON board_columns(project_id, position);
                CREATE INDEX IF NOT EXISTS idx_cards_column ON cards(column_id, position);
                CREATE INDEX IF NOT EXISTS idx_tags_project ON tags(project_id);
                CREATE INDEX IF NOT EXISTS idx_entities_project ON entities(project_id);
                CREATE INDEX IF NOT EXISTS idx_checklist_card ON checklist_items(card_id, position);
                CREATE INDEX IF NOT EXISTS idx_comments_card ON comments(card_id);
                CREATE INDEX IF NOT EXISTS idx_attachments_card ON attachments(card_id);
                CREATE INDEX IF NOT EXISTS idx_activity_project ON activity_log(project_id);
                CREATE INDEX IF NOT EXISTS idx_activity_card ON activity_log(card_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    fn query_one<T, P: Params>(
        &self,
        sql: &str,
        params: P,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Option<T>> {
        Ok(self.conn.query_row(sql, params, map).optional()?)
    }

    fn query_all<T, P: Params>(
        &self,
        sql: &str,
        params: P,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, map)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn require_user(&self, id: &str) -> Result<User> {
        self.get_user(id)?
            .ok_or_else(|| BoardError::not_found("User", id))
    }

    fn require_project(&self, id: &str) -> Result<Project> {
        self.get_project(id)?
            .ok_or_else(|| BoardError::not_found("Project", id))
    }

    fn require_column(&self, id: &str) -> Result<Column> {
        self.get_column(id)?
            .ok_or_else(|| BoardError::not_found("Column", id))
    }

    fn require_card(&self, id: &str) -> Result<Card> {
        self.get_card(id)?
            .ok_or_else(|| BoardError::not_found("Card", id))
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn create_user(&self, input: &CreateUser) -> Result<User> {
        let id = new_id();
        let now = timestamp_now();
        let inserted = self.conn.execute(
            "INSERT INTO users (id, email, first_name, last_name, profile_image_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                id,
                input.email,
                input.first_name,
                input.last_name,
                input.profile_image_url,
                now
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                return Err(BoardError::validation("email", "is already registered"));
            }
            Err(e) => return Err(anyhow::Error::from(e).context("Failed to insert user").into()),
        }
        Ok(self.get_user(&id)?.context("User not found after insert")?)
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.query_one(
            &format!("SELECT {USER_FIELDS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
    }

    fn optional_user(&self, id: Option<&str>) -> Result<Option<User>> {
        match id {
            Some(id) => self.get_user(id),
            None => Ok(None),
        }
    }

    // ── Projects ──────────────────────────────────────────────────────

    /// Insert a project with its four default columns and an activity entry.
    pub fn create_project(&self, input: &CreateProject) -> Result<Project> {
        self.require_user(&input.owner_id)?;

        let id = new_id();
        let now = timestamp_now();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        tx.execute(
            "INSERT INTO projects (id, name, description, color, icon, progress, deadline, owner_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                id,
                input.name.trim(),
                input.description,
                input.color.as_deref().unwrap_or(DEFAULT_PROJECT_COLOR),
                input.icon.as_deref().unwrap_or(DEFAULT_PROJECT_ICON),
                input.progress.unwrap_or(0),
                input.deadline,
                input.owner_id,
                now
            ],
        )
        .context("Failed to insert project")?;

        for (position, (name, color)) in DEFAULT_COLUMNS.iter().enumerate() {
            tx.execute(
                "INSERT INTO board_columns (id, name, color, position, project_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![new_id(), name, color, position as i32, id, now],
            )
            .context("Failed to insert default column")?;
        }

        self.log_activity(&NewActivity {
            action: "project_created".into(),
            description: format!("Project \"{}\" was created", input.name.trim()),
            metadata: Some(serde_json::json!({ "projectName": input.name.trim() })),
            card_id: None,
            project_id: Some(id.clone()),
            user_id: input.owner_id.clone(),
        })?;

        tx.commit().context("Failed to commit project creation")?;
        Ok(self.get_project(&id)?.context("Project not found after insert")?)
    }

    /// Projects, most recently updated first, optionally filtered by owner.
    pub fn list_projects(&self, owner_id: Option<&str>) -> Result<Vec<Project>> {
        match owner_id {
            Some(owner) => self.query_all(
                &format!(
                    "SELECT {PROJECT_FIELDS} FROM projects WHERE owner_id = ?1 ORDER BY updated_at DESC, rowid DESC"
                ),
                params![owner],
                project_from_row,
            ),
            None => self.query_all(
                &format!("SELECT {PROJECT_FIELDS} FROM projects ORDER BY updated_at DESC, rowid DESC"),
                [],
                project_from_row,
            ),
        }
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        self.query_one(
            &format!("SELECT {PROJECT_FIELDS} FROM projects WHERE id = ?1"),
            params![id],
            project_from_row,
        )
    }

    pub fn update_project(&self, id: &str, changes: &ProjectChanges) -> Result<Project> {
        let mut project = self.require_project(id)?;
        if let Some(name) = &changes.name {
            project.name = name.trim().to_string();
        }
        if let Some(description) = &changes.description {
            project.description = description.clone();
        }
        if let Some(color) = &changes.color {
            project.color = color.clone();
        }
        if let Some(icon) = &changes.icon {
            project.icon = icon.clone();
        }
        if let Some(progress) = changes.progress {
            project.progress = progress;
        }
        if let Some(deadline) = &changes.deadline {
            project.deadline = deadline.clone();
        }
        project.updated_at = timestamp_now();

        self.conn
            .execute(
                "UPDATE projects SET name = ?1, description = ?2, color = ?3, icon = ?4, progress = ?5, deadline = ?6, updated_at = ?7
                 WHERE id = ?8",
                params![
                    project.name,
                    project.description,
                    project.color,
                    project.icon,
                    project.progress,
                    project.deadline,
                    project.updated_at,
                    project.id
                ],
            )
            .context("Failed to update project")?;
        Ok(project)
    }

    /// Delete a project and, through cascades, everything it owns.
    pub fn delete_project(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id])
            .context("Failed to delete project")?;
        Ok(count > 0)
    }

    /// Project that owns a card, resolved through its column.
    pub fn project_for_card(&self, card_id: &str) -> Result<Option<Project>> {
        self.query_one(
            &format!(
                "SELECT {PROJECT_FIELDS} FROM projects WHERE id = (
                    SELECT bc.project_id FROM cards c JOIN board_columns bc ON bc.id = c.column_id
                    WHERE c.id = ?1
                 )"
            ),
            params![card_id],
            project_from_row,
        )
    }

    fn card_project_id(&self, card_id: &str) -> Result<String> {
        self.conn
            .query_row(
                "SELECT bc.project_id FROM cards c JOIN board_columns bc ON bc.id = c.column_id
                 WHERE c.id = ?1",
                params![card_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| BoardError::not_found("Card", card_id))
    }

    // ── Columns ───────────────────────────────────────────────────────

    /// Append a column at the end of the project's board.
    pub fn create_column(&self, project_id: &str, input: &CreateColumn) -> Result<Column> {
        self.require_project(project_id)?;
        let id = new_id();
        let now = timestamp_now();
        let position = position::next_position_in(&self.conn, SiblingScope::Columns { project_id })?;
        self.conn
            .execute(
                "INSERT INTO board_columns (id, name, color, position, project_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    id,
                    input.name.trim(),
                    input.color.as_deref().unwrap_or(DEFAULT_COLUMN_COLOR),
                    position,
                    project_id,
                    now
                ],
            )
            .context("Failed to insert column")?;
        Ok(self.get_column(&id)?.context("Column not found after insert")?)
    }

    pub fn get_column(&self, id: &str) -> Result<Option<Column>> {
        self.query_one(
            &format!("SELECT {COLUMN_FIELDS} FROM board_columns WHERE id = ?1"),
            params![id],
            column_from_row,
        )
    }

    pub fn list_project_columns(&self, project_id: &str) -> Result<Vec<Column>> {
        self.query_all(
            &format!(
                "SELECT {COLUMN_FIELDS} FROM board_columns WHERE project_id = ?1 ORDER BY position, rowid"
            ),
            params![project_id],
            column_from_row,
        )
    }

    pub fn update_column(&self, id: &str, changes: &ColumnChanges) -> Result<Column> {
        let mut column = self.require_column(id)?;
        if let Some(name) = &changes.name {
            column.name = name.trim().to_string();
        }
        if let Some(color) = &changes.color {
            column.color = color.clone();
        }
        column.updated_at = timestamp_now();
        self.conn
            .execute(
                "UPDATE board_columns SET name = ?1, color = ?2, updated_at = ?3 WHERE id = ?4",
                params![column.name, column.color, column.updated_at, column.id],
            )
            .context("Failed to update column")?;
        Ok(column)
    }

    /// Delete a column and its cards. Returns the deleted column, if any.
    pub fn delete_column(&self, id: &str) -> Result<Option<Column>> {
        let Some(column) = self.get_column(id)? else {
            return Ok(None);
        };
        self.conn
            .execute("DELETE FROM board_columns WHERE id = ?1", params![id])
            .context("Failed to delete column")?;
        Ok(Some(column))
    }

    /// Apply a bulk column ordering atomically, then settle the board to
    /// dense positions. Returns the settled ordering.
    pub fn reorder_columns(
        &self,
        project_id: &str,
        orders: &[PositionUpdate],
    ) -> Result<Vec<PositionUpdate>> {
        validate_orders(orders)?;
        self.require_project(project_id)?;
        self.reorder(SiblingScope::Columns { project_id }, orders)
    }

    fn reorder(
        &self,
        scope: SiblingScope<'_>,
        orders: &[PositionUpdate],
    ) -> Result<Vec<PositionUpdate>> {
        // Dropping `tx` on an early return rolls every update back.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        position::apply_orders(&tx, scope, orders, &timestamp_now())?;
        let settled = position::settle(&tx, scope)?;
        tx.commit().context("Failed to commit reorder")?;
        Ok(settled)
    }

    // ── Cards ─────────────────────────────────────────────────────────

    /// Append a card to a column. The creator defaults to the project owner.
    pub fn create_card(&self, column_id: &str, input: &CreateCard) -> Result<Card> {
        let column = self.require_column(column_id)?;
        let project = self
            .get_project(&column.project_id)?
            .context("Column references a missing project")?;
        let created_by_id = input
            .created_by_id
            .clone()
            .unwrap_or_else(|| project.owner_id.clone());
        self.require_user(&created_by_id)?;
        if let Some(assignee) = &input.assignee_id {
            self.require_user(assignee)?;
        }
        let priority = match &input.priority {
            Some(p) => parse_priority(p)?,
            None => Priority::default(),
        };

        let id = new_id();
        let now = timestamp_now();
        let title = input.title.trim();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let position = position::next_position_in(&tx, SiblingScope::Cards { column_id })?;
        tx.execute(
            "INSERT INTO cards (id, title, description, priority, position, deadline, completed, column_id, assignee_id, created_by_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9, ?10, ?10)",
            params![
                id,
                title,
                input.description,
                priority,
                position,
                input.deadline,
                column_id,
                input.assignee_id,
                created_by_id,
                now
            ],
        )
        .context("Failed to insert card")?;

        self.log_activity(&NewActivity {
            action: "card_created".into(),
            description: format!("Card \"{}\" was created", title),
            metadata: Some(serde_json::json!({ "cardTitle": title })),
            card_id: Some(id.clone()),
            project_id: Some(project.id.clone()),
            user_id: created_by_id,
        })?;

        tx.commit().context("Failed to commit card creation")?;
        Ok(self.get_card(&id)?.context("Card not found after insert")?)
    }

    pub fn get_card(&self, id: &str) -> Result<Option<Card>> {
        self.query_one(
            &format!("SELECT {CARD_FIELDS} FROM cards WHERE id = ?1"),
            params![id],
            card_from_row,
        )
    }

    pub fn list_column_cards(&self, column_id: &str) -> Result<Vec<Card>> {
        self.query_all(
            &format!("SELECT {CARD_FIELDS} FROM cards WHERE column_id = ?1 ORDER BY position, rowid"),
            params![column_id],
            card_from_row,
        )
    }

    pub fn update_card(&self, id: &str, changes: &CardChanges) -> Result<Card> {
        let mut card = self.require_card(id)?;
        if let Some(title) = &changes.title {
            card.title = title.trim().to_string();
        }
        if let Some(description) = &changes.description {
            card.description = description.clone();
        }
        if let Some(priority) = &changes.priority {
            card.priority = parse_priority(priority)?;
        }
        if let Some(deadline) = &changes.deadline {
            card.deadline = deadline.clone();
        }
        if let Some(completed) = changes.completed {
            card.completed = completed;
        }
        if let Some(assignee) = &changes.assignee_id {
            if let Some(user_id) = assignee {
                self.require_user(user_id)?;
            }
            card.assignee_id = assignee.clone();
        }
        card.updated_at = timestamp_now();

        self.conn
            .execute(
                "UPDATE cards SET title = ?1, description = ?2, priority = ?3, deadline = ?4, completed = ?5, assignee_id = ?6, updated_at = ?7
                 WHERE id = ?8",
                params![
                    card.title,
                    card.description,
                    card.priority,
                    card.deadline,
                    card.completed,
                    card.assignee_id,
                    card.updated_at,
                    card.id
                ],
            )
            .context("Failed to update card")?;
        Ok(card)
    }

    /// Move a card to `target_column_id` at `position` in one transaction.
    ///
    /// The card's column and position change in a single statement. The
    /// target column is then settled with the card at `min(position, len)`
    /// and the source column is settled behind it.
    pub fn move_card(
        &self,
        card_id: &str,
        target_column_id: &str,
        position: i32,
    ) -> Result<CardMove> {
        if position < 0 {
            return Err(BoardError::validation("position", "must not be negative"));
        }
        let card = self.require_card(card_id)?;
        let target = self.require_column(target_column_id)?;
        let source = self
            .get_column(&card.column_id)?
            .context("Card references a missing column")?;
        if target.project_id != source.project_id {
            return Err(BoardError::validation(
                "columnId",
                "must belong to the card's project",
            ));
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let target_scope = SiblingScope::Cards {
            column_id: &target.id,
        };
        let siblings = position::sibling_ids(&tx, target_scope)?;
        let order = position::insert_at(siblings, card_id, position as usize);
        let index = order.iter().position(|id| id == card_id).unwrap_or(0) as i32;

        tx.execute(
            "UPDATE cards SET column_id = ?1, position = ?2, updated_at = ?3 WHERE id = ?4",
            params![target.id, index, timestamp_now(), card_id],
        )
        .context("Failed to move card")?;
        position::write_order(&tx, target_scope, &order)?;
        if source.id != target.id {
            position::settle(
                &tx,
                SiblingScope::Cards {
                    column_id: &source.id,
                },
            )?;
        }
        tx.commit().context("Failed to commit card move")?;

        Ok(CardMove {
            card: self.get_card(card_id)?.context("Card not found after move")?,
            from_column_id: source.id,
        })
    }

    pub fn reorder_cards(
        &self,
        column_id: &str,
        orders: &[PositionUpdate],
    ) -> Result<Vec<PositionUpdate>> {
        validate_orders(orders)?;
        self.require_column(column_id)?;
        self.reorder(SiblingScope::Cards { column_id }, orders)
    }

    /// Delete a card and its sub-entities. Returns the deleted card, if any.
    pub fn delete_card(&self, id: &str) -> Result<Option<Card>> {
        let Some(card) = self.get_card(id)? else {
            return Ok(None);
        };
        self.conn
            .execute("DELETE FROM cards WHERE id = ?1", params![id])
            .context("Failed to delete card")?;
        Ok(Some(card))
    }

    // ── Tags ──────────────────────────────────────────────────────────

    pub fn list_tags(&self, project_id: &str) -> Result<Vec<Tag>> {
        self.query_all(
            &format!("SELECT {TAG_FIELDS} FROM tags WHERE project_id = ?1 ORDER BY name, rowid"),
            params![project_id],
            tag_from_row,
        )
    }

    pub fn create_tag(&self, project_id: &str, input: &CreateTag) -> Result<Tag> {
        self.require_project(project_id)?;
        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO tags (id, name, color, project_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, input.name.trim(), input.color, project_id, timestamp_now()],
            )
            .context("Failed to insert tag")?;
        Ok(self.get_tag(&id)?.context("Tag not found after insert")?)
    }

    pub fn get_tag(&self, id: &str) -> Result<Option<Tag>> {
        self.query_one(
            &format!("SELECT {TAG_FIELDS} FROM tags WHERE id = ?1"),
            params![id],
            tag_from_row,
        )
    }

    pub fn update_tag(&self, id: &str, changes: &TagChanges) -> Result<Tag> {
        let mut tag = self
            .get_tag(id)?
            .ok_or_else(|| BoardError::not_found("Tag", id))?;
        if let Some(name) = &changes.name {
            tag.name = name.trim().to_string();
        }
        if let Some(color) = &changes.color {
            tag.color = color.clone();
        }
        self.conn
            .execute(
                "UPDATE tags SET name = ?1, color = ?2 WHERE id = ?3",
                params![tag.name, tag.color, tag.id],
            )
            .context("Failed to update tag")?;
        Ok(tag)
    }

    pub fn delete_tag(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM tags WHERE id = ?1", params![id])
            .context("Failed to delete tag")?;
        Ok(count > 0)
    }

    /// Link a tag to a card. Linking twice is a no-op.
    pub fn add_card_tag(&self, card_id: &str, tag_id: &str) -> Result<()> {
        let project_id = self.card_project_id(card_id)?;
        let tag = self
            .get_tag(tag_id)?
            .ok_or_else(|| BoardError::not_found("Tag", tag_id))?;
        if tag.project_id != project_id {
            return Err(BoardError::validation(
                "tagId",
                "must belong to the card's project",
            ));
        }
        self.conn
            .execute(
                "INSERT OR IGNORE INTO card_tags (card_id, tag_id) VALUES (?1, ?2)",
                params![card_id, tag_id],
            )
            .context("Failed to link tag")?;
        Ok(())
    }

    pub fn remove_card_tag(&self, card_id: &str, tag_id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM card_tags WHERE card_id = ?1 AND tag_id = ?2",
                params![card_id, tag_id],
            )
            .context("Failed to unlink tag")?;
        Ok(count > 0)
    }

    fn card_tags(&self, card_id: &str) -> Result<Vec<Tag>> {
        self.query_all(
            &format!(
                "SELECT {TAG_FIELDS} FROM tags WHERE id IN (SELECT tag_id FROM card_tags WHERE card_id = ?1)
                 ORDER BY name, rowid"
            ),
            params![card_id],
            tag_from_row,
        )
    }

    // ── Entities ──────────────────────────────────────────────────────

    pub fn list_entities(&self, project_id: &str) -> Result<Vec<Entity>> {
        self.query_all(
            &format!(
                "SELECT {ENTITY_FIELDS} FROM entities WHERE project_id = ?1 ORDER BY name, rowid"
            ),
            params![project_id],
            entity_from_row,
        )
    }

    pub fn create_entity(&self, project_id: &str, input: &CreateEntity) -> Result<Entity> {
        self.require_project(project_id)?;
        let entity_type = parse_entity_type(&input.entity_type)?;
        let id = new_id();
        let now = timestamp_now();
        self.conn
            .execute(
                "INSERT INTO entities (id, name, type, data, project_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    id,
                    input.name.trim(),
                    entity_type,
                    json_text(&input.data),
                    project_id,
                    now
                ],
            )
            .context("Failed to insert entity")?;
        Ok(self.get_entity(&id)?.context("Entity not found after insert")?)
    }

    pub fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        self.query_one(
            &format!("SELECT {ENTITY_FIELDS} FROM entities WHERE id = ?1"),
            params![id],
            entity_from_row,
        )
    }

    pub fn update_entity(&self, id: &str, changes: &EntityChanges) -> Result<Entity> {
        let mut entity = self
            .get_entity(id)?
            .ok_or_else(|| BoardError::not_found("Entity", id))?;
        if let Some(name) = &changes.name {
            entity.name = name.trim().to_string();
        }
        if let Some(entity_type) = &changes.entity_type {
            entity.entity_type = parse_entity_type(entity_type)?;
        }
        if let Some(data) = &changes.data {
            entity.data = data.clone();
        }
        entity.updated_at = timestamp_now();
        self.conn
            .execute(
                "UPDATE entities SET name = ?1, type = ?2, data = ?3, updated_at = ?4 WHERE id = ?5",
                params![
                    entity.name,
                    entity.entity_type,
                    json_text(&entity.data),
                    entity.updated_at,
                    entity.id
                ],
            )
            .context("Failed to update entity")?;
        Ok(entity)
    }

    pub fn delete_entity(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM entities WHERE id = ?1", params![id])
            .context("Failed to delete entity")?;
        Ok(count > 0)
    }

    /// Link an entity to a card. Linking twice is a no-op.
    pub fn add_card_entity(&self, card_id: &str, entity_id: &str) -> Result<()> {
        let project_id = self.card_project_id(card_id)?;
        let entity = self
            .get_entity(entity_id)?
            .ok_or_else(|| BoardError::not_found("Entity", entity_id))?;
        if entity.project_id != project_id {
            return Err(BoardError::validation(
                "entityId",
                "must belong to the card's project",
            ));
        }
        self.conn
            .execute(
                "INSERT OR IGNORE INTO card_entities (card_id, entity_id) VALUES (?1, ?2)",
                params![card_id, entity_id],
            )
            .context("Failed to link entity")?;
        Ok(())
    }

    pub fn remove_card_entity(&self, card_id: &str, entity_id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM card_entities WHERE card_id = ?1 AND entity_id = ?2",
                params![card_id, entity_id],
            )
            .context("Failed to unlink entity")?;
        Ok(count > 0)
    }

    fn card_entities(&self, card_id: &str) -> Result<Vec<Entity>> {
        self.query_all(
            &format!(
                "SELECT {ENTITY_FIELDS} FROM entities WHERE id IN (SELECT entity_id FROM card_entities WHERE card_id = ?1)
                 ORDER BY name, rowid"
            ),
            params![card_id],
            entity_from_row,
        )
    }

    // ── Checklist items ───────────────────────────────────────────────

    pub fn list_checklist(&self, card_id: &str) -> Result<Vec<ChecklistItem>> {
        self.query_all(
            &format!(
                "SELECT {CHECKLIST_FIELDS} FROM checklist_items WHERE card_id = ?1 ORDER BY position, rowid"
            ),
            params![card_id],
            checklist_from_row,
        )
    }

    pub fn create_checklist_item(
        &self,
        card_id: &str,
        input: &CreateChecklistItem,
    ) -> Result<ChecklistItem> {
        self.require_card(card_id)?;
        let id = new_id();
        let now = timestamp_now();
        let position = position::next_position_in(&self.conn, SiblingScope::Checklist { card_id })?;
        self.conn
            .execute(
                "INSERT INTO checklist_items (id, title, completed, position, card_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    id,
                    input.title.trim(),
                    input.completed.unwrap_or(false),
                    position,
                    card_id,
                    now
                ],
            )
            .context("Failed to insert checklist item")?;
        Ok(self
            .get_checklist_item(&id)?
            .context("Checklist item not found after insert")?)
    }

    pub fn get_checklist_item(&self, id: &str) -> Result<Option<ChecklistItem>> {
        self.query_one(
            &format!("SELECT {CHECKLIST_FIELDS} FROM checklist_items WHERE id = ?1"),
            params![id],
            checklist_from_row,
        )
    }

    pub fn update_checklist_item(
        &self,
        id: &str,
        changes: &ChecklistChanges,
    ) -> Result<ChecklistItem> {
        let mut item = self
            .get_checklist_item(id)?
            .ok_or_else(|| BoardError::not_found("Checklist item", id))?;
        if let Some(title) = &changes.title {
            item.title = title.trim().to_string();
        }
        if let Some(completed) = changes.completed {
            item.completed = completed;
        }
        if let Some(position) = changes.position {
            item.position = position;
        }
        item.updated_at = timestamp_now();
        self.conn
            .execute(
                "UPDATE checklist_items SET title = ?1, completed = ?2, position = ?3, updated_at = ?4 WHERE id = ?5",
                params![
                    item.title,
                    item.completed,
                    item.position,
                    item.updated_at,
                    item.id
                ],
            )
            .context("Failed to update checklist item")?;
        Ok(item)
    }

    pub fn delete_checklist_item(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM checklist_items WHERE id = ?1", params![id])
            .context("Failed to delete checklist item")?;
        Ok(count > 0)
    }

    // ── Comments ──────────────────────────────────────────────────────

    /// Comments on a card, newest first.
    pub fn list_comments(&self, card_id: &str) -> Result<Vec<CommentWithAuthor>> {
        let comments = self.query_all(
            &format!(
                "SELECT {COMMENT_FIELDS} FROM comments WHERE card_id = ?1 ORDER BY created_at DESC, rowid DESC"
            ),
            params![card_id],
            comment_from_row,
        )?;
        let mut out = Vec::with_capacity(comments.len());
        for comment in comments {
            let author = self.get_user(&comment.author_id)?;
            out.push(CommentWithAuthor { comment, author });
        }
        Ok(out)
    }

    pub fn create_comment(&self, card_id: &str, input: &CreateComment) -> Result<Comment> {
        self.require_card(card_id)?;
        self.require_user(&input.author_id)?;
        let id = new_id();
        let now = timestamp_now();
        self.conn
            .execute(
                "INSERT INTO comments (id, content, card_id, author_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id, input.content, card_id, input.author_id, now],
            )
            .context("Failed to insert comment")?;
        Ok(self
            .query_one(
                &format!("SELECT {COMMENT_FIELDS} FROM comments WHERE id = ?1"),
                params![id],
                comment_from_row,
            )?
            .context("Comment not found after insert")?)
    }

    pub fn delete_comment(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM comments WHERE id = ?1", params![id])
            .context("Failed to delete comment")?;
        Ok(count > 0)
    }

    // ── Attachments ───────────────────────────────────────────────────

    /// Attachments on a card, newest first.
    pub fn list_attachments(&self, card_id: &str) -> Result<Vec<AttachmentWithUploader>> {
        let attachments = self.query_all(
            &format!(
                "SELECT {ATTACHMENT_FIELDS} FROM attachments WHERE card_id = ?1 ORDER BY created_at DESC, rowid DESC"
            ),
            params![card_id],
            attachment_from_row,
        )?;
        let mut out = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let uploaded_by = self.get_user(&attachment.uploaded_by_id)?;
            out.push(AttachmentWithUploader {
                attachment,
                uploaded_by,
            });
        }
        Ok(out)
    }

    pub fn create_attachment(&self, card_id: &str, input: &NewAttachment) -> Result<Attachment> {
        self.require_card(card_id)?;
        self.require_user(&input.uploaded_by_id)?;
        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO attachments (id, filename, original_name, mime_type, size, url, card_id, uploaded_by_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    input.filename,
                    input.original_name,
                    input.mime_type,
                    input.size,
                    input.url,
                    card_id,
                    input.uploaded_by_id,
                    timestamp_now()
                ],
            )
            .context("Failed to insert attachment")?;
        Ok(self
            .get_attachment(&id)?
            .context("Attachment not found after insert")?)
    }

    pub fn get_attachment(&self, id: &str) -> Result<Option<Attachment>> {
        self.query_one(
            &format!("SELECT {ATTACHMENT_FIELDS} FROM attachments WHERE id = ?1"),
            params![id],
            attachment_from_row,
        )
    }

    /// Delete an attachment row. Returns it so the caller can remove the
    /// stored file.
    pub fn delete_attachment(&self, id: &str) -> Result<Option<Attachment>> {
        let Some(attachment) = self.get_attachment(id)? else {
            return Ok(None);
        };
        self.conn
            .execute("DELETE FROM attachments WHERE id = ?1", params![id])
            .context("Failed to delete attachment")?;
        Ok(Some(attachment))
    }

    // ── Activity log ──────────────────────────────────────────────────

    pub fn log_activity(&self, entry: &NewActivity) -> Result<ActivityLogEntry> {
        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO activity_log (id, action, description, metadata, card_id, project_id, user_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    entry.action,
                    entry.description,
                    json_text(&entry.metadata),
                    entry.card_id,
                    entry.project_id,
                    entry.user_id,
                    timestamp_now()
                ],
            )
            .context("Failed to insert activity entry")?;
        Ok(self
            .query_one(
                &format!("SELECT {ACTIVITY_FIELDS} FROM activity_log WHERE id = ?1"),
                params![id],
                activity_from_row,
            )?
            .context("Activity entry not found after insert")?)
    }

    pub fn project_activity(&self, project_id: &str, limit: i64) -> Result<Vec<ActivityLogEntry>> {
        self.query_all(
            &format!(
                "SELECT {ACTIVITY_FIELDS} FROM activity_log WHERE project_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
            ),
            params![project_id, limit],
            activity_from_row,
        )
    }

    pub fn card_activity(&self, card_id: &str, limit: i64) -> Result<Vec<ActivityLogEntry>> {
        self.query_all(
            &format!(
                "SELECT {ACTIVITY_FIELDS} FROM activity_log WHERE card_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
            ),
            params![card_id, limit],
            activity_from_row,
        )
    }

    // ── Read aggregator ───────────────────────────────────────────────

    fn card_counts(&self, card_id: &str) -> Result<CardCounts> {
        Ok(self
            .conn
            .query_row(
                "SELECT
                    (SELECT COUNT(*) FROM comments WHERE card_id = ?1),
                    (SELECT COUNT(*) FROM attachments WHERE card_id = ?1),
                    (SELECT COUNT(*) FROM checklist_items WHERE card_id = ?1),
                    (SELECT COUNT(*) FROM checklist_items WHERE card_id = ?1 AND completed = 1)",
                params![card_id],
                |row| {
                    Ok(CardCounts {
                        comments: row.get(0)?,
                        attachments: row.get(1)?,
                        checklist_items: row.get(2)?,
                        completed_checklist_items: row.get(3)?,
                    })
                },
            )
            .context("Failed to count card children")?)
    }

    fn card_summary(&self, card: Card) -> Result<CardSummary> {
        Ok(CardSummary {
            assignee: self.optional_user(card.assignee_id.as_deref())?,
            created_by: self.get_user(&card.created_by_id)?,
            tags: self.card_tags(&card.id)?,
            entities: self.card_entities(&card.id)?,
            checklist_items: self.list_checklist(&card.id)?,
            counts: self.card_counts(&card.id)?,
            card,
        })
    }

    /// Columns of a project in board order, each with its cards in order.
    pub fn list_columns(&self, project_id: &str) -> Result<Vec<ColumnWithCards>> {
        self.require_project(project_id)?;
        self.columns_with_cards(project_id)
    }

    fn columns_with_cards(&self, project_id: &str) -> Result<Vec<ColumnWithCards>> {
        let mut columns = Vec::new();
        for column in self.list_project_columns(project_id)? {
            let mut cards = Vec::new();
            for card in self.list_column_cards(&column.id)? {
                cards.push(self.card_summary(card)?);
            }
            columns.push(ColumnWithCards { column, cards });
        }
        Ok(columns)
    }

    /// Denormalized project for client hydration.
    pub fn get_project_view(&self, project_id: &str) -> Result<ProjectView> {
        let project = self.require_project(project_id)?;
        let owner = self.get_user(&project.owner_id)?;
        let columns = self.columns_with_cards(project_id)?;
        let cards: i64 = columns.iter().map(|c| c.cards.len() as i64).sum();
        let completed_cards = columns
            .iter()
            .flat_map(|c| c.cards.iter())
            .filter(|s| s.card.completed)
            .count() as i64;

        Ok(ProjectView {
            owner,
            columns,
            tags: self.list_tags(project_id)?,
            entities: self.list_entities(project_id)?,
            counts: ProjectCounts {
                cards,
                completed_cards,
            },
            project,
        })
    }

    pub fn get_card_detail(&self, card_id: &str) -> Result<CardDetail> {
        let card = self.require_card(card_id)?;
        let comments = self.list_comments(card_id)?;
        let attachments = self.list_attachments(card_id)?;
        Ok(CardDetail {
            summary: self.card_summary(card)?,
            comments,
            attachments,
        })
    }
}
