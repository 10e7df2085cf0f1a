//! Mutation API: validate, persist, then broadcast.
//!
//! Every method validates input shape before touching the store. Mutations
//! that change the board layout emit a [`BoardEvent`] to the owning
//! project's subscribers after the write commits; sub-entity mutations
//! (tags, entities, checklist, comments, attachments) are not broadcast.

use tracing::info;

use crate::errors::{BoardError, Result};

use super::attachments::AttachmentStore;
use super::db::{DEFAULT_ACTIVITY_LIMIT, DbHandle};
use super::dispatch::Broadcaster;
use super::events::BoardEvent;
use super::models::*;
use super::validate::Validate;

const MAX_ACTIVITY_LIMIT: i64 = 200;

/// An upload as received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub original_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    /// Defaults to the project owner when absent.
    pub uploaded_by_id: Option<String>,
}

#[derive(Clone)]
pub struct BoardService {
    db: DbHandle,
    broadcaster: Broadcaster,
    attachments: AttachmentStore,
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit
        .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
        .clamp(1, MAX_ACTIVITY_LIMIT)
}

impl BoardService {
    pub fn new(db: DbHandle, broadcaster: Broadcaster, attachments: AttachmentStore) -> Self {
        Self {
            db,
            broadcaster,
            attachments,
        }
    }

    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn attachments(&self) -> &AttachmentStore {
        &self.attachments
    }

    fn emit(&self, project_id: &str, event: BoardEvent) {
        self.broadcaster.broadcast(project_id, &event);
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub async fn create_user(&self, input: CreateUser) -> Result<User> {
        input.validate()?;
        self.db.call(move |db| db.create_user(&input)).await
    }

    pub async fn get_user(&self, id: String) -> Result<User> {
        self.db
            .call(move |db| {
                db.get_user(&id)?
                    .ok_or_else(|| BoardError::not_found("User", id))
            })
            .await
    }

    // ── Projects ──────────────────────────────────────────────────────

    pub async fn list_projects(&self, owner_id: Option<String>) -> Result<Vec<Project>> {
        self.db
            .call(move |db| db.list_projects(owner_id.as_deref()))
            .await
    }

    /// Create a project with its default columns. Not broadcast: nobody can
    /// be subscribed to a project that did not exist.
    pub async fn create_project(&self, input: CreateProject) -> Result<Project> {
        input.validate()?;
        let project = self.db.call(move |db| db.create_project(&input)).await?;
        info!(project_id = %project.id, name = %project.name, "Project created");
        Ok(project)
    }

    pub async fn get_project_view(&self, project_id: String) -> Result<ProjectView> {
        self.db
            .call(move |db| db.get_project_view(&project_id))
            .await
    }

    pub async fn update_project(&self, id: String, changes: ProjectChanges) -> Result<Project> {
        changes.validate()?;
        let project = self
            .db
            .call(move |db| db.update_project(&id, &changes))
            .await?;
        self.emit(&project.id, BoardEvent::ProjectUpdated(project.clone()));
        Ok(project)
    }

    pub async fn delete_project(&self, id: String) -> Result<()> {
        let project_id = id.clone();
        let deleted = self.db.call(move |db| db.delete_project(&id)).await?;
        if !deleted {
            return Err(BoardError::not_found("Project", project_id));
        }
        info!(project_id = %project_id, "Project deleted");
        self.emit(
            &project_id,
            BoardEvent::ProjectDeleted {
                id: project_id.clone(),
            },
        );
        Ok(())
    }

    pub async fn project_activity(
        &self,
        project_id: String,
        limit: Option<i64>,
    ) -> Result<Vec<ActivityLogEntry>> {
        let limit = clamp_limit(limit);
        self.db
            .call(move |db| {
                if db.get_project(&project_id)?.is_none() {
                    return Err(BoardError::not_found("Project", project_id));
                }
                db.project_activity(&project_id, limit)
            })
            .await
    }

    // ── Columns ───────────────────────────────────────────────────────

    pub async fn list_columns(&self, project_id: String) -> Result<Vec<ColumnWithCards>> {
        self.db.call(move |db| db.list_columns(&project_id)).await
    }

    pub async fn create_column(&self, project_id: String, input: CreateColumn) -> Result<Column> {
        input.validate()?;
        let column = self
            .db
            .call(move |db| db.create_column(&project_id, &input))
            .await?;
        self.emit(&column.project_id, BoardEvent::ColumnCreated(column.clone()));
        Ok(column)
    }

    pub async fn update_column(&self, id: String, changes: ColumnChanges) -> Result<Column> {
        changes.validate()?;
        let column = self
            .db
            .call(move |db| db.update_column(&id, &changes))
            .await?;
        self.emit(&column.project_id, BoardEvent::ColumnUpdated(column.clone()));
        Ok(column)
    }

    pub async fn delete_column(&self, id: String) -> Result<()> {
        let column_id = id.clone();
        let column = self
            .db
            .call(move |db| db.delete_column(&id))
            .await?
            .ok_or_else(|| BoardError::not_found("Column", column_id))?;
        self.emit(
            &column.project_id,
            BoardEvent::ColumnDeleted {
                id: column.id.clone(),
                project_id: column.project_id.clone(),
            },
        );
        Ok(())
    }

    pub async fn reorder_columns(
        &self,
        project_id: String,
        orders: Vec<PositionUpdate>,
    ) -> Result<Vec<PositionUpdate>> {
        let pid = project_id.clone();
        let settled = self
            .db
            .call(move |db| db.reorder_columns(&pid, &orders))
            .await?;
        self.emit(&project_id, BoardEvent::ColumnsReordered(settled.clone()));
        Ok(settled)
    }

    // ── Cards ─────────────────────────────────────────────────────────

    /// Resolve the project that owns a column, for event routing.
    fn project_of_column(db: &super::db::BoardDb, column_id: &str) -> Result<String> {
        db.get_column(column_id)?
            .map(|c| c.project_id)
            .ok_or_else(|| BoardError::not_found("Column", column_id))
    }

    pub async fn create_card(&self, column_id: String, input: CreateCard) -> Result<Card> {
        input.validate()?;
        let (card, project_id) = self
            .db
            .call(move |db| {
                let card = db.create_card(&column_id, &input)?;
                let project_id = Self::project_of_column(db, &card.column_id)?;
                Ok((card, project_id))
            })
            .await?;
        self.emit(&project_id, BoardEvent::CardCreated(card.clone()));
        Ok(card)
    }

    pub async fn get_card_detail(&self, card_id: String) -> Result<CardDetail> {
        self.db.call(move |db| db.get_card_detail(&card_id)).await
    }

    pub async fn update_card(&self, id: String, changes: CardChanges) -> Result<Card> {
        changes.validate()?;
        let (card, project_id) = self
            .db
            .call(move |db| {
                let card = db.update_card(&id, &changes)?;
                let project_id = Self::project_of_column(db, &card.column_id)?;
                Ok((card, project_id))
            })
            .await?;
        self.emit(&project_id, BoardEvent::CardUpdated(card.clone()));
        Ok(card)
    }

    pub async fn move_card(&self, card_id: String, column_id: String, position: i32) -> Result<Card> {
        if column_id.trim().is_empty() {
            return Err(BoardError::validation("columnId", "must not be empty"));
        }
        let (moved, project_id) = self
            .db
            .call(move |db| {
                let moved = db.move_card(&card_id, &column_id, position)?;
                let project_id = Self::project_of_column(db, &moved.card.column_id)?;
                Ok((moved, project_id))
            })
            .await?;
        self.emit(
            &project_id,
            BoardEvent::CardMoved {
                card_id: moved.card.id.clone(),
                from_column_id: moved.from_column_id.clone(),
                column_id: moved.card.column_id.clone(),
                position: moved.card.position,
            },
        );
        Ok(moved.card)
    }

    pub async fn reorder_cards(
        &self,
        column_id: String,
        orders: Vec<PositionUpdate>,
    ) -> Result<Vec<PositionUpdate>> {
        let cid = column_id.clone();
        let (settled, project_id) = self
            .db
            .call(move |db| {
                let settled = db.reorder_cards(&cid, &orders)?;
                let project_id = Self::project_of_column(db, &cid)?;
                Ok((settled, project_id))
            })
            .await?;
        self.emit(
            &project_id,
            BoardEvent::CardsReordered {
                column_id,
                card_orders: settled.clone(),
            },
        );
        Ok(settled)
    }

    pub async fn delete_card(&self, id: String) -> Result<()> {
        let card_id = id.clone();
        let deleted = self
            .db
            .call(move |db| {
                let Some(project) = db.project_for_card(&id)? else {
                    return Ok(None);
                };
                Ok(db.delete_card(&id)?.map(|card| (card, project.id)))
            })
            .await?;
        let (card, project_id) = deleted.ok_or_else(|| BoardError::not_found("Card", card_id))?;
        self.emit(
            &project_id,
            BoardEvent::CardDeleted {
                id: card.id,
                column_id: card.column_id,
            },
        );
        Ok(())
    }

    pub async fn card_activity(
        &self,
        card_id: String,
        limit: Option<i64>,
    ) -> Result<Vec<ActivityLogEntry>> {
        let limit = clamp_limit(limit);
        self.db
            .call(move |db| {
                if db.get_card(&card_id)?.is_none() {
                    return Err(BoardError::not_found("Card", card_id));
                }
                db.card_activity(&card_id, limit)
            })
            .await
    }

    // ── Tags ──────────────────────────────────────────────────────────

    pub async fn list_tags(&self, project_id: String) -> Result<Vec<Tag>> {
        self.db
            .call(move |db| {
                if db.get_project(&project_id)?.is_none() {
                    return Err(BoardError::not_found("Project", project_id));
                }
                db.list_tags(&project_id)
            })
            .await
    }

    pub async fn create_tag(&self, project_id: String, input: CreateTag) -> Result<Tag> {
        input.validate()?;
        self.db
            .call(move |db| db.create_tag(&project_id, &input))
            .await
    }

    pub async fn update_tag(&self, id: String, changes: TagChanges) -> Result<Tag> {
        changes.validate()?;
        self.db.call(move |db| db.update_tag(&id, &changes)).await
    }

    pub async fn delete_tag(&self, id: String) -> Result<()> {
        let tag_id = id.clone();
        if !self.db.call(move |db| db.delete_tag(&id)).await? {
            return Err(BoardError::not_found("Tag", tag_id));
        }
        Ok(())
    }

    pub async fn add_card_tag(&self, card_id: String, tag_id: String) -> Result<()> {
        self.db
            .call(move |db| db.add_card_tag(&card_id, &tag_id))
            .await
    }

    pub async fn remove_card_tag(&self, card_id: String, tag_id: String) -> Result<()> {
        let missing = tag_id.clone();
        if !self
            .db
            .call(move |db| db.remove_card_tag(&card_id, &tag_id))
            .await?
        {
            return Err(BoardError::not_found("Tag link", missing));
        }
        Ok(())
    }

    // ── Entities ──────────────────────────────────────────────────────

    pub async fn list_entities(&self, project_id: String) -> Result<Vec<Entity>> {
        self.db
            .call(move |db| {
                if db.get_project(&project_id)?.is_none() {
                    return Err(BoardError::not_found("Project", project_id));
                }
                db.list_entities(&project_id)
            })
            .await
    }

    pub async fn create_entity(&self, project_id: String, input: CreateEntity) -> Result<Entity> {
        input.validate()?;
        self.db
            .call(move |db| db.create_entity(&project_id, &input))
            .await
    }

    pub async fn update_entity(&self, id: String, changes: EntityChanges) -> Result<Entity> {
        changes.validate()?;
        self.db.call(move |db| db.update_entity(&id, &changes)).await
    }

    pub async fn delete_entity(&self, id: String) -> Result<()> {
        let entity_id = id.clone();
        if !self.db.call(move |db| db.delete_entity(&id)).await? {
            return Err(BoardError::not_found("Entity", entity_id));
        }
        Ok(())
    }

    pub async fn add_card_entity(&self, card_id: String, entity_id: String) -> Result<()> {
        self.db
            .call(move |db| db.add_card_entity(&card_id, &entity_id))
            .await
    }

    pub async fn remove_card_entity(&self, card_id: String, entity_id: String) -> Result<()> {
        let missing = entity_id.clone();
        if !self
            .db
            .call(move |db| db.remove_card_entity(&card_id, &entity_id))
            .await?
        {
            return Err(BoardError::not_found("Entity link", missing));
        }
        Ok(())
    }

    // ── Checklist items ───────────────────────────────────────────────

    pub async fn list_checklist(&self, card_id: String) -> Result<Vec<ChecklistItem>> {
        self.db
            .call(move |db| {
                if db.get_card(&card_id)?.is_none() {
                    return Err(BoardError::not_found("Card", card_id));
                }
                db.list_checklist(&card_id)
            })
            .await
    }

    pub async fn create_checklist_item(
        &self,
        card_id: String,
        input: CreateChecklistItem,
    ) -> Result<ChecklistItem> {
        input.validate()?;
        self.db
            .call(move |db| db.create_checklist_item(&card_id, &input))
            .await
    }

    pub async fn update_checklist_item(
        &self,
        id: String,
        changes: ChecklistChanges,
    ) -> Result<ChecklistItem> {
        changes.validate()?;
        self.db
            .call(move |db| db.update_checklist_item(&id, &changes))
            .await
    }

    pub async fn delete_checklist_item(&self, id: String) -> Result<()> {
        let item_id = id.clone();
        if !self.db.call(move |db| db.delete_checklist_item(&id)).await? {
            return Err(BoardError::not_found("Checklist item", item_id));
        }
        Ok(())
    }

    // ── Comments ──────────────────────────────────────────────────────

    pub async fn list_comments(&self, card_id: String) -> Result<Vec<CommentWithAuthor>> {
        self.db
            .call(move |db| {
                if db.get_card(&card_id)?.is_none() {
                    return Err(BoardError::not_found("Card", card_id));
                }
                db.list_comments(&card_id)
            })
            .await
    }

    pub async fn create_comment(&self, card_id: String, input: CreateComment) -> Result<Comment> {
        input.validate()?;
        self.db
            .call(move |db| db.create_comment(&card_id, &input))
            .await
    }

    pub async fn delete_comment(&self, id: String) -> Result<()> {
        let comment_id = id.clone();
        if !self.db.call(move |db| db.delete_comment(&id)).await? {
            return Err(BoardError::not_found("Comment", comment_id));
        }
        Ok(())
    }

    // ── Attachments ───────────────────────────────────────────────────

    pub async fn list_attachments(&self, card_id: String) -> Result<Vec<AttachmentWithUploader>> {
        self.db
            .call(move |db| {
                if db.get_card(&card_id)?.is_none() {
                    return Err(BoardError::not_found("Card", card_id));
                }
                db.list_attachments(&card_id)
            })
            .await
    }

    /// Store an upload and record it against the card. The stored file is
    /// removed again if the record cannot be written.
    pub async fn upload_attachment(&self, card_id: String, upload: Upload) -> Result<Attachment> {
        let lookup_id = card_id.clone();
        let owner_id = self
            .db
            .call(move |db| {
                db.project_for_card(&lookup_id)?
                    .map(|p| p.owner_id)
                    .ok_or_else(|| BoardError::not_found("Card", lookup_id))
            })
            .await?;

        let stored = self
            .attachments
            .save(
                &upload.original_name,
                upload.content_type.as_deref(),
                &upload.bytes,
            )
            .await?;

        let record = NewAttachment {
            filename: stored.filename.clone(),
            original_name: upload.original_name,
            mime_type: stored.mime_type,
            size: stored.size as i64,
            url: stored.url,
            uploaded_by_id: upload.uploaded_by_id.unwrap_or(owner_id),
        };
        let result = self
            .db
            .call(move |db| db.create_attachment(&card_id, &record))
            .await;
        if result.is_err() {
            self.attachments.remove(&stored.filename).await;
        }
        result
    }

    pub async fn delete_attachment(&self, id: String) -> Result<()> {
        let attachment_id = id.clone();
        let attachment = self
            .db
            .call(move |db| db.delete_attachment(&id))
            .await?
            .ok_or_else(|| BoardError::not_found("Attachment", attachment_id))?;
        self.attachments.remove(&attachment.filename).await;
        Ok(())
    }
}
