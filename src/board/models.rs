use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Current UTC time as ISO-8601 with millisecond precision and a `Z` suffix.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ── Enumerations ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// Kind of domain record an [`Entity`] cross-references.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Property,
    Person,
    Contract,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Property => "property",
            Self::Person => "person",
            Self::Contract => "contract",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "property" => Ok(Self::Property),
            "person" => Ok(Self::Person),
            "contract" => Ok(Self::Contract),
            _ => Err(format!("Invalid entity type: {}", s)),
        }
    }
}

// ── Persisted records ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub color: String,
    pub icon: String,
    pub progress: i32,
    pub deadline: Option<String>,
    pub owner_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: String,
    pub name: String,
    pub color: String,
    pub position: i32,
    pub project_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub position: i32,
    pub deadline: Option<String>,
    pub completed: bool,
    pub column_id: String,
    pub assignee_id: Option<String>,
    pub created_by_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub color: String,
    pub project_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub data: Option<serde_json::Value>,
    pub project_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub id: String,
    pub title: String,
    pub completed: bool,
    pub position: i32,
    pub card_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub content: String,
    pub card_id: String,
    pub author_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: i64,
    pub url: String,
    pub card_id: String,
    pub uploaded_by_id: String,
    pub created_at: String,
}

/// Append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    pub id: String,
    pub action: String,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
    pub card_id: Option<String>,
    pub project_id: Option<String>,
    pub user_id: String,
    pub created_at: String,
}

/// One `(id, position)` pair of a bulk reorder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PositionUpdate {
    pub id: String,
    pub position: i32,
}

// ── Aggregated read views ────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CardCounts {
    pub comments: i64,
    pub attachments: i64,
    pub checklist_items: i64,
    pub completed_checklist_items: i64,
}

/// A card as it appears on the board: references resolved, comment and
/// attachment lists reduced to counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSummary {
    #[serde(flatten)]
    pub card: Card,
    pub assignee: Option<User>,
    pub created_by: Option<User>,
    pub tags: Vec<Tag>,
    pub entities: Vec<Entity>,
    pub checklist_items: Vec<ChecklistItem>,
    pub counts: CardCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnWithCards {
    #[serde(flatten)]
    pub column: Column,
    pub cards: Vec<CardSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCounts {
    pub cards: i64,
    pub completed_cards: i64,
}

/// Denormalized project used for initial client hydration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectView {
    #[serde(flatten)]
    pub project: Project,
    pub owner: Option<User>,
    pub columns: Vec<ColumnWithCards>,
    pub tags: Vec<Tag>,
    pub entities: Vec<Entity>,
    pub counts: ProjectCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentWithAuthor {
    #[serde(flatten)]
    pub comment: Comment,
    pub author: Option<User>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentWithUploader {
    #[serde(flatten)]
    pub attachment: Attachment,
    pub uploaded_by: Option<User>,
}

/// Single-card detail: the board summary plus full comment and attachment
/// lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDetail {
    #[serde(flatten)]
    pub summary: CardSummary,
    pub comments: Vec<CommentWithAuthor>,
    pub attachments: Vec<AttachmentWithUploader>,
}

// ── Mutation inputs ──────────────────────────────────────────────────
//
// Inputs double as HTTP request bodies. Enum-valued fields stay strings so
// an invalid value surfaces as a validation error naming the field.

/// Deserialize a field that distinguishes "absent" (`None`) from an
/// explicit `null` (`Some(None)`).
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProject {
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub progress: Option<i32>,
    pub deadline: Option<String>,
    pub owner_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectChanges {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub progress: Option<i32>,
    #[serde(default, deserialize_with = "nullable")]
    pub deadline: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateColumn {
    pub name: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnChanges {
    pub name: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCard {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub deadline: Option<String>,
    pub assignee_id: Option<String>,
    /// Defaults to the project owner when absent.
    pub created_by_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardChanges {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub deadline: Option<Option<String>>,
    pub completed: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub assignee_id: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTag {
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagChanges {
    pub name: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityChanges {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub data: Option<Option<serde_json::Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChecklistItem {
    pub title: String,
    pub completed: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistChanges {
    pub title: Option<String>,
    pub completed: Option<bool>,
    pub position: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateComment {
    pub content: String,
    pub author_id: String,
}

/// Attachment metadata after the binary has been stored.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: i64,
    pub url: String,
    pub uploaded_by_id: String,
}

#[derive(Debug, Clone)]
pub struct NewActivity {
    pub action: String,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
    pub card_id: Option<String>,
    pub project_id: Option<String>,
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_has_millis_and_zulu() {
        let ts = timestamp_now();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
        // 2024-01-01T00:00:00.000Z
        assert_eq!(ts.len(), 24);
    }

    #[test]
    fn test_priority_roundtrip() {
        for s in &["low", "medium", "high"] {
            let parsed: Priority = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("urgent".parse::<Priority>().is_err());
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_entity_type_roundtrip() {
        for s in &["property", "person", "contract"] {
            let parsed: EntityType = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("building".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_records_serialize_camel_case() {
        let card = Card {
            id: "c1".into(),
            title: "Design".into(),
            description: None,
            priority: Priority::High,
            position: 2,
            deadline: None,
            completed: false,
            column_id: "col1".into(),
            assignee_id: None,
            created_by_id: "u1".into(),
            created_at: "2024-01-01T00:00:00.000Z".into(),
            updated_at: "2024-01-01T00:00:00.000Z".into(),
        };
        let json = serde_json::to_value(&card).unwrap();
        assert_eq!(json["columnId"], "col1");
        assert_eq!(json["createdById"], "u1");
        assert_eq!(json["priority"], "high");
        assert!(json.get("column_id").is_none());
    }

    #[test]
    fn test_entity_type_field_is_named_type() {
        let input: CreateEntity =
            serde_json::from_str(r#"{"name":"Flat 3B","type":"property","data":{"rooms":2}}"#)
                .unwrap();
        assert_eq!(input.entity_type, "property");
        assert_eq!(input.data.unwrap()["rooms"], 2);
    }

    #[test]
    fn test_nullable_distinguishes_absent_from_null() {
        let absent: CardChanges = serde_json::from_str(r#"{"title":"x"}"#).unwrap();
        assert!(absent.assignee_id.is_none());
        assert!(absent.description.is_none());

        let cleared: CardChanges =
            serde_json::from_str(r#"{"assigneeId":null,"description":null}"#).unwrap();
        assert_eq!(cleared.assignee_id, Some(None));
        assert_eq!(cleared.description, Some(None));

        let set: CardChanges = serde_json::from_str(r#"{"assigneeId":"u2"}"#).unwrap();
        assert_eq!(set.assignee_id, Some(Some("u2".to_string())));
    }

    #[test]
    fn test_card_summary_flattens_card_fields() {
        let summary = CardSummary {
            card: Card {
                id: "c1".into(),
                title: "Copy".into(),
                description: None,
                priority: Priority::Medium,
                position: 0,
                deadline: None,
                completed: true,
                column_id: "col1".into(),
                assignee_id: None,
                created_by_id: "u1".into(),
                created_at: String::new(),
                updated_at: String::new(),
            },
            assignee: None,
            created_by: None,
            tags: vec![],
            entities: vec![],
            checklist_items: vec![],
            counts: CardCounts {
                comments: 3,
                ..CardCounts::default()
            },
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["title"], "Copy");
        assert_eq!(json["completed"], true);
        assert_eq!(json["counts"]["comments"], 3);
        assert_eq!(json["counts"]["completedChecklistItems"], 0);
    }
}
