use serde::{Deserialize, Serialize};

use super::models::*;

/// Domain event pushed to every subscriber of a project.
///
/// Serializes as `{"type": "<snake_case kind>", "data": <payload>}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum BoardEvent {
    ProjectUpdated(Project),
    ProjectDeleted {
        id: String,
    },
    ColumnCreated(Column),
    ColumnUpdated(Column),
    ColumnDeleted {
        id: String,
        project_id: String,
    },
    /// Full settled column ordering for the project.
    ColumnsReordered(Vec<PositionUpdate>),
    CardCreated(Card),
    CardUpdated(Card),
    CardMoved {
        card_id: String,
        from_column_id: String,
        column_id: String,
        position: i32,
    },
    CardDeleted {
        id: String,
        column_id: String,
    },
    CardsReordered {
        column_id: String,
        card_orders: Vec<PositionUpdate>,
    },
}

impl BoardEvent {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProjectUpdated(_) => "project_updated",
            Self::ProjectDeleted { .. } => "project_deleted",
            Self::ColumnCreated(_) => "column_created",
            Self::ColumnUpdated(_) => "column_updated",
            Self::ColumnDeleted { .. } => "column_deleted",
            Self::ColumnsReordered(_) => "columns_reordered",
            Self::CardCreated(_) => "card_created",
            Self::CardUpdated(_) => "card_updated",
            Self::CardMoved { .. } => "card_moved",
            Self::CardDeleted { .. } => "card_deleted",
            Self::CardsReordered { .. } => "cards_reordered",
        }
    }
}
