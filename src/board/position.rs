//! Positional ordering for sibling sets.
//!
//! Columns are ordered within a project, cards within a column and
//! checklist items within a card. Every sibling list is read in
//! `position` order with insertion order (`rowid`) breaking ties, so
//! gaps and duplicates left by deletes never change what clients see.

use rusqlite::{Connection, params};

use crate::errors::{BoardError, Result};

use super::models::PositionUpdate;

/// The parent that owns an ordered sibling set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiblingScope<'a> {
    Columns { project_id: &'a str },
    Cards { column_id: &'a str },
    Checklist { card_id: &'a str },
}

impl<'a> SiblingScope<'a> {
    fn table(&self) -> &'static str {
        match self {
            Self::Columns { .. } => "board_columns",
            Self::Cards { .. } => "cards",
            Self::Checklist { .. } => "checklist_items",
        }
    }

    fn parent_column(&self) -> &'static str {
        match self {
            Self::Columns { .. } => "project_id",
            Self::Cards { .. } => "column_id",
            Self::Checklist { .. } => "card_id",
        }
    }

    fn parent_id(&self) -> &'a str {
        match *self {
            Self::Columns { project_id } => project_id,
            Self::Cards { column_id } => column_id,
            Self::Checklist { card_id } => card_id,
        }
    }

    /// Entity kind of the members, used in `NotFound` errors.
    pub fn member_kind(&self) -> &'static str {
        match self {
            Self::Columns { .. } => "Column",
            Self::Cards { .. } => "Card",
            Self::Checklist { .. } => "Checklist item",
        }
    }
}

/// `max + 1` over the existing positions, or `0` for an empty set.
pub fn next_position<I>(existing: I) -> i32
where
    I: IntoIterator<Item = i32>,
{
    existing.into_iter().max().map_or(0, |max| max + 1)
}

/// Insert `id` into an ordered id list at `index`, clamped to the list
/// length. Any existing occurrence of `id` is removed first.
pub fn insert_at(mut ids: Vec<String>, id: &str, index: usize) -> Vec<String> {
    ids.retain(|existing| existing != id);
    let index = index.min(ids.len());
    ids.insert(index, id.to_string());
    ids
}

/// Dense `0..n` positions for an ordered id list.
pub fn dense_positions(ids: &[String]) -> Vec<PositionUpdate> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| PositionUpdate {
            id: id.clone(),
            position: i as i32,
        })
        .collect()
}

/// Position the next appended sibling should take.
pub fn next_position_in(conn: &Connection, scope: SiblingScope<'_>) -> Result<i32> {
    let sql = format!(
        "SELECT MAX(position) FROM {} WHERE {} = ?1",
        scope.table(),
        scope.parent_column()
    );
    let max: Option<i32> = conn.query_row(&sql, params![scope.parent_id()], |row| row.get(0))?;
    Ok(next_position(max))
}

/// Member ids in display order.
pub fn sibling_ids(conn: &Connection, scope: SiblingScope<'_>) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT id FROM {} WHERE {} = ?1 ORDER BY position, rowid",
        scope.table(),
        scope.parent_column()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![scope.parent_id()], |row| row.get::<_, String>(0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

/// Apply `(id, position)` pairs, each scoped to the owning parent.
///
/// Callers run this inside a transaction: a pair whose id is not a member
/// of `scope` returns `NotFound` and the caller drops the transaction, so
/// nothing is applied.
pub fn apply_orders(
    conn: &Connection,
    scope: SiblingScope<'_>,
    orders: &[PositionUpdate],
    updated_at: &str,
) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET position = ?1, updated_at = ?2 WHERE id = ?3 AND {} = ?4",
        scope.table(),
        scope.parent_column()
    );
    let mut stmt = conn.prepare(&sql)?;
    for order in orders {
        let changed = stmt.execute(params![
            order.position,
            updated_at,
            order.id,
            scope.parent_id()
        ])?;
        if changed == 0 {
            return Err(BoardError::not_found(scope.member_kind(), order.id.clone()));
        }
    }
    Ok(())
}

/// Renumber a sibling set densely in its current display order and return
/// the resulting ordering.
pub fn settle(conn: &Connection, scope: SiblingScope<'_>) -> Result<Vec<PositionUpdate>> {
    let ids = sibling_ids(conn, scope)?;
    write_order(conn, scope, &ids)
}

/// Write dense positions following `ids`.
pub fn write_order(
    conn: &Connection,
    scope: SiblingScope<'_>,
    ids: &[String],
) -> Result<Vec<PositionUpdate>> {
    let sql = format!(
        "UPDATE {} SET position = ?1 WHERE id = ?2 AND {} = ?3 AND position != ?1",
        scope.table(),
        scope.parent_column()
    );
    let mut stmt = conn.prepare(&sql)?;
    let orders = dense_positions(ids);
    for order in &orders {
        stmt.execute(params![order.position, order.id, scope.parent_id()])?;
    }
    Ok(orders)
}
