//! Input validation for board mutations.
//!
//! Each input type implements [`Validate`]; failures carry the offending
//! field name so the HTTP layer can report it.

use crate::errors::{BoardError, Result};

use super::models::*;

const MAX_NAME_LEN: usize = 255;

/// Trait for validating non-empty, bounded strings.
pub trait ValidateNonEmpty {
    /// Fails when the value is empty or whitespace-only, or longer than 255
    /// characters.
    fn validate_non_empty(&self, field: &str) -> Result<()>;
}

impl ValidateNonEmpty for str {
    fn validate_non_empty(&self, field: &str) -> Result<()> {
        if self.trim().is_empty() {
            return Err(BoardError::validation(field, "must not be empty"));
        }
        if self.chars().count() > MAX_NAME_LEN {
            return Err(BoardError::validation(
                field,
                format!("must be at most {} characters", MAX_NAME_LEN),
            ));
        }
        Ok(())
    }
}

impl ValidateNonEmpty for String {
    fn validate_non_empty(&self, field: &str) -> Result<()> {
        self.as_str().validate_non_empty(field)
    }
}

/// Trait for validating numeric ranges.
pub trait ValidateRange: Sized {
    fn validate_range(&self, field: &str, min: Self, max: Self) -> Result<()>;

    fn validate_non_negative(&self, field: &str) -> Result<()>;
}

macro_rules! impl_validate_range {
    ($($t:ty),*) => {
        $(
            impl ValidateRange for $t {
                fn validate_range(&self, field: &str, min: Self, max: Self) -> Result<()> {
                    if *self < min || *self > max {
                        return Err(BoardError::validation(
                            field,
                            format!("must be between {} and {}", min, max),
                        ));
                    }
                    Ok(())
                }

                fn validate_non_negative(&self, field: &str) -> Result<()> {
                    if *self < 0 {
                        return Err(BoardError::validation(field, "must not be negative"));
                    }
                    Ok(())
                }
            }
        )*
    };
}

impl_validate_range!(i32, i64);

/// `#RRGGBB` hex color.
pub fn validate_color(value: &str, field: &str) -> Result<()> {
    let valid = value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(BoardError::validation(field, "must be a #RRGGBB hex color"));
    }
    Ok(())
}

/// RFC 3339 timestamp, e.g. `2024-06-30T00:00:00.000Z`.
pub fn validate_timestamp(value: &str, field: &str) -> Result<()> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|_| ())
        .map_err(|_| BoardError::validation(field, "must be an ISO-8601 timestamp"))
}

pub fn parse_priority(value: &str) -> Result<Priority> {
    value
        .parse()
        .map_err(|e: String| BoardError::validation("priority", e))
}

pub fn parse_entity_type(value: &str) -> Result<EntityType> {
    value
        .parse()
        .map_err(|e: String| BoardError::validation("type", e))
}

pub fn validate_orders(orders: &[PositionUpdate]) -> Result<()> {
    for order in orders {
        if order.id.trim().is_empty() {
            return Err(BoardError::validation("id", "must not be empty"));
        }
        order.position.validate_non_negative("position")?;
    }
    Ok(())
}

fn validate_optional_timestamp(value: &Option<String>, field: &str) -> Result<()> {
    match value {
        Some(ts) => validate_timestamp(ts, field),
        None => Ok(()),
    }
}

fn validate_optional_color(value: &Option<String>, field: &str) -> Result<()> {
    match value {
        Some(c) => validate_color(c, field),
        None => Ok(()),
    }
}

/// Shape validation run before any write.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

impl Validate for CreateUser {
    fn validate(&self) -> Result<()> {
        match &self.email {
            Some(email) if !email.contains('@') => {
                Err(BoardError::validation("email", "must be an email address"))
            }
            _ => Ok(()),
        }
    }
}

impl Validate for CreateProject {
    fn validate(&self) -> Result<()> {
        self.name.validate_non_empty("name")?;
        self.owner_id.validate_non_empty("ownerId")?;
        validate_optional_color(&self.color, "color")?;
        if let Some(icon) = &self.icon {
            icon.validate_non_empty("icon")?;
        }
        if let Some(progress) = self.progress {
            progress.validate_range("progress", 0, 100)?;
        }
        validate_optional_timestamp(&self.deadline, "deadline")
    }
}

impl Validate for ProjectChanges {
    fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            name.validate_non_empty("name")?;
        }
        validate_optional_color(&self.color, "color")?;
        if let Some(icon) = &self.icon {
            icon.validate_non_empty("icon")?;
        }
        if let Some(progress) = self.progress {
            progress.validate_range("progress", 0, 100)?;
        }
        if let Some(deadline) = &self.deadline {
            validate_optional_timestamp(deadline, "deadline")?;
        }
        Ok(())
    }
}

impl Validate for CreateColumn {
    fn validate(&self) -> Result<()> {
        self.name.validate_non_empty("name")?;
        validate_optional_color(&self.color, "color")
    }
}

impl Validate for ColumnChanges {
    fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            name.validate_non_empty("name")?;
        }
        validate_optional_color(&self.color, "color")
    }
}

impl Validate for CreateCard {
    fn validate(&self) -> Result<()> {
        self.title.validate_non_empty("title")?;
        if let Some(p) = &self.priority {
            parse_priority(p)?;
        }
        validate_optional_timestamp(&self.deadline, "deadline")
    }
}

impl Validate for CardChanges {
    fn validate(&self) -> Result<()> {
        if let Some(title) = &self.title {
            title.validate_non_empty("title")?;
        }
        if let Some(p) = &self.priority {
            parse_priority(p)?;
        }
        if let Some(deadline) = &self.deadline {
            validate_optional_timestamp(deadline, "deadline")?;
        }
        Ok(())
    }
}

impl Validate for CreateTag {
    fn validate(&self) -> Result<()> {
        self.name.validate_non_empty("name")?;
        validate_color(&self.color, "color")
    }
}

impl Validate for TagChanges {
    fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            name.validate_non_empty("name")?;
        }
        validate_optional_color(&self.color, "color")
    }
}

impl Validate for CreateEntity {
    fn validate(&self) -> Result<()> {
        self.name.validate_non_empty("name")?;
        parse_entity_type(&self.entity_type)?;
        Ok(())
    }
}

impl Validate for EntityChanges {
    fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            name.validate_non_empty("name")?;
        }
        if let Some(t) = &self.entity_type {
            parse_entity_type(t)?;
        }
        Ok(())
    }
}

impl Validate for CreateChecklistItem {
    fn validate(&self) -> Result<()> {
        self.title.validate_non_empty("title")
    }
}

impl Validate for ChecklistChanges {
    fn validate(&self) -> Result<()> {
        if let Some(title) = &self.title {
            title.validate_non_empty("title")?;
        }
        if let Some(position) = self.position {
            position.validate_non_negative("position")?;
        }
        Ok(())
    }
}

impl Validate for CreateComment {
    fn validate(&self) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(BoardError::validation("content", "must not be empty"));
        }
        self.author_id.validate_non_empty("authorId")
    }
}
