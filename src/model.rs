use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::AppError;

/// Name of the single table holding list items.
pub const TABLE_NAME: &str = "list";

/// Id used when no row is selected. Updates keyed by it touch nothing.
pub const NO_ID: i64 = -1;

/// One column of the `list` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Id,
    Name,
    Description,
    Category,
    Status,
}

impl Field {
    /// The four user-editable text columns in validation order.
    pub const TEXT: [Field; 4] = [
        Field::Name,
        Field::Description,
        Field::Category,
        Field::Status,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Field::Id => "_id",
            Field::Name => "name",
            Field::Description => "description",
            Field::Category => "category",
            Field::Status => "status",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for Field {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "_id" | "id" => Ok(Field::Id),
            "name" => Ok(Field::Name),
            "description" => Ok(Field::Description),
            "category" => Ok(Field::Category),
            "status" => Ok(Field::Status),
            other => Err(AppError::new("QUERY/UNKNOWN_FIELD", "Unknown field")
                .with_context("field", other.to_string())),
        }
    }
}

/// A row of the `list` table as read back from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub category: String,
    pub status: String,
}

/// A result set delivered by a subscription.
pub type ItemSet = Arc<Vec<Item>>;

/// A record that passed validation. Only [`crate::validate::verify`] builds one,
/// and only this shape is accepted by the store's insert and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidItem {
    id: i64,
    name: String,
    description: String,
    category: String,
    status: String,
}

impl ValidItem {
    pub(crate) fn new(name: String, description: String, category: String, status: String) -> Self {
        Self {
            id: 0,
            name,
            description,
            category,
            status,
        }
    }

    /// Targets an existing row for an update.
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn status(&self) -> &str {
        &self.status
    }
}

impl From<ValidItem> for Item {
    fn from(value: ValidItem) -> Self {
        Item {
            id: value.id,
            name: value.name,
            description: value.description,
            category: value.category,
            status: value.status,
        }
    }
}

/// Renders items the way they are handed to other apps: one
/// `name, description, category, status` line per item.
pub fn share_text(items: &[Item]) -> String {
    let mut text = String::new();
    for item in items {
        text.push_str(&item.name);
        text.push_str(", ");
        text.push_str(&item.description);
        text.push_str(", ");
        text.push_str(&item.category);
        text.push_str(", ");
        text.push_str(&item.status);
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_parses_case_insensitively() {
        assert_eq!("Name".parse::<Field>().unwrap(), Field::Name);
        assert_eq!(" STATUS ".parse::<Field>().unwrap(), Field::Status);
        assert_eq!("_id".parse::<Field>().unwrap(), Field::Id);
        let err = "colour".parse::<Field>().unwrap_err();
        assert_eq!(err.code(), "QUERY/UNKNOWN_FIELD");
    }

    #[test]
    fn share_text_lists_each_item_on_its_own_line() {
        let items = vec![
            Item {
                id: 1,
                name: "Name 1".into(),
                description: "Description 1".into(),
                category: "To Do".into(),
                status: "Current".into(),
            },
            Item {
                id: 2,
                name: "Name 2".into(),
                description: String::new(),
                category: "News".into(),
                status: "In Progress".into(),
            },
        ];

        assert_eq!(
            share_text(&items),
            "Name 1, Description 1, To Do, Current\nName 2, , News, In Progress\n"
        );
        assert_eq!(share_text(&[]), "");
    }
}
