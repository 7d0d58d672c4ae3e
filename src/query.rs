//! Builds the SELECT statements the list screen issues: per-field "contains"
//! filters, an optional single-row restriction, and a deterministic ORDER BY.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ChoiceLists;
use crate::model::{Field, NO_ID, TABLE_NAME};

const PROJECTION: [Field; 5] = [
    Field::Id,
    Field::Name,
    Field::Description,
    Field::Category,
    Field::Status,
];

/// A full SELECT statement plus its positional `?` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectQuery {
    pub sql: String,
    pub args: Vec<String>,
}

impl SelectQuery {
    pub fn new(sql: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }

    /// Every row, in storage order.
    pub fn all() -> Self {
        Self::new(format!("SELECT * FROM {TABLE_NAME}"), Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: Field,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(field: Field) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    pub fn desc(field: Field) -> Self {
        Self {
            field,
            descending: true,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "{} DESC", self.field.column())
        } else {
            f.write_str(self.field.column())
        }
    }
}

/// Ordered sort keys rendered as an ORDER BY list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy(pub Vec<SortKey>);

impl OrderBy {
    /// Sorts by `field`, breaking ties on the remaining text columns so that
    /// equal primary values still come back in a stable order.
    pub fn primary(field: Field) -> Self {
        Self::primary_with_direction(field, false)
    }

    /// Like [`OrderBy::primary`] but the primary key may run descending. The
    /// tie-break columns stay ascending.
    pub fn primary_with_direction(field: Field, descending: bool) -> Self {
        use Field::*;
        let rest: [Field; 3] = match field {
            Name => [Category, Status, Description],
            Description => [Category, Status, Name],
            Category => [Status, Name, Description],
            Status => [Category, Name, Description],
            Id => [Name, Category, Status],
        };
        let mut keys = Vec::with_capacity(4);
        keys.push(SortKey { field, descending });
        keys.extend(rest.into_iter().map(SortKey::asc));
        OrderBy(keys)
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

/// Caption describing what the current selection shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectMode {
    All,
    Containing,
    Row,
}

impl fmt::Display for SelectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SelectMode::All => "Select All",
            SelectMode::Containing => "Containing",
            SelectMode::Row => "Row",
        };
        write!(f, "Select Mode: {label}")
    }
}

/// Raw filter input as typed by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFilter {
    pub name: String,
    pub description: String,
    pub category: String,
    pub status: String,
    pub row_id: i64,
    pub order_by: OrderBy,
}

impl ItemFilter {
    /// No filtering: placeholder choices, empty text, name ordering.
    pub fn all(choices: &ChoiceLists) -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            category: choices.category_placeholder().to_string(),
            status: choices.status_placeholder().to_string(),
            row_id: NO_ID,
            order_by: OrderBy::primary(Field::Name),
        }
    }

    pub fn mode(&self, choices: &ChoiceLists) -> SelectMode {
        if self.row_id != NO_ID {
            SelectMode::Row
        } else if self.name.is_empty()
            && self.description.is_empty()
            && (self.category.is_empty() || choices.is_category_placeholder(&self.category))
            && (self.status.is_empty() || choices.is_status_placeholder(&self.status))
        {
            SelectMode::All
        } else {
            SelectMode::Containing
        }
    }

    pub fn to_query(&self, choices: &ChoiceLists) -> SelectQuery {
        let mut predicates: Vec<String> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        let mut push = |field: Field, input: &str| {
            predicates.push(format!("{} LIKE ?", field.column()));
            args.push(like_pattern(input));
        };

        if !self.name.is_empty() {
            push(Field::Name, &self.name);
        }
        if !self.description.is_empty() {
            push(Field::Description, &self.description);
        }
        if !self.category.is_empty() && !choices.is_category_placeholder(&self.category) {
            push(Field::Category, &self.category);
        }
        if !self.status.is_empty() && !choices.is_status_placeholder(&self.status) {
            push(Field::Status, &self.status);
        }
        if self.row_id != NO_ID {
            predicates.push(format!("{} = {}", Field::Id.column(), self.row_id));
        }

        let columns: Vec<&str> = PROJECTION.iter().map(|f| f.column()).collect();
        let mut sql = format!("SELECT {} FROM {TABLE_NAME}", columns.join(", "));
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&self.order_by.to_string());

        SelectQuery::new(sql, args)
    }
}

/// Whitespace-only input matches blank columns exactly; anything else is a
/// trimmed substring match.
fn like_pattern(input: &str) -> String {
    let trimmed = crate::validate::trim_blank(input);
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("%{trimmed}%")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choices() -> ChoiceLists {
        ChoiceLists::default()
    }

    #[test]
    fn tie_break_chains_render_in_fixed_order() {
        assert_eq!(
            OrderBy::primary(Field::Name).to_string(),
            "name, category, status, description"
        );
        assert_eq!(
            OrderBy::primary(Field::Description).to_string(),
            "description, category, status, name"
        );
        assert_eq!(
            OrderBy::primary(Field::Category).to_string(),
            "category, status, name, description"
        );
        assert_eq!(
            OrderBy::primary(Field::Status).to_string(),
            "status, category, name, description"
        );
        assert_eq!(
            OrderBy::primary_with_direction(Field::Name, true).to_string(),
            "name DESC, category, status, description"
        );
    }

    #[test]
    fn compound_keys_render_direction_per_key() {
        let order = OrderBy(vec![SortKey::asc(Field::Name), SortKey::desc(Field::Description)]);
        assert_eq!(order.to_string(), "name, description DESC");
    }

    #[test]
    fn unfiltered_query_has_no_where_clause() {
        let filter = ItemFilter::all(&choices());
        let query = filter.to_query(&choices());
        assert_eq!(
            query.sql,
            "SELECT _id, name, description, category, status FROM list \
             ORDER BY name, category, status, description"
        );
        assert!(query.args.is_empty());
        assert_eq!(filter.mode(&choices()), SelectMode::All);
    }

    #[test]
    fn text_and_choice_filters_become_like_predicates() {
        let filter = ItemFilter {
            name: " milk ".into(),
            description: String::new(),
            category: "Shopping".into(),
            status: "all".into(),
            row_id: NO_ID,
            order_by: OrderBy::primary(Field::Category),
        };
        let query = filter.to_query(&choices());
        assert_eq!(
            query.sql,
            "SELECT _id, name, description, category, status FROM list \
             WHERE name LIKE ? AND category LIKE ? \
             ORDER BY category, status, name, description"
        );
        assert_eq!(query.args, vec!["%milk%", "%Shopping%"]);
        assert_eq!(filter.mode(&choices()), SelectMode::Containing);
    }

    #[test]
    fn whitespace_only_text_selects_blank_columns() {
        let mut filter = ItemFilter::all(&choices());
        filter.description = "   ".into();
        let query = filter.to_query(&choices());
        assert!(query.sql.contains("WHERE description LIKE ?"));
        assert_eq!(query.args, vec![String::new()]);
    }

    #[test]
    fn like_patterns_keep_non_breaking_spaces() {
        assert_eq!(like_pattern("\u{0001} milk\t"), "%milk%");
        assert_eq!(like_pattern("\u{00A0}"), "%\u{00A0}%");
    }

    #[test]
    fn row_id_restricts_to_one_row() {
        let mut filter = ItemFilter::all(&choices());
        filter.row_id = 7;
        let query = filter.to_query(&choices());
        assert!(query.sql.contains("WHERE _id = 7 ORDER BY"));
        assert_eq!(filter.mode(&choices()), SelectMode::Row);

        filter.name = "a".into();
        let query = filter.to_query(&choices());
        assert!(query.sql.contains("WHERE name LIKE ? AND _id = 7"));
    }

    #[test]
    fn select_mode_caption() {
        assert_eq!(SelectMode::All.to_string(), "Select Mode: Select All");
        assert_eq!(SelectMode::Containing.to_string(), "Select Mode: Containing");
    }
}
