//! Field validation for list items.
//!
//! Input arrives as an untyped name → value mapping. Two tiers of failure are
//! kept apart: a missing mapping, a missing key or a null value is a caller
//! bug and comes back as [`VerifyError`]; blank or placeholder content is an
//! ordinary user mistake and comes back as `Ok(None)`.

use std::collections::HashMap;

use thiserror::Error;

use crate::config::ChoiceLists;
use crate::model::{Field, ValidItem};

/// Raw field input keyed by column name. `None` is the null marker, which is
/// distinct from the empty string.
pub type FieldValues = HashMap<String, Option<String>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("no field values were supplied")]
    MissingValues,
    #[error("required field `{0}` is missing")]
    MissingField(Field),
    #[error("required field `{0}` is null")]
    NullField(Field),
}

/// Builds a [`FieldValues`] map with every text field present.
pub fn field_values(name: &str, description: &str, category: &str, status: &str) -> FieldValues {
    let mut values = FieldValues::with_capacity(4);
    values.insert(Field::Name.column().to_string(), Some(name.to_string()));
    values.insert(
        Field::Description.column().to_string(),
        Some(description.to_string()),
    );
    values.insert(Field::Category.column().to_string(), Some(category.to_string()));
    values.insert(Field::Status.column().to_string(), Some(status.to_string()));
    values
}

fn required<'a>(values: &'a FieldValues, field: Field) -> Result<&'a str, VerifyError> {
    match values.get(field.column()) {
        None => Err(VerifyError::MissingField(field)),
        Some(None) => Err(VerifyError::NullField(field)),
        Some(Some(value)) => Ok(value.as_str()),
    }
}

/// Strips leading and trailing ASCII control characters and spaces
/// (everything up to U+0020). Other Unicode whitespace such as U+00A0 is kept.
pub(crate) fn trim_blank(value: &str) -> &str {
    value.trim_matches(|c: char| c <= ' ')
}

fn is_blank(value: &str) -> bool {
    trim_blank(value).is_empty()
}

/// Checks a proposed item. Stored values keep their surrounding whitespace;
/// trimming only decides validity.
pub fn verify(
    values: Option<&FieldValues>,
    choices: &ChoiceLists,
) -> Result<Option<ValidItem>, VerifyError> {
    let values = values.ok_or(VerifyError::MissingValues)?;
    let mut ok = true;

    let name = required(values, Field::Name)?;
    if is_blank(name) {
        ok = false;
    }

    // "" is a valid description, "  " is not.
    let description = required(values, Field::Description)?;
    if !description.is_empty() && is_blank(description) {
        ok = false;
    }

    let category = required(values, Field::Category)?;
    if is_blank(category) || choices.is_category_placeholder(trim_blank(category)) {
        ok = false;
    }

    let status = required(values, Field::Status)?;
    if is_blank(status) || choices.is_status_placeholder(trim_blank(status)) {
        ok = false;
    }

    if !ok {
        return Ok(None);
    }

    Ok(Some(ValidItem::new(
        name.to_string(),
        description.to_string(),
        category.to_string(),
        status.to_string(),
    )))
}
