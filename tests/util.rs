#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::time::Duration;

use alist_lib::{field_values, verify, ChoiceLists, ItemSet, ListStore, ValidItem};
use tokio::sync::watch;

pub const NAME_1: &str = "Name 1";
pub const NAME_2: &str = "Name 2";
pub const DESCRIPTION_1: &str = "Description 1";
pub const DESCRIPTION_2: &str = "Description 2";
pub const CATEGORY_1: &str = "To Do";
pub const CATEGORY_2: &str = "News";
pub const STATUS_1: &str = "Current";
pub const STATUS_2: &str = "In Progress";

pub fn valid(name: &str, description: &str, category: &str, status: &str) -> ValidItem {
    verify(
        Some(&field_values(name, description, category, status)),
        &ChoiceLists::default(),
    )
    .expect("well-formed values")
    .expect("acceptable values")
}

pub async fn memory_store() -> ListStore {
    ListStore::open_in_memory()
        .await
        .expect("open in-memory store")
}

/// Waits until the channel holds a result set accepted by `accept`.
pub async fn wait_for_items<F>(rx: &mut watch::Receiver<Option<ItemSet>>, mut accept: F) -> ItemSet
where
    F: FnMut(&[alist_lib::Item]) -> bool,
{
    let guard = tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|rows| rows.as_deref().is_some_and(|items| accept(items.as_slice()))),
    )
    .await
    .expect("result set delivered in time")
    .expect("sender alive");
    guard.clone().expect("accepted set is present")
}
