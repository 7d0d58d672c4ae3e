//! Core of the list app: validation, the SQLite-backed item store, and the
//! repository that front ends talk to.

pub mod config;
pub mod db;
mod error;
pub mod executors;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod query;
pub mod repo;
pub mod state;
pub mod store;
pub mod validate;

pub use config::{AppConfig, ChoiceLists};
pub use error::{AppError, AppResult};
pub use model::{share_text, Field, Item, ItemSet, ValidItem, NO_ID};
pub use query::{ItemFilter, OrderBy, SelectMode, SelectQuery, SortKey};
pub use repo::{ActiveQuery, ItemRepository, WRITE_FAILED};
pub use state::AppState;
pub use store::{ListStore, StoreError, Subscription};
pub use validate::{field_values, verify, FieldValues, VerifyError};
