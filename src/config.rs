use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{AppError, AppResult};

pub const DATA_DIR_ENV: &str = "ALIST_DATA_DIR";
pub const CHOICES_ENV: &str = "ALIST_CHOICES";
pub const WORKERS_ENV: &str = "ALIST_WORKERS";
pub const LOG_DIR_ENV: &str = "ALIST_LOG_DIR";

pub const DATABASE_NAME: &str = "a_list_content_provider.db";
const APP_IDENTIFIER: &str = "com.myapp.alist";
const DEFAULT_WORKERS: usize = 2;

const DEFAULT_CATEGORIES: &[&str] = &["All", "To Do", "News", "Shopping", "Work", "Other"];
const DEFAULT_STATUSES: &[&str] = &["All", "Current", "In Progress", "Pending", "Completed"];

/// The enumerated category and status choices. Entry 0 of each list is the
/// "no filter" placeholder and is never a storable value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceLists {
    categories: Vec<String>,
    statuses: Vec<String>,
}

impl ChoiceLists {
    pub fn new(categories: Vec<String>, statuses: Vec<String>) -> AppResult<Self> {
        let lists = Self {
            categories,
            statuses,
        };
        lists.ensure_non_empty()?;
        Ok(lists)
    }

    pub fn from_json_str(raw: &str) -> AppResult<Self> {
        let lists: ChoiceLists = serde_json::from_str(raw)?;
        lists.ensure_non_empty()?;
        Ok(lists)
    }

    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| AppError::from(err).with_context("path", path.display().to_string()))?;
        Self::from_json_str(&raw).map_err(|err| err.with_context("path", path.display().to_string()))
    }

    fn ensure_non_empty(&self) -> AppResult<()> {
        if self.categories.is_empty() || self.statuses.is_empty() {
            return Err(AppError::new(
                "CONFIG/EMPTY_CHOICES",
                "Category and status lists need at least the placeholder entry",
            ));
        }
        Ok(())
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn statuses(&self) -> &[String] {
        &self.statuses
    }

    pub fn category_placeholder(&self) -> &str {
        self.categories.first().map(String::as_str).unwrap_or_default()
    }

    pub fn status_placeholder(&self) -> &str {
        self.statuses.first().map(String::as_str).unwrap_or_default()
    }

    pub fn is_category_placeholder(&self, value: &str) -> bool {
        eq_ignore_case(value, self.category_placeholder())
    }

    pub fn is_status_placeholder(&self, value: &str) -> bool {
        eq_ignore_case(value, self.status_placeholder())
    }
}

impl Default for ChoiceLists {
    fn default() -> Self {
        Self {
            categories: DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect(),
            statuses: DEFAULT_STATUSES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub(crate) fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Process-level settings resolved once at start-up.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub choices: ChoiceLists,
    pub worker_threads: usize,
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        let db_path = default_db_path()?;

        let choices = match std::env::var_os(CHOICES_ENV) {
            Some(path) => ChoiceLists::load(Path::new(&path))?,
            None => ChoiceLists::default(),
        };

        let worker_threads = std::env::var(WORKERS_ENV)
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_WORKERS);

        let log_dir = std::env::var_os(LOG_DIR_ENV).map(PathBuf::from);

        info!(
            target: "alist",
            event = "config_resolved",
            db_path = %db_path.display(),
            worker_threads,
            categories = choices.categories().len(),
            statuses = choices.statuses().len()
        );

        Ok(Self {
            db_path,
            choices,
            worker_threads,
            log_dir,
        })
    }
}

pub fn default_db_path() -> AppResult<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir).join(DATABASE_NAME));
    }

    let base = dirs::data_dir()
        .or_else(|| std::env::current_dir().ok())
        .ok_or_else(|| {
            AppError::new(
                "CONFIG/DATA_DIR",
                "Failed to resolve application data directory",
            )
        })?;
    Ok(base.join(APP_IDENTIFIER).join(DATABASE_NAME))
}
