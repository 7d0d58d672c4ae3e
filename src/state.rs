use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::info;

use crate::config::{AppConfig, ChoiceLists};
use crate::repo::ItemRepository;
use crate::store::ListStore;
use crate::AppResult;

/// Process-wide state, built once at start-up and passed by reference. The
/// store and repository are opened lazily, at most once each.
pub struct AppState {
    config: AppConfig,
    choices: Arc<ChoiceLists>,
    store: OnceCell<Arc<ListStore>>,
    repository: OnceCell<Arc<ItemRepository>>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let choices = Arc::new(config.choices.clone());
        Self {
            config,
            choices,
            store: OnceCell::new(),
            repository: OnceCell::new(),
        }
    }

    /// Uses an already opened store, e.g. an in-memory one.
    pub fn with_store(config: AppConfig, store: Arc<ListStore>) -> Self {
        let state = Self::new(config);
        // A fresh cell cannot already be set.
        let _ = state.store.set(store);
        state
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn choices(&self) -> Arc<ChoiceLists> {
        self.choices.clone()
    }

    pub async fn store(&self) -> AppResult<Arc<ListStore>> {
        let store = self
            .store
            .get_or_try_init(|| async {
                let store = ListStore::open(&self.config.db_path).await?;
                info!(
                    target: "alist",
                    event = "store_opened",
                    path = %self.config.db_path.display()
                );
                AppResult::Ok(Arc::new(store))
            })
            .await?;
        Ok(store.clone())
    }

    pub async fn repository(&self) -> AppResult<Arc<ItemRepository>> {
        let repository = self
            .repository
            .get_or_try_init(|| async {
                let store = self.store().await?;
                AppResult::Ok(Arc::new(ItemRepository::new(store, self.choices())))
            })
            .await?;
        Ok(repository.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> AppConfig {
        AppConfig {
            db_path: dir.join("list.db"),
            choices: ChoiceLists::default(),
            worker_threads: 1,
            log_dir: None,
        }
    }

    #[tokio::test]
    async fn store_and_repository_are_built_once() {
        let tmp = tempdir().unwrap();
        let state = AppState::new(config(tmp.path()));

        let first = state.store().await.unwrap();
        let second = state.store().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.is_created());

        let repo_a = state.repository().await.unwrap();
        let repo_b = state.repository().await.unwrap();
        assert!(Arc::ptr_eq(&repo_a, &repo_b));
    }

    #[tokio::test]
    async fn injected_store_is_used() {
        let tmp = tempdir().unwrap();
        let store = Arc::new(ListStore::open_in_memory().await.unwrap());
        let state = AppState::with_store(config(tmp.path()), store.clone());
        let resolved = state.store().await.unwrap();
        assert!(Arc::ptr_eq(&store, &resolved));
        assert!(!tmp.path().join("list.db").exists());
    }
}
