use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::ChoiceLists;
use crate::model::{self, Item, ItemSet};
use crate::query::{ItemFilter, SelectQuery};
use crate::store::{ListStore, Subscription};
use crate::validate::{verify, FieldValues, VerifyError};
use crate::{AppError, AppResult};

/// Returned by repository writes whenever nothing was written.
pub const WRITE_FAILED: i64 = -1;

/// The query the repository is currently following.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveQuery {
    All,
    Query(SelectQuery),
}

struct Current {
    query: ActiveQuery,
    forwarder: JoinHandle<()>,
}

/// Mediates between commands and the store. Follows exactly one subscription
/// at a time and republishes its result sets once the store is created.
pub struct ItemRepository {
    store: Arc<ListStore>,
    choices: Arc<ChoiceLists>,
    published: Arc<watch::Sender<Option<ItemSet>>>,
    generation: Arc<AtomicU64>,
    current: Mutex<Current>,
}

impl ItemRepository {
    /// Starts out following every row.
    pub fn new(store: Arc<ListStore>, choices: Arc<ChoiceLists>) -> Self {
        let (published, _) = watch::channel(None);
        let published = Arc::new(published);
        let generation = Arc::new(AtomicU64::new(0));
        let publisher = Publisher {
            published: published.clone(),
            generation: generation.clone(),
            owned: 0,
        };
        let forwarder = spawn_forwarder(&store, store.subscribe_all(), publisher);
        Self {
            store,
            choices,
            published,
            generation,
            current: Mutex::new(Current {
                query: ActiveQuery::All,
                forwarder,
            }),
        }
    }

    pub fn choices(&self) -> &ChoiceLists {
        &self.choices
    }

    /// The published result set. Holds `None` until the store is created and
    /// the active query has delivered.
    pub fn items(&self) -> watch::Receiver<Option<ItemSet>> {
        self.published.subscribe()
    }

    pub fn active_query(&self) -> ActiveQuery {
        self.lock_current().query.clone()
    }

    /// Replaces the active subscription with `sql`/`args`. The new query runs
    /// once and its rows are published before this returns, so the published
    /// set never lags behind [`ItemRepository::active_query`]. On error the
    /// previous query stays active.
    pub async fn select_items(&self, sql: impl Into<String>, args: Vec<String>) -> AppResult<()> {
        let query = SelectQuery::new(sql, args);
        let with_operation = |err| AppError::from(err).with_context("operation", "select_items");
        let first = if self.store.is_created() {
            Some(self.store.query(&query).await.map_err(with_operation)?)
        } else {
            None
        };
        let subscription = self.store.subscribe(query.clone()).map_err(with_operation)?;
        self.swap(ActiveQuery::Query(query), subscription, first);
        Ok(())
    }

    pub async fn select_filtered(&self, filter: &ItemFilter) -> AppResult<()> {
        let query = filter.to_query(&self.choices);
        self.select_items(query.sql, query.args).await
    }

    pub async fn select_all(&self) -> AppResult<()> {
        let first = if self.store.is_created() {
            Some(self.store.select_all().await.map_err(|err| {
                AppError::from(err).with_context("operation", "select_all")
            })?)
        } else {
            None
        };
        let subscription = self.store.subscribe_all();
        self.swap(ActiveQuery::All, subscription, first);
        Ok(())
    }

    fn swap(&self, query: ActiveQuery, subscription: Subscription, first: Option<Vec<Item>>) {
        let mut current = self.lock_current();
        current.forwarder.abort();
        // Bumped before publishing so a forwarder that is mid-send for the
        // old query gets refused.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.published.send_replace(first.map(Arc::new));
        current.forwarder = spawn_forwarder(
            &self.store,
            subscription,
            Publisher {
                published: self.published.clone(),
                generation: self.generation.clone(),
                owned: generation,
            },
        );
        debug!(target: "alist", event = "active_query_swapped", query = ?query, generation);
        current.query = query;
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Current> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs the active query once, outside the push channel.
    pub async fn fetch_current(&self) -> AppResult<Vec<Item>> {
        let query = match self.active_query() {
            ActiveQuery::All => SelectQuery::all(),
            ActiveQuery::Query(query) => query,
        };
        self.store.query(&query).await.map_err(AppError::from)
    }

    /// Validates and inserts. Returns the new id, or [`WRITE_FAILED`] when the
    /// content is rejected or the store refuses the row.
    pub async fn insert_item(&self, values: Option<&FieldValues>) -> Result<i64, VerifyError> {
        let Some(item) = verify(values, &self.choices)? else {
            error!(target: "alist", event = "insert_item_rejected");
            return Ok(WRITE_FAILED);
        };
        match self.store.insert(&item).await {
            Ok(id) => Ok(id),
            Err(err) => {
                let err = AppError::from(err).with_context("operation", "insert_item");
                error!(target: "alist", event = "insert_item_failed", error = %err);
                Ok(WRITE_FAILED)
            }
        }
    }

    /// Validates and rewrites row `id`. Returns the changed-row count (0 when
    /// no row has that id), or [`WRITE_FAILED`].
    pub async fn update_item(
        &self,
        id: i64,
        values: Option<&FieldValues>,
    ) -> Result<i64, VerifyError> {
        let Some(item) = verify(values, &self.choices)? else {
            error!(target: "alist", event = "update_item_rejected", id);
            return Ok(WRITE_FAILED);
        };
        match self.store.update(&item.with_id(id)).await {
            Ok(changed) => Ok(changed as i64),
            Err(err) => {
                let err = AppError::from(err)
                    .with_context("operation", "update_item")
                    .with_context("id", id.to_string());
                error!(target: "alist", event = "update_item_failed", error = %err);
                Ok(WRITE_FAILED)
            }
        }
    }

    pub async fn delete_items(&self, items: &[Item]) -> i64 {
        match self.store.delete(items).await {
            Ok(removed) => removed as i64,
            Err(err) => {
                let err = AppError::from(err).with_context("operation", "delete_items");
                error!(target: "alist", event = "delete_items_failed", error = %err);
                WRITE_FAILED
            }
        }
    }

    /// Deletes every row of the currently published result set.
    pub async fn delete_current(&self) -> i64 {
        let shown = self.published.borrow().clone();
        match shown {
            Some(items) => self.delete_items(&items).await,
            None => 0,
        }
    }

    /// Share text for the currently published result set.
    pub fn share_text(&self) -> String {
        self.published
            .borrow()
            .as_deref()
            .map(|items| model::share_text(items))
            .unwrap_or_default()
    }
}

impl Drop for ItemRepository {
    fn drop(&mut self) {
        self.lock_current().forwarder.abort();
    }
}

/// The forwarder's handle on the published channel. Sends only while its
/// generation is still the repository's current one.
struct Publisher {
    published: Arc<watch::Sender<Option<ItemSet>>>,
    generation: Arc<AtomicU64>,
    owned: u64,
}

impl Publisher {
    fn publish(&self, items: ItemSet) {
        self.published.send_if_modified(|slot| {
            if self.generation.load(Ordering::SeqCst) != self.owned {
                return false;
            }
            *slot = Some(items);
            true
        });
    }
}

fn spawn_forwarder(
    store: &ListStore,
    subscription: Subscription,
    publisher: Publisher,
) -> JoinHandle<()> {
    let mut created = store.created();
    store.runtime().spawn(async move {
        let mut rows = subscription.receiver();
        loop {
            let ready = *created.borrow_and_update();
            let latest = rows.borrow_and_update().clone();
            if ready {
                if let Some(items) = latest {
                    publisher.publish(items);
                }
            }
            tokio::select! {
                res = rows.changed() => if res.is_err() { break; },
                res = created.changed() => if res.is_err() { break; },
            }
        }
        drop(subscription);
    })
}
