//! The `list` table: transactional writes, one-shot reads, and push
//! subscriptions that re-run their query after every committed change.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db;
use crate::executors;
use crate::migrate;
use crate::model::{Field, Item, ItemSet, ValidItem, TABLE_NAME};
use crate::query::SelectQuery;
use crate::AppResult;

static READ_STATEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*(select|with)\b").expect("valid read statement regex"));

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("an item named {name:?} already exists")]
    Duplicate { name: String },
    #[error("only a single read statement can be queried")]
    ReadOnly { sql: String },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    fn from_write(err: sqlx::Error, name: &str) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate {
                name: name.to_string(),
            },
            _ => StoreError::Database(err),
        }
    }
}

pub struct ListStore {
    pool: SqlitePool,
    runtime: Handle,
    changes: watch::Sender<u64>,
    created: watch::Sender<bool>,
    allow_foreground: bool,
}

impl ListStore {
    /// Opens (creating when needed) the database file and prepares the schema.
    pub async fn open(db_path: &std::path::Path) -> AppResult<Self> {
        let pool = db::open_sqlite_pool(db_path).await?;
        let store = Self::from_pool(pool);
        store.prepare().await?;
        Ok(store)
    }

    /// A fresh in-memory store with the schema prepared.
    pub async fn open_in_memory() -> AppResult<Self> {
        let pool = db::open_memory_pool().await?;
        let store = Self::from_pool(pool);
        store.prepare().await?;
        Ok(store)
    }

    /// Wraps an existing pool without touching the schema; the store reports
    /// itself as not created until [`ListStore::prepare`] succeeds. Must be
    /// called from within a tokio runtime.
    pub fn from_pool(pool: SqlitePool) -> Self {
        let (changes, _) = watch::channel(0u64);
        let (created, _) = watch::channel(false);
        Self {
            pool,
            runtime: Handle::current(),
            changes,
            created,
            allow_foreground: false,
        }
    }

    /// Lets mutations run on the foreground context. Tests only.
    pub fn allow_foreground_access(mut self) -> Self {
        self.allow_foreground = true;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Applies migrations, marks the store created, and wakes subscribers so
    /// they pick up the now readable table.
    pub async fn prepare(&self) -> AppResult<()> {
        self.assert_background("prepare");
        migrate::apply_migrations(&self.pool).await?;
        self.created.send_replace(true);
        self.notify_changed();
        info!(target: "alist", event = "store_created");
        Ok(())
    }

    pub fn is_created(&self) -> bool {
        *self.created.borrow()
    }

    /// Watches the created flag.
    pub fn created(&self) -> watch::Receiver<bool> {
        self.created.subscribe()
    }

    fn assert_background(&self, op: &str) {
        if !self.allow_foreground && executors::on_foreground() {
            panic!("cannot access the list store on the foreground context ({op})");
        }
    }

    fn notify_changed(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    pub async fn insert(&self, item: &ValidItem) -> Result<i64, StoreError> {
        self.assert_background("insert");
        let mut tx = db::begin(&self.pool).await?;
        let outcome = sqlx::query(
            "INSERT INTO list (name, description, category, status) VALUES (?, ?, ?, ?)",
        )
        .bind(item.name())
        .bind(item.description())
        .bind(item.category())
        .bind(item.status())
        .execute(&mut *tx)
        .await
        .map(|res| res.last_insert_rowid());
        let id = db::finish(tx, outcome)
            .await
            .map_err(|err| StoreError::from_write(err, item.name()))?;
        debug!(target: "alist", event = "item_inserted", id);
        self.notify_changed();
        Ok(id)
    }

    /// Rewrites the row with the item's id. Returns the number of rows changed.
    pub async fn update(&self, item: &ValidItem) -> Result<u64, StoreError> {
        self.assert_background("update");
        let mut tx = db::begin(&self.pool).await?;
        let outcome = sqlx::query(
            "UPDATE OR ABORT list SET name = ?, description = ?, category = ?, status = ? \
             WHERE _id = ?",
        )
        .bind(item.name())
        .bind(item.description())
        .bind(item.category())
        .bind(item.status())
        .bind(item.id())
        .execute(&mut *tx)
        .await
        .map(|res| res.rows_affected());
        let changed = db::finish(tx, outcome)
            .await
            .map_err(|err| StoreError::from_write(err, item.name()))?;
        debug!(target: "alist", event = "item_updated", id = item.id(), changed);
        if changed > 0 {
            self.notify_changed();
        }
        Ok(changed)
    }

    /// Deletes the rows carrying these ids. Ids that no longer exist are
    /// skipped and not counted.
    pub async fn delete(&self, items: &[Item]) -> Result<u64, StoreError> {
        self.assert_background("delete");
        let mut tx = db::begin(&self.pool).await?;
        let outcome = async {
            let mut removed = 0u64;
            for item in items {
                removed += sqlx::query("DELETE FROM list WHERE _id = ?")
                    .bind(item.id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            }
            Ok::<_, sqlx::Error>(removed)
        }
        .await;
        let removed = db::finish(tx, outcome).await?;
        debug!(target: "alist", event = "items_deleted", requested = items.len(), removed);
        if removed > 0 {
            self.notify_changed();
        }
        Ok(removed)
    }

    pub async fn select_all(&self) -> Result<Vec<Item>, StoreError> {
        self.query(&SelectQuery::all()).await
    }

    /// Runs a read statement once.
    pub async fn query(&self, query: &SelectQuery) -> Result<Vec<Item>, StoreError> {
        ensure_read_only(query)?;
        fetch_items(&self.pool, query).await.map_err(|err| {
            if is_read_only_violation(&err) {
                StoreError::ReadOnly {
                    sql: query.sql.clone(),
                }
            } else {
                StoreError::Database(err)
            }
        })
    }

    pub fn subscribe_all(&self) -> Subscription {
        // The select-all statement is always a read statement.
        self.spawn_subscription(SelectQuery::all())
    }

    /// Starts a push subscription. The first result set is delivered as soon
    /// as the query has run once; a replacement follows every committed write.
    pub fn subscribe(&self, query: SelectQuery) -> Result<Subscription, StoreError> {
        ensure_read_only(&query)?;
        Ok(self.spawn_subscription(query))
    }

    fn spawn_subscription(&self, query: SelectQuery) -> Subscription {
        let (rows_tx, rows_rx) = watch::channel::<Option<ItemSet>>(None);
        let mut changes = self.changes.subscribe();
        let pool = self.pool.clone();
        let task_query = query.clone();

        let task = self.runtime.spawn(async move {
            loop {
                changes.borrow_and_update();
                match fetch_items(&pool, &task_query).await {
                    Ok(items) => {
                        rows_tx.send_replace(Some(Arc::new(items)));
                    }
                    Err(err) => {
                        warn!(
                            target: "alist",
                            event = "subscription_query_failed",
                            error = %err,
                            sql = %task_query.sql
                        );
                    }
                }
                if changes.changed().await.is_err() {
                    break;
                }
            }
        });

        Subscription {
            query,
            rows: rows_rx,
            task,
        }
    }
}

fn ensure_read_only(query: &SelectQuery) -> Result<(), StoreError> {
    if READ_STATEMENT.is_match(&query.sql) && is_single_statement(&query.sql) {
        Ok(())
    } else {
        Err(StoreError::ReadOnly {
            sql: query.sql.clone(),
        })
    }
}

/// True when `sql` holds one statement, optionally followed by a `;` and
/// trailing whitespace or comments. Semicolons inside literals, quoted
/// identifiers and comments do not count.
fn is_single_statement(sql: &str) -> bool {
    let mut chars = sql.chars().peekable();
    let mut ended = false;
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' | '[' => {
                if ended {
                    return false;
                }
                let close = if c == '[' { ']' } else { c };
                loop {
                    match chars.next() {
                        None => return true,
                        // A doubled quote is an escaped quote.
                        Some(q) if q == close && close != ']' && chars.peek() == Some(&close) => {
                            chars.next();
                        }
                        Some(q) if q == close => break,
                        Some(_) => {}
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut last = '\0';
                for next in chars.by_ref() {
                    if last == '*' && next == '/' {
                        break;
                    }
                    last = next;
                }
            }
            ';' => {
                if ended {
                    return false;
                }
                ended = true;
            }
            c if c.is_whitespace() => {}
            _ => {
                if ended {
                    return false;
                }
            }
        }
    }
    true
}

/// SQLITE_READONLY, also raised for writes under `query_only`.
const SQLITE_READONLY: i32 = 8;

fn is_read_only_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| code & 0xff == SQLITE_READONLY),
        _ => false,
    }
}

/// Runs `query` on a connection switched to `query_only`, so SQLite itself
/// refuses any write the statement might carry.
async fn fetch_items(pool: &SqlitePool, query: &SelectQuery) -> Result<Vec<Item>, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    sqlx::query("PRAGMA query_only = ON;")
        .execute(&mut *conn)
        .await?;

    let mut statement = sqlx::query(&query.sql);
    for arg in &query.args {
        statement = statement.bind(arg.as_str());
    }
    let fetched = statement.fetch_all(&mut *conn).await;

    if let Err(err) = sqlx::query("PRAGMA query_only = OFF;")
        .execute(&mut *conn)
        .await
    {
        error!(target: "alist", event = "query_only_reset_failed", error = %err);
        return Err(err);
    }

    fetched?.iter().map(item_from_row).collect()
}

/// Reads a column by name; a column the statement did not select reads as
/// `None` instead of failing.
fn column<T>(row: &SqliteRow, field: Field) -> Result<Option<T>, sqlx::Error>
where
    T: for<'r> sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    match row.try_get::<Option<T>, _>(field.column()) {
        Ok(value) => Ok(value),
        Err(sqlx::Error::ColumnNotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

fn item_from_row(row: &SqliteRow) -> Result<Item, sqlx::Error> {
    Ok(Item {
        id: column::<i64>(row, Field::Id)?.unwrap_or_default(),
        name: column::<String>(row, Field::Name)?.unwrap_or_default(),
        description: column::<String>(row, Field::Description)?.unwrap_or_default(),
        category: column::<String>(row, Field::Category)?.unwrap_or_default(),
        status: column::<String>(row, Field::Status)?.unwrap_or_default(),
    })
}

/// A live query. Dropping it (or calling [`Subscription::unsubscribe`]) stops
/// the background task.
pub struct Subscription {
    query: SelectQuery,
    rows: watch::Receiver<Option<ItemSet>>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn query(&self) -> &SelectQuery {
        &self.query
    }

    /// The most recent result set, if the query has completed at least once.
    pub fn current(&self) -> Option<ItemSet> {
        self.rows.borrow().clone()
    }

    /// Waits for the next delivered result set.
    pub async fn next(&mut self) -> Option<ItemSet> {
        self.rows.changed().await.ok()?;
        self.rows.borrow_and_update().clone()
    }

    pub fn receiver(&self) -> watch::Receiver<Option<ItemSet>> {
        self.rows.clone()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
        debug!(target: "alist", event = "subscription_closed", table = TABLE_NAME);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChoiceLists;
    use crate::validate::{field_values, verify};

    fn valid(name: &str) -> ValidItem {
        verify(
            Some(&field_values(name, "", "To Do", "Current")),
            &ChoiceLists::default(),
        )
        .unwrap()
        .unwrap()
    }

    #[tokio::test]
    async fn rows_map_by_column_name_and_tolerate_missing_columns() {
        let store = ListStore::open_in_memory().await.unwrap();
        store.insert(&valid("Name 1")).await.unwrap();

        let partial = store
            .query(&SelectQuery::new("SELECT name FROM list", Vec::new()))
            .await
            .unwrap();
        assert_eq!(
            partial,
            vec![Item {
                id: 0,
                name: "Name 1".into(),
                ..Item::default()
            }]
        );
    }

    #[tokio::test]
    async fn write_statements_are_refused() {
        let store = ListStore::open_in_memory().await.unwrap();
        let err = store
            .query(&SelectQuery::new("DELETE FROM list", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ReadOnly { .. }));
        assert!(store
            .subscribe(SelectQuery::new("UPDATE list SET name = 'x'", Vec::new()))
            .is_err());
    }

    #[test]
    fn statement_scanner_counts_top_level_semicolons() {
        for sql in [
            "SELECT * FROM list",
            "SELECT * FROM list;",
            "SELECT * FROM list ;  \n",
            "SELECT * FROM list; -- trailing note",
            "SELECT * FROM list; /* a; b */",
            "SELECT * FROM list WHERE name = 'a;b'",
            "SELECT * FROM list WHERE name = 'it''s; fine'",
            "SELECT \"weird;col\" FROM list",
            "SELECT [a;b] FROM list",
            "SELECT * FROM list -- ; DELETE FROM list",
        ] {
            assert!(is_single_statement(sql), "{sql:?}");
        }
        for sql in [
            "SELECT * FROM list; DELETE FROM list",
            "SELECT * FROM list;DELETE FROM list;",
            "SELECT 1;;",
            "SELECT 'x'; SELECT 'y'",
            "SELECT * FROM list /* ; */; UPDATE list SET name = 'z'",
        ] {
            assert!(!is_single_statement(sql), "{sql:?}");
        }
    }

    #[tokio::test]
    async fn failed_read_leaves_the_connection_writable() {
        let store = ListStore::open_in_memory().await.unwrap();
        let err = store
            .query(&SelectQuery::new(
                "WITH x AS (SELECT 1) DELETE FROM list",
                Vec::new(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ReadOnly { .. }), "{err:?}");

        let id = store.insert(&valid("Name 1")).await.unwrap();
        assert!(id >= 1);
    }

    #[tokio::test]
    async fn unprepared_store_reports_not_created() {
        let pool = db::open_memory_pool().await.unwrap();
        let store = ListStore::from_pool(pool);
        assert!(!store.is_created());
        store.prepare().await.unwrap();
        assert!(store.is_created());
    }

    #[test]
    fn foreground_access_can_be_allowed_for_tests() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _foreground = executors::enter_foreground();
        let id = runtime.block_on(async {
            let pool = db::open_memory_pool().await.unwrap();
            let store = ListStore::from_pool(pool).allow_foreground_access();
            store.prepare().await.unwrap();
            let mut subscription = store.subscribe_all();
            let id = store.insert(&valid("Name 1")).await.unwrap();
            loop {
                match subscription.next().await {
                    Some(items) if !items.is_empty() => break,
                    Some(_) => continue,
                    None => panic!("subscription closed early"),
                }
            }
            id
        });
        assert!(id >= 1);
    }

    #[test]
    #[should_panic(expected = "foreground")]
    fn mutations_on_the_foreground_panic() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let store = runtime.block_on(async {
            let pool = db::open_memory_pool().await.unwrap();
            ListStore::from_pool(pool)
        });
        let _foreground = executors::enter_foreground();
        let _ = runtime.block_on(store.insert(&valid("Name 1")));
    }
}
