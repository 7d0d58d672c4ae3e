use std::path::Path;

use anyhow::{Context, Result as AnyResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, Pool, Sqlite, Transaction};

/// Opens the on-disk list database, creating it and its parent directory when
/// missing.
pub async fn open_sqlite_pool(db_path: &Path) -> AnyResult<Pool<Sqlite>> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            tracing::error!(
                target: "alist",
                error = %e,
                event = "data_dir_create_failed",
                path = %parent.display()
            );
            e
        })?;
    }
    tracing::info!(target: "alist", event = "db_path", path = %db_path.display());

    let opts = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .log_statements(log::LevelFilter::Off);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA case_sensitive_like = ON;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        // A read cut short can hand a connection back with query_only still on.
        .before_acquire(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA query_only = OFF;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(true)
            })
        })
        .connect_with(opts)
        .await
        .with_context(|| format!("open sqlite database at {}", db_path.display()))?;

    log_effective_pragmas(&pool).await;

    Ok(pool)
}

/// A private in-memory database. One connection only, kept alive for the life
/// of the pool, since every new connection would see an empty database.
pub async fn open_memory_pool() -> AnyResult<Pool<Sqlite>> {
    let opts = SqliteConnectOptions::new()
        .in_memory(true)
        .log_statements(log::LevelFilter::Off);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA case_sensitive_like = ON;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        // A read cut short can hand a connection back with query_only still on.
        .before_acquire(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA query_only = OFF;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(true)
            })
        })
        .connect_with(opts)
        .await
        .context("open in-memory sqlite database")?;

    Ok(pool)
}

async fn log_effective_pragmas(pool: &Pool<Sqlite>) {
    use tracing::{info, warn};

    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let sync: (i64,) = sqlx::query_as("PRAGMA synchronous;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    let busy: (i64,) = sqlx::query_as("PRAGMA busy_timeout;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "alist",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0,
        synchronous = %sync.0,
        busy_timeout_ms = %busy.0
    );

    if !jm.0.eq_ignore_ascii_case("wal") {
        warn!(
            target: "alist",
            event = "db_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}

pub async fn begin(pool: &Pool<Sqlite>) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
    let tx = pool.begin().await?;
    tracing::debug!(target: "alist", event = "db_tx_begin");
    Ok(tx)
}

/// Commits on success, rolls back on error.
pub async fn finish<R>(
    tx: Transaction<'static, Sqlite>,
    outcome: Result<R, sqlx::Error>,
) -> Result<R, sqlx::Error> {
    use tracing::{debug, error, warn};

    match outcome {
        Ok(val) => {
            tx.commit().await?;
            debug!(target: "alist", event = "db_tx_commit");
            Ok(val)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                error!(target: "alist", event = "db_tx_rollback_failed", error = %rb);
            } else {
                warn!(target: "alist", event = "db_tx_rollback", error = %e);
            }
            Err(e)
        }
    }
}
