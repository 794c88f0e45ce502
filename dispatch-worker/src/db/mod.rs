//! SQLite storage: pool setup and schema.
//!
//! The dispatch loop keeps no state in memory between passes; everything it
//! needs to resume after a restart lives in these tables.

pub mod queries;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

pub use queries::*;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS campaigns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    sender_name TEXT NOT NULL,
    sender_email TEXT NOT NULL,
    reply_to TEXT,
    subjects_raw TEXT NOT NULL DEFAULT '',
    body_plain TEXT NOT NULL DEFAULT '',
    body_html TEXT NOT NULL DEFAULT '',
    pdf_html_template TEXT NOT NULL DEFAULT '',
    min_delay INTEGER NOT NULL DEFAULT 1,
    max_delay INTEGER NOT NULL DEFAULT 5,
    status TEXT NOT NULL DEFAULT 'queued',
    created_at TEXT NOT NULL,
    hourly_limit INTEGER NOT NULL DEFAULT 100,
    daily_limit INTEGER NOT NULL DEFAULT 1000,
    minute_limit INTEGER NOT NULL DEFAULT 10,
    backend TEXT NOT NULL DEFAULT 'direct',
    smtp_host TEXT,
    smtp_port INTEGER NOT NULL DEFAULT 587,
    smtp_user TEXT,
    smtp_pass TEXT,
    use_starttls INTEGER NOT NULL DEFAULT 1,
    attach_pdf INTEGER NOT NULL DEFAULT 0,
    manual_attachment_path TEXT,
    uploaded_attachment_path TEXT,
    schedule_type TEXT NOT NULL DEFAULT 'now',
    schedule_time TEXT,
    next_send_time TEXT
);

CREATE TABLE IF NOT EXISTS recipients (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id INTEGER NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
    email TEXT NOT NULL,
    sent INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_recipients_campaign_sent ON recipients(campaign_id, sent);

CREATE TABLE IF NOT EXISTS send_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id INTEGER NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
    recipient TEXT NOT NULL,
    subject TEXT NOT NULL DEFAULT '',
    attachment_name TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    message TEXT NOT NULL DEFAULT '',
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_send_logs_campaign_ts ON send_logs(campaign_id, timestamp);
"#;

/// Open (or create) the database at `url` and apply the schema.
pub async fn connect(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    info!(url = %url, "database_opened");
    Ok(pool)
}

/// Single-connection in-memory database with the schema applied.
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    // The database lives only as long as its one connection.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

/// Create tables and indexes if missing.
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}
