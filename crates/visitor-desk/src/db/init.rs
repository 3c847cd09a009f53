//! Database initialization.
//!
//! Opens the SQLite pool and creates the schema idempotently, so a fresh file and an
//! existing database go through the same start-up path.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::DatabaseConfig;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Connect to the configured database and create tables if needed.
pub async fn init_database(config: &DatabaseConfig) -> Result<SqlitePool, sqlx::Error> {
    let in_memory = is_in_memory(&config.url);
    let mut options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    // Every in-memory connection is its own database.
    let max_connections = if in_memory { 1 } else { config.max_connections };
    let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
    if in_memory {
        // Dropping the only connection drops the database with it.
        pool_options = pool_options.idle_timeout(None).max_lifetime(None);
    }
    let pool = pool_options.connect_with(options).await?;

    create_schema(&pool).await?;
    info!(url = %config.url, max_connections, "database ready");
    Ok(pool)
}

pub async fn create_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS organizations (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        name_key TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        name_key TEXT NOT NULL UNIQUE,
        organization_id TEXT REFERENCES organizations(id),
        starts_on TEXT NOT NULL,
        ends_on TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS visitors (
        id TEXT PRIMARY KEY,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        email TEXT NOT NULL,
        email_key TEXT NOT NULL UNIQUE,
        phone TEXT,
        organization_id TEXT REFERENCES organizations(id),
        profile_id TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS event_visitors (
        visitor_id TEXT NOT NULL REFERENCES visitors(id),
        event_id TEXT NOT NULL REFERENCES events(id),
        rsvp_status TEXT NOT NULL DEFAULT 'invited'
            CHECK (rsvp_status IN ('invited', 'confirmed', 'declined', 'attended', 'cancelled')),
        PRIMARY KEY (visitor_id, event_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS document_types (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        requires_confirmation INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        document_type_id TEXT NOT NULL REFERENCES document_types(id),
        title TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS document_events (
        document_id TEXT NOT NULL REFERENCES documents(id),
        event_id TEXT NOT NULL REFERENCES events(id),
        PRIMARY KEY (document_id, event_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS document_versions (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL REFERENCES documents(id),
        version_number INTEGER NOT NULL,
        file_path TEXT NOT NULL,
        is_current INTEGER NOT NULL DEFAULT 0,
        uploaded_at TEXT NOT NULL,
        UNIQUE (document_id, version_number)
    )
    "#,
    // At most one current version per document, enforced by the database itself.
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_document_versions_current
        ON document_versions(document_id) WHERE is_current = 1
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS visitor_confirmations (
        id TEXT PRIMARY KEY,
        visitor_id TEXT NOT NULL REFERENCES visitors(id),
        event_id TEXT NOT NULL REFERENCES events(id),
        document_id TEXT NOT NULL REFERENCES documents(id),
        document_version_id TEXT NOT NULL REFERENCES document_versions(id),
        confirmed_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_visitor_confirmations_lookup
        ON visitor_confirmations(visitor_id, event_id)
    "#,
];
