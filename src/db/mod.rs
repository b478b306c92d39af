pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Local cache: shard tracks, remembered matcher offsets, cache metadata.
pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // WAL so the CLI can read the cache while a reload is writing
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "database schema v{version} is newer than this build (v{SCHEMA_VERSION})"
            )));
        }
        if version < 1 {
            self.migrate_v1()?;
        }
        if version < 2 {
            self.migrate_v2()?;
        }

        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: shard track cache, matcher offsets, cache metadata
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS shard_tracks (
                db_id           TEXT PRIMARY KEY NOT NULL,
                id              TEXT NOT NULL,
                track_name      TEXT NOT NULL,
                artist          TEXT NOT NULL,
                google_id       TEXT NOT NULL,
                player_urls     TEXT NOT NULL,  -- JSON array
                album           TEXT,
                year            INTEGER,
                is_linear       INTEGER NOT NULL,
                database        TEXT
            );

            CREATE TABLE IF NOT EXISTS matcher_offsets (
                file_name       TEXT PRIMARY KEY NOT NULL,
                file_size       INTEGER NOT NULL,
                end_offset      INTEGER NOT NULL,
                located_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS cache_meta (
                key             TEXT PRIMARY KEY NOT NULL,
                value           TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// V2: offsets keyed by full path and checked against mtime and checksum.
    /// Old rows can't be validated, so they are dropped and rescanned.
    fn migrate_v2(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            DROP TABLE IF EXISTS matcher_offsets;

            CREATE TABLE matcher_offsets (
                file_path       TEXT PRIMARY KEY NOT NULL,
                file_size       INTEGER NOT NULL,
                file_mtime      INTEGER NOT NULL,
                checksum        INTEGER NOT NULL,
                end_offset      INTEGER NOT NULL,
                located_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(())
    }
}

const SCHEMA_VERSION: i32 = 2;
