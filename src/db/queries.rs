use super::models::{CacheStats, KnownOffset};
use super::{Database, Result};
use crate::shard::ShardTrack;
use rusqlite::{OptionalExtension, params};

const META_POPULATED_AT: &str = "shard_cache_populated_at";
const META_FINGERPRINT: &str = "shard_cache_fingerprint";

impl Database {
    /// Replace every cached shard track with `rows` in one transaction.
    ///
    /// Readers see either the old set or the new one, never an empty table
    /// in between. Rows with a repeated `db_id` replace earlier ones.
    pub fn replace_shard_tracks(&self, rows: &[ShardTrack], fingerprint: Option<&str>) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute("DELETE FROM shard_tracks", [])?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO shard_tracks (
                    db_id, id, track_name, artist, google_id,
                    player_urls, album, year, is_linear, database
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for t in rows {
                let players = serde_json::to_string(&t.player_urls)?;
                stmt.execute(params![
                    t.db_id, t.id, t.track_name, t.artist, t.google_id,
                    players, t.album, t.year, t.is_linear, t.database,
                ])?;
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        upsert_meta(&tx, META_POPULATED_AT, &now)?;
        match fingerprint {
            Some(f) => upsert_meta(&tx, META_FINGERPRINT, f)?,
            None => {
                tx.execute("DELETE FROM cache_meta WHERE key = ?1", params![META_FINGERPRINT])?;
            }
        }

        tx.commit()?;
        log::debug!("Cached {} shard tracks", rows.len());
        Ok(())
    }

    /// Every cached shard track, in insertion order.
    pub fn get_all_shard_tracks(&self) -> Result<Vec<ShardTrack>> {
        let mut stmt = self.conn.prepare(
            "SELECT db_id, id, track_name, artist, google_id,
                    player_urls, album, year, is_linear, database
             FROM shard_tracks ORDER BY rowid",
        )?;

        let tracks = stmt
            .query_map([], |row| {
                let players: String = row.get(5)?;
                let player_urls: Vec<String> = serde_json::from_str(&players).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
                })?;
                Ok(ShardTrack {
                    db_id: row.get(0)?,
                    id: row.get(1)?,
                    track_name: row.get(2)?,
                    artist: row.get(3)?,
                    google_id: row.get(4)?,
                    player_urls,
                    album: row.get(6)?,
                    year: row.get(7)?,
                    is_linear: row.get(8)?,
                    database: row.get(9)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(tracks)
    }

    /// Drop all cached shard tracks and forget that the cache was populated.
    pub fn clear_shard_tracks(&self) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM shard_tracks", [])?;
        tx.execute(
            "DELETE FROM cache_meta WHERE key IN (?1, ?2)",
            params![META_POPULATED_AT, META_FINGERPRINT],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Whether the shard cache has been populated since it was last cleared.
    /// An empty populate still counts.
    pub fn shard_cache_exists(&self) -> Result<bool> {
        Ok(self.get_meta(META_POPULATED_AT)?.is_some())
    }

    /// Fingerprint of the shard file set the cache was built from.
    pub fn shard_cache_fingerprint(&self) -> Result<Option<String>> {
        self.get_meta(META_FINGERPRINT)
    }

    pub fn get_known_offsets(&self) -> Result<Vec<KnownOffset>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT file_path, file_size, file_mtime, checksum, end_offset
                 FROM matcher_offsets",
            )?;
        let offsets = stmt
            .query_map([], |row| {
                Ok(KnownOffset {
                    file_path: row.get(0)?,
                    file_size: row.get::<_, i64>(1)? as u64,
                    file_mtime: row.get(2)?,
                    checksum: row.get(3)?,
                    end_offset: row.get::<_, i64>(4)? as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(offsets)
    }

    /// Remember offsets found by a scan, replacing older entries for the same files.
    pub fn store_known_offsets(&self, offsets: &[KnownOffset]) -> Result<()> {
        if offsets.is_empty() {
            return Ok(());
        }
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO matcher_offsets
                    (file_path, file_size, file_mtime, checksum, end_offset, located_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
                 ON CONFLICT(file_path) DO UPDATE SET
                    file_size = excluded.file_size,
                    file_mtime = excluded.file_mtime,
                    checksum = excluded.checksum,
                    end_offset = excluded.end_offset,
                    located_at = excluded.located_at",
            )?;
            for o in offsets {
                stmt.execute(params![
                    o.file_path,
                    o.file_size as i64,
                    o.file_mtime,
                    o.checksum,
                    o.end_offset as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn clear_known_offsets(&self) -> Result<()> {
        self.conn.execute("DELETE FROM matcher_offsets", [])?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM cache_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        upsert_meta(&self.conn, key, value)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let (shard_tracks, linear_tracks, artists) = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(is_linear), 0),
                    COUNT(DISTINCT lower(trim(artist)))
             FROM shard_tracks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let known_offsets =
            self.conn
                .query_row("SELECT COUNT(*) FROM matcher_offsets", [], |row| row.get(0))?;

        Ok(CacheStats {
            shard_tracks,
            linear_tracks,
            artists,
            known_offsets,
            populated_at: self.get_meta(META_POPULATED_AT)?,
        })
    }
}

fn upsert_meta(conn: &rusqlite::Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO cache_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::shard_track;

    fn rich_track() -> ShardTrack {
        ShardTrack {
            player_urls: vec!["https://p/1".into(), "https://p/2".into()],
            album: Some("Homogenic".into()),
            year: Some(1997),
            is_linear: true,
            database: Some("core".into()),
            ..shard_track("b", "Joga", "Björk")
        }
    }

    #[test]
    fn test_replace_then_get_all() {
        let db = Database::open_in_memory().unwrap();
        db.replace_shard_tracks(&[shard_track("a", "Hyperballad", "Björk")], None)
            .unwrap();

        let rows = db.get_all_shard_tracks().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].db_id, "a");
    }

    #[test]
    fn test_replace_with_empty_clears_old_rows() {
        let db = Database::open_in_memory().unwrap();
        db.replace_shard_tracks(&[shard_track("a", "Hyperballad", "Björk")], None)
            .unwrap();
        db.replace_shard_tracks(&[], None).unwrap();

        assert!(db.get_all_shard_tracks().unwrap().is_empty());
        assert!(db.shard_cache_exists().unwrap());
    }

    #[test]
    fn test_replace_is_not_a_union() {
        let db = Database::open_in_memory().unwrap();
        db.replace_shard_tracks(&[shard_track("a", "One", "X")], None).unwrap();
        db.replace_shard_tracks(&[shard_track("b", "Two", "Y")], None).unwrap();

        let ids: Vec<String> = db
            .get_all_shard_tracks()
            .unwrap()
            .into_iter()
            .map(|t| t.db_id)
            .collect();
        assert_eq!(ids, vec!["b".to_string()]);
    }

    #[test]
    fn test_all_fields_survive_storage() {
        let db = Database::open_in_memory().unwrap();
        let rows = vec![shard_track("a", "Hyperballad", "Björk"), rich_track()];
        db.replace_shard_tracks(&rows, None).unwrap();
        assert_eq!(db.get_all_shard_tracks().unwrap(), rows);
    }

    #[test]
    fn test_duplicate_db_id_last_wins() {
        let db = Database::open_in_memory().unwrap();
        let first = shard_track("a", "Old", "X");
        let second = shard_track("a", "New", "X");
        db.replace_shard_tracks(&[first, second.clone()], None).unwrap();
        assert_eq!(db.get_all_shard_tracks().unwrap(), vec![second]);
    }

    #[test]
    fn test_exists_and_clear() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.shard_cache_exists().unwrap());

        db.replace_shard_tracks(&[rich_track()], Some("fp-1")).unwrap();
        assert!(db.shard_cache_exists().unwrap());
        assert_eq!(db.shard_cache_fingerprint().unwrap().as_deref(), Some("fp-1"));

        db.clear_shard_tracks().unwrap();
        assert!(!db.shard_cache_exists().unwrap());
        assert!(db.shard_cache_fingerprint().unwrap().is_none());
        assert!(db.get_all_shard_tracks().unwrap().is_empty());
    }

    fn ids(rows: Vec<ShardTrack>) -> Vec<String> {
        rows.into_iter().map(|t| t.db_id).collect()
    }

    #[test]
    fn test_failed_replace_keeps_old_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("cache.db")).unwrap();
        db.replace_shard_tracks(&[shard_track("a", "One", "X"), shard_track("b", "Two", "Y")], Some("old"))
            .unwrap();
        db.conn
            .execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON shard_tracks
                 WHEN NEW.db_id = 'bad'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let result = db.replace_shard_tracks(
            &[shard_track("c", "Three", "Z"), shard_track("bad", "Four", "W")],
            Some("new"),
        );
        assert!(result.is_err());
        assert_eq!(ids(db.get_all_shard_tracks().unwrap()), vec!["a", "b"]);
        assert_eq!(db.shard_cache_fingerprint().unwrap().as_deref(), Some("old"));
    }

    #[test]
    fn test_reader_never_sees_partial_replace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let db = Database::open(&path).unwrap();
        db.replace_shard_tracks(&[shard_track("a", "One", "X"), shard_track("b", "Two", "Y")], None)
            .unwrap();

        let reader = Database { conn: rusqlite::Connection::open(&path).unwrap() };
        reader.conn.execute_batch("BEGIN").unwrap();
        assert_eq!(ids(reader.get_all_shard_tracks().unwrap()), vec!["a", "b"]);

        db.replace_shard_tracks(
            &[shard_track("c", "Three", "Z"), shard_track("d", "Four", "W"), shard_track("e", "Five", "V")],
            None,
        )
        .unwrap();

        // the open read transaction keeps its snapshot: old rows, never empty
        assert_eq!(ids(reader.get_all_shard_tracks().unwrap()), vec!["a", "b"]);
        reader.conn.execute_batch("COMMIT").unwrap();
        assert_eq!(ids(reader.get_all_shard_tracks().unwrap()), vec!["c", "d", "e"]);
    }

    #[test]
    fn test_known_offsets_upsert() {
        let db = Database::open_in_memory().unwrap();
        let first = KnownOffset {
            file_path: "/system/product/etc/ambient/matcher_tah.leveldb".into(),
            file_size: 5_000_000,
            file_mtime: 1_700_000_000_000_000_000,
            checksum: 0xdead_beef,
            end_offset: 2_023_152,
        };
        db.store_known_offsets(&[first.clone()]).unwrap();
        assert_eq!(db.get_known_offsets().unwrap(), vec![first.clone()]);

        let updated = KnownOffset {
            file_size: 6_000_000,
            file_mtime: 1_700_000_100_000_000_000,
            checksum: 7,
            end_offset: 3_000_000,
            ..first.clone()
        };
        db.store_known_offsets(&[updated.clone()]).unwrap();
        assert_eq!(db.get_known_offsets().unwrap(), vec![updated]);

        db.clear_known_offsets().unwrap();
        assert!(db.get_known_offsets().unwrap().is_empty());
    }

    #[test]
    fn test_stats() {
        let db = Database::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.shard_tracks, 0);
        assert!(stats.populated_at.is_none());

        db.replace_shard_tracks(
            &[shard_track("a", "Hyperballad", "Björk"), rich_track(), shard_track("c", "Army of Me", "björk ")],
            None,
        )
        .unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.shard_tracks, 3);
        assert_eq!(stats.linear_tracks, 1);
        assert!(stats.populated_at.is_some());
    }
}
