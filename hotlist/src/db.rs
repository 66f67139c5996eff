use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context};
use model::{ContentKind, FingerprintBatch};
use rusqlite::{params, Connection};

/// SQLite variable limit headroom for `IN (...)` lookups.
const LOOKUP_CHUNK: usize = 512;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS "tracks" (
        `file` TEXT NOT NULL UNIQUE,
        `class` INTEGER NOT NULL,
        `fingers_count` INTEGER NOT NULL,
        `length` REAL NOT NULL,
        `id` INTEGER PRIMARY KEY AUTOINCREMENT
    );
    CREATE TABLE IF NOT EXISTS "fingers" (
        `track_id` INTEGER NOT NULL,
        `dt` INTEGER NOT NULL,
        `finger` INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS finger_index ON fingers(finger);
"#;

/// One reference track of the hotlist.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub id: i64,
    pub file: String,
    pub kind: ContentKind,
    pub fingers_count: usize,
    /// Track duration in seconds.
    pub length: f64,
}

/// One stored fingerprint matching a queried hash.
#[derive(Debug, Clone, Copy)]
pub struct FingerRow {
    pub track_id: i64,
    pub dt: u32,
    pub hash: u32,
}

/// The reference fingerprint store. Read-mostly: queries are served from an
/// in-memory mirror loaded at open time, writes go to the backing SQLite
/// file first and refresh the mirror.
pub struct HotlistDb {
    conn: Connection,
    mirror: Option<Mirror>,
}

#[derive(Default)]
struct Mirror {
    index: HashMap<u32, Vec<(i64, u32)>>,
    tracks: HashMap<i64, TrackInfo>,
}

impl HotlistDb {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        log::info!("open db {}", path.as_ref().display());
        let conn = Connection::open(path).context("opening hotlist database")?;
        Self::prepare(conn, true)
    }

    /// Mirror-less variant; every lookup goes to SQLite.
    pub fn open_unmirrored<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("opening hotlist database")?;
        Self::prepare(conn, false)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::prepare(Connection::open_in_memory()?, true)
    }

    fn prepare(conn: Connection, mirrored: bool) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA).context("creating schema")?;
        let mut db = Self { conn, mirror: None };
        if mirrored {
            db.reload_mirror()?;
        }
        Ok(db)
    }

    /// Rebuilds the in-memory copy from the backing store.
    pub fn reload_mirror(&mut self) -> anyhow::Result<()> {
        let mut mirror = Mirror::default();

        let mut stmt = self
            .conn
            .prepare("SELECT id, file, class, fingers_count, length FROM tracks")?;
        let tracks = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, f64>(4)?,
            ))
        })?;
        for track in tracks {
            let (id, file, class, fingers_count, length) = track?;
            let kind = ContentKind::from_index(class as usize)
                .ok_or_else(|| anyhow!("bad class {class} for track {file}"))?;
            mirror.tracks.insert(
                id,
                TrackInfo {
                    id,
                    file,
                    kind,
                    fingers_count: fingers_count as usize,
                    length,
                },
            );
        }
        drop(stmt);

        let mut stmt = self
            .conn
            .prepare("SELECT track_id, dt, finger FROM fingers")?;
        let fingers = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        for finger in fingers {
            let (track_id, dt, hash) = finger?;
            mirror
                .index
                .entry(hash as u32)
                .or_default()
                .push((track_id, dt as u32));
        }
        drop(stmt);

        log::info!(
            "hotlist mirror: {} tracks, {} distinct hashes",
            mirror.tracks.len(),
            mirror.index.len()
        );
        self.mirror = Some(mirror);
        Ok(())
    }

    #[must_use]
    pub fn track(&self, id: i64) -> Option<TrackInfo> {
        if let Some(mirror) = &self.mirror {
            return mirror.tracks.get(&id).cloned();
        }
        self.conn
            .query_row(
                "SELECT id, file, class, fingers_count, length FROM tracks WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, f64>(4)?,
                    ))
                },
            )
            .ok()
            .and_then(|(id, file, class, fingers_count, length)| {
                Some(TrackInfo {
                    id,
                    file,
                    kind: ContentKind::from_index(class as usize)?,
                    fingers_count: fingers_count as usize,
                    length,
                })
            })
    }

    /// All stored fingerprints whose hash equals any of the queried hashes.
    /// One query per chunk of hashes, never one per fingerprint.
    pub fn batched_lookup(&self, hashes: &[u32]) -> anyhow::Result<Vec<FingerRow>> {
        if let Some(mirror) = &self.mirror {
            let mut rows = Vec::new();
            for &hash in hashes {
                if let Some(entries) = mirror.index.get(&hash) {
                    rows.extend(
                        entries
                            .iter()
                            .map(|&(track_id, dt)| FingerRow { track_id, dt, hash }),
                    );
                }
            }
            return Ok(rows);
        }

        let mut rows = Vec::new();
        for chunk in hashes.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let query = format!(
                "SELECT track_id, dt, finger FROM fingers WHERE finger IN ({placeholders})"
            );
            let mut stmt = self.conn.prepare(&query)?;
            let params = rusqlite::params_from_iter(chunk.iter().map(|&h| i64::from(h)));
            let found = stmt.query_map(params, |row| {
                Ok(FingerRow {
                    track_id: row.get(0)?,
                    dt: row.get::<_, i64>(1)? as u32,
                    hash: row.get::<_, i64>(2)? as u32,
                })
            })?;
            for row in found {
                rows.push(row?);
            }
        }
        Ok(rows)
    }

    /// Inserts a curated reference track with its fingerprints.
    pub fn insert_track(
        &mut self,
        file: &str,
        kind: ContentKind,
        length: f64,
        fingerprints: &FingerprintBatch,
    ) -> anyhow::Result<i64> {
        log::info!("insert track {file} ({:#}) in DB", kind);
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO tracks (file, class, fingers_count, length) VALUES (?1, ?2, ?3, ?4)",
            params![file, kind.index() as i64, fingerprints.len() as i64, length],
        )?;
        let id = tx.last_insert_rowid();
        {
            let mut stmt =
                tx.prepare("INSERT INTO fingers (dt, finger, track_id) VALUES (?1, ?2, ?3)")?;
            for fingerprint in fingerprints.iter() {
                stmt.execute(params![
                    i64::from(fingerprint.dt),
                    i64::from(fingerprint.hash),
                    id
                ])?;
            }
        }
        tx.commit()?;

        if self.mirror.is_some() {
            self.reload_mirror()?;
        }
        Ok(id)
    }

    pub fn delete_track(&mut self, file: &str) -> anyhow::Result<()> {
        log::info!("remove track {file} from DB");
        let id: i64 = self
            .conn
            .query_row("SELECT id FROM tracks WHERE file = ?1", params![file], |row| {
                row.get(0)
            })
            .with_context(|| format!("track {file} not found"))?;

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM fingers WHERE track_id = ?1", params![id])?;
        tx.execute("DELETE FROM tracks WHERE id = ?1", params![id])?;
        tx.commit()?;

        if self.mirror.is_some() {
            self.reload_mirror()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::Fingerprint;

    fn batch(pairs: &[(u32, u32)]) -> FingerprintBatch {
        pairs
            .iter()
            .map(|&(dt, hash)| Fingerprint { dt, hash })
            .collect()
    }

    #[test]
    fn insert_lookup_delete_roundtrip() {
        let mut db = HotlistDb::open_in_memory().unwrap();
        let id = db
            .insert_track(
                "jingle.mp3",
                ContentKind::Jingle,
                4.2,
                &batch(&[(0, 111), (1, 222), (2, 333)]),
            )
            .unwrap();

        let track = db.track(id).unwrap();
        assert_eq!(track.file, "jingle.mp3");
        assert_eq!(track.fingers_count, 3);

        let rows = db.batched_lookup(&[222, 999]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].dt, 1);

        db.delete_track("jingle.mp3").unwrap();
        assert!(db.batched_lookup(&[222]).unwrap().is_empty());
        assert!(db.track(id).is_none());
    }

    #[test]
    fn sql_path_matches_mirror_path() {
        let mut db = HotlistDb::open_in_memory().unwrap();
        db.insert_track(
            "ad.mp3",
            ContentKind::Advertisement,
            30.0,
            &batch(&[(0, 10), (5, 20), (9, 30)]),
        )
        .unwrap();

        let mirrored = db.batched_lookup(&[10, 20, 30]).unwrap();
        db.mirror = None;
        let direct = db.batched_lookup(&[10, 20, 30]).unwrap();
        assert_eq!(mirrored.len(), direct.len());
    }
}
