/// SQLite persistence — cameras, per-segment scores, detections, the alert
/// suppression ledger, notification recipients, and the shared round-robin
/// counter used by cooperating detection processes.
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::segmenter::Segment;

/// Row from the `cameras` table.
#[derive(Debug, Clone)]
pub struct CameraRow {
    pub name: String,
    pub url: String,
    pub camera_type: Option<String>,
}

/// Aggregated history for one exact bounding box.
#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
    pub samples: i64,
    pub avg_score: f64,
    pub max_score: f64,
}

/// Detection row returned by the `recent` CLI subcommand.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionRow {
    pub id: i64,
    pub camera_id: String,
    pub timestamp: i64,
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
    pub score: f64,
    pub image_id: Option<String>,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cameras (
                name         TEXT PRIMARY KEY,
                url          TEXT    NOT NULL,
                camera_type  TEXT,
                active       INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS scores (
                camera_id       TEXT    NOT NULL,
                timestamp       INTEGER NOT NULL,
                min_x           INTEGER NOT NULL,
                min_y           INTEGER NOT NULL,
                max_x           INTEGER NOT NULL,
                max_y           INTEGER NOT NULL,
                score           REAL    NOT NULL,
                minus_minutes   INTEGER NOT NULL,
                seconds_in_day  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS detections (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                camera_id     TEXT    NOT NULL,
                timestamp     INTEGER NOT NULL,
                min_x         INTEGER NOT NULL,
                min_y         INTEGER NOT NULL,
                max_x         INTEGER NOT NULL,
                max_y         INTEGER NOT NULL,
                score         REAL    NOT NULL,
                hist_avg      REAL,
                hist_max      REAL,
                hist_samples  INTEGER,
                image_id      TEXT
            );

            CREATE TABLE IF NOT EXISTS alerts (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                camera_id  TEXT    NOT NULL,
                timestamp  INTEGER NOT NULL,
                image_id   TEXT
            );

            CREATE TABLE IF NOT EXISTS notifications (
                name          TEXT,
                email         TEXT,
                phone         TEXT,
                active_email  INTEGER NOT NULL DEFAULT 0,
                active_phone  INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS counters (
                name   TEXT PRIMARY KEY,
                value  INTEGER NOT NULL
            );
            INSERT OR IGNORE INTO counters (name, value) VALUES ('sources', 0);

            CREATE INDEX IF NOT EXISTS idx_scores_cam_ts ON scores (camera_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_alerts_cam_ts ON alerts (camera_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_det_ts        ON detections (timestamp);
        ",
        )?;
        Ok(())
    }

    /// Active cameras, ordered by name; stable across a run.
    pub fn get_active_cameras(&self, restrict_type: Option<&str>) -> Result<Vec<CameraRow>> {
        let sql = match restrict_type {
            Some(_) => {
                "SELECT name, url, camera_type FROM cameras
                 WHERE active = 1 AND camera_type = ?1 ORDER BY name"
            }
            None => "SELECT name, url, camera_type FROM cameras WHERE active = 1 ORDER BY name",
        };
        let mut stmt = self.conn.prepare(sql)?;
        let map = |row: &rusqlite::Row<'_>| {
            Ok(CameraRow {
                name: row.get(0)?,
                url: row.get(1)?,
                camera_type: row.get(2)?,
            })
        };
        let rows = if let Some(t) = restrict_type {
            stmt.query_map(params![t], map)?
        } else {
            stmt.query_map([], map)?
        };
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn insert_camera(&self, name: &str, url: &str, camera_type: Option<&str>) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO cameras (name, url, camera_type, active)
             VALUES (?1, ?2, ?3, 1)",
            params![name, url, camera_type],
        )?;
        Ok(())
    }

    /// Shared monotonically increasing counter for round-robin camera
    /// selection. Lives in the DB so multiple cooperating processes divide
    /// the camera list between them. Returns the pre-increment value.
    pub fn next_sources_counter(&self) -> Result<i64> {
        let value: i64 = self.conn.query_row(
            "UPDATE counters SET value = value + 1 WHERE name = 'sources'
             RETURNING value - 1",
            [],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    /// Record the score for every classified segment, detection or not.
    /// These rows feed the historical post-filter.
    pub fn insert_scores(
        &mut self,
        camera_id: &str,
        timestamp: i64,
        seconds_in_day: i64,
        minus_minutes: u32,
        segments: &[Segment],
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO scores
                 (camera_id, timestamp, min_x, min_y, max_x, max_y,
                  score, minus_minutes, seconds_in_day)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for seg in segments {
                stmt.execute(params![
                    camera_id,
                    timestamp,
                    seg.min_x,
                    seg.min_y,
                    seg.max_x,
                    seg.max_y,
                    seg.score,
                    minus_minutes,
                    seconds_in_day,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Per-box score history for the same camera, restricted to 3.5 days to
    /// 12 hours ago and the same time-of-day window (caller supplies bounds).
    pub fn history_for(
        &self,
        camera_id: &str,
        ts_after: i64,
        ts_before: i64,
        sid_after: i64,
        sid_before: i64,
    ) -> Result<Vec<HistoryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT min_x, min_y, max_x, max_y,
                    count(*), avg(score), max(score)
             FROM scores
             WHERE camera_id = ?1 AND timestamp > ?2 AND timestamp < ?3
               AND seconds_in_day > ?4 AND seconds_in_day < ?5
             GROUP BY min_x, min_y, max_x, max_y",
        )?;
        let rows = stmt.query_map(
            params![camera_id, ts_after, ts_before, sid_after, sid_before],
            |row| {
                Ok(HistoryRow {
                    min_x: row.get(0)?,
                    min_y: row.get(1)?,
                    max_x: row.get(2)?,
                    max_y: row.get(3)?,
                    samples: row.get(4)?,
                    avg_score: row.get(5)?,
                    max_score: row.get(6)?,
                })
            },
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn insert_detection(
        &self,
        camera_id: &str,
        timestamp: i64,
        segment: &Segment,
        image_id: Option<&str>,
    ) -> Result<i64> {
        let hist = segment.hist.as_ref();
        self.conn.execute(
            "INSERT INTO detections
             (camera_id, timestamp, min_x, min_y, max_x, max_y, score,
              hist_avg, hist_max, hist_samples, image_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                camera_id,
                timestamp,
                segment.min_x,
                segment.min_y,
                segment.max_x,
                segment.max_y,
                segment.score,
                hist.map(|h| h.avg),
                hist.map(|h| h.max),
                hist.map(|h| h.samples),
                image_id,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Any alert for this camera newer than `since_ts`?
    pub fn recent_alert_exists(&self, camera_id: &str, since_ts: i64) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM alerts WHERE camera_id = ?1 AND timestamp > ?2 LIMIT 1",
                params![camera_id, since_ts],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn insert_alert(
        &self,
        camera_id: &str,
        timestamp: i64,
        image_id: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO alerts (camera_id, timestamp, image_id) VALUES (?1, ?2, ?3)",
            params![camera_id, timestamp, image_id],
        )?;
        Ok(())
    }

    pub fn notification_emails(&self) -> Result<Vec<String>> {
        self.notification_column("email", "active_email")
    }

    pub fn notification_phones(&self) -> Result<Vec<String>> {
        self.notification_column("phone", "active_phone")
    }

    fn notification_column(&self, column: &str, active_flag: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT {column} FROM notifications WHERE {active_flag} = 1 AND {column} IS NOT NULL"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn recent_detections(
        &self,
        camera_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DetectionRow>> {
        let sql = match camera_id {
            Some(_) => {
                "SELECT id, camera_id, timestamp, min_x, min_y, max_x, max_y, score, image_id
                 FROM detections WHERE camera_id = ?1 ORDER BY timestamp DESC LIMIT ?2"
            }
            None => {
                "SELECT id, camera_id, timestamp, min_x, min_y, max_x, max_y, score, image_id
                 FROM detections ORDER BY timestamp DESC LIMIT ?1"
            }
        };
        let mut stmt = self.conn.prepare(sql)?;
        let map = |row: &rusqlite::Row<'_>| {
            Ok(DetectionRow {
                id: row.get(0)?,
                camera_id: row.get(1)?,
                timestamp: row.get(2)?,
                min_x: row.get(3)?,
                min_y: row.get(4)?,
                max_x: row.get(5)?,
                max_y: row.get(6)?,
                score: row.get(7)?,
                image_id: row.get(8)?,
            })
        };
        let rows = if let Some(cam) = camera_id {
            stmt.query_map(params![cam, limit], map)?
        } else {
            stmt.query_map(params![limit], map)?
        };
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmenter::Segment;

    fn seg(min_x: i32, score: f64) -> Segment {
        Segment {
            min_x,
            min_y: 0,
            max_x: min_x + 100,
            max_y: 100,
            score,
            hist: None,
        }
    }

    #[test]
    fn sources_counter_is_monotonic() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.next_sources_counter().unwrap(), 0);
        assert_eq!(db.next_sources_counter().unwrap(), 1);
        assert_eq!(db.next_sources_counter().unwrap(), 2);
    }

    #[test]
    fn active_cameras_respect_type_filter() {
        let db = Database::open_in_memory().unwrap();
        db.insert_camera("ridge-n", "http://a/image.jpg", Some("hpwren"))
            .unwrap();
        db.insert_camera("valley-s", "http://b/image.jpg", Some("other"))
            .unwrap();

        assert_eq!(db.get_active_cameras(None).unwrap().len(), 2);
        let filtered = db.get_active_cameras(Some("hpwren")).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "ridge-n");
    }

    #[test]
    fn history_groups_by_exact_box() {
        let mut db = Database::open_in_memory().unwrap();
        let segs = vec![seg(0, 0.4), seg(0, 0.6), seg(200, 0.3)];
        db.insert_scores("peak1", 1000, 43_200, 0, &segs).unwrap();

        let rows = db.history_for("peak1", 0, 2000, 0, 86_400).unwrap();
        assert_eq!(rows.len(), 2);
        let box0 = rows.iter().find(|r| r.min_x == 0).unwrap();
        assert_eq!(box0.samples, 2);
        assert!((box0.max_score - 0.6).abs() < 1e-9);
        assert!((box0.avg_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn alert_ledger_window() {
        let db = Database::open_in_memory().unwrap();
        db.insert_alert("peak1", 10_000, None).unwrap();
        assert!(db.recent_alert_exists("peak1", 9_999).unwrap());
        assert!(!db.recent_alert_exists("peak1", 10_000).unwrap());
        assert!(!db.recent_alert_exists("other", 0).unwrap());
    }
}
