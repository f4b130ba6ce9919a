use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::{DetectionId, DetectionRecord, EventSink};
use crate::camera::CameraId;
use crate::detect::ClassLabel;
use crate::now_s;

/// SQLite-backed detection store.
pub struct SqliteEventSink {
    conn: Mutex<Connection>,
}

impl SqliteEventSink {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open detection database {}", db_path))?;
        let sink = Self {
            conn: Mutex::new(conn),
        };
        sink.ensure_schema()?;
        Ok(sink)
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("detection database lock poisoned"))
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detection_events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              camera_id INTEGER NOT NULL,
              created_at INTEGER NOT NULL,
              label TEXT NOT NULL,
              zone TEXT,
              video_file TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_detections_camera ON detection_events(camera_id);
            "#,
        )?;
        Ok(())
    }

    /// Load one detection by id.
    pub fn get(&self, id: DetectionId) -> Result<Option<DetectionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, camera_id, created_at, label, zone, video_file \
             FROM detection_events WHERE id = ?1",
        )?;
        let row = stmt
            .query_row(params![id.0], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .optional()?;
        let Some((id, camera_id, created_at, label, zone, video_file)) = row else {
            return Ok(None);
        };
        let label = ClassLabel::ALL
            .iter()
            .copied()
            .find(|candidate| candidate.as_str() == label)
            .ok_or_else(|| anyhow!("corrupt detection {}: unknown label '{}'", id, label))?;
        Ok(Some(DetectionRecord {
            id: DetectionId(id),
            camera_id: u64::try_from(camera_id)
                .map_err(|_| anyhow!("corrupt detection {}: negative camera id", id))?,
            label,
            zone,
            created_at: u64::try_from(created_at).unwrap_or(0),
            video_file: video_file.map(PathBuf::from),
        }))
    }
}

impl EventSink for SqliteEventSink {
    fn record_detection(
        &self,
        camera_id: CameraId,
        label: ClassLabel,
        zone: Option<&str>,
    ) -> Result<DetectionId> {
        let camera_id =
            i64::try_from(camera_id).map_err(|_| anyhow!("camera id exceeds i64 range"))?;
        let created_at =
            i64::try_from(now_s()?).map_err(|_| anyhow!("timestamp exceeds i64 range"))?;
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO detection_events(camera_id, created_at, label, zone)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![camera_id, created_at, label.as_str(), zone],
        )?;
        Ok(DetectionId(conn.last_insert_rowid()))
    }

    fn attach_clip(&self, detection_id: DetectionId, clip_path: &Path) -> Result<()> {
        let path = clip_path.to_string_lossy();
        let updated = self.conn()?.execute(
            "UPDATE detection_events SET video_file = ?1 WHERE id = ?2",
            params![path.as_ref(), detection_id.0],
        )?;
        if updated == 0 {
            return Err(anyhow!("unknown detection {}", detection_id.0));
        }
        Ok(())
    }
}
