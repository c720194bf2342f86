//! Persistence collaborators: the detection log and the image upload service.
//!
//! Both are best-effort from the request's point of view. The service logs
//! their failures and still returns the computed detections.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};

use crate::detect::BoundingBox;
use crate::pipeline::DetectionRecord;
use crate::ripeness::RipenessCategory;

/// CSV column order for exported detections.
pub const CSV_HEADER: &str = "id,label,ripeness,confidence,x1,y1,x2,y2,image_url";

/// A persisted detection with its log id.
#[derive(Clone, Debug, PartialEq)]
pub struct LoggedDetection {
    pub id: u64,
    pub record: DetectionRecord,
    pub image_url: Option<String>,
}

pub trait DetectionLog: Send {
    /// Append every record of one request, all sharing `image_url`.
    fn append(&mut self, records: &[DetectionRecord], image_url: Option<&str>) -> Result<()>;

    /// All logged detections in insertion order.
    fn entries(&mut self) -> Result<Vec<LoggedDetection>>;
}

/// Process-local detection list.
#[derive(Debug, Default)]
pub struct InMemoryDetectionLog {
    entries: Vec<LoggedDetection>,
}

impl InMemoryDetectionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DetectionLog for InMemoryDetectionLog {
    fn append(&mut self, records: &[DetectionRecord], image_url: Option<&str>) -> Result<()> {
        for record in records {
            let id = self.entries.len() as u64 + 1;
            self.entries.push(LoggedDetection {
                id,
                record: record.clone(),
                image_url: image_url.map(str::to_string),
            });
        }
        Ok(())
    }

    fn entries(&mut self) -> Result<Vec<LoggedDetection>> {
        Ok(self.entries.clone())
    }
}

pub struct SqliteDetectionLog {
    conn: Connection,
}

impl SqliteDetectionLog {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open detection log {}", db_path))?;
        let mut log = Self { conn };
        log.ensure_schema()?;
        Ok(log)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detections (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              label TEXT NOT NULL,
              ripeness TEXT NOT NULL,
              confidence REAL NOT NULL,
              x1 INTEGER NOT NULL,
              y1 INTEGER NOT NULL,
              x2 INTEGER NOT NULL,
              y2 INTEGER NOT NULL,
              image_url TEXT
            );
            "#,
        )?;
        Ok(())
    }
}

impl DetectionLog for SqliteDetectionLog {
    fn append(&mut self, records: &[DetectionRecord], image_url: Option<&str>) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO detections (label, ripeness, confidence, x1, y1, x2, y2, image_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.label,
                    record.ripeness.as_str(),
                    record.confidence as f64,
                    record.bbox.x1,
                    record.bbox.y1,
                    record.bbox.x2,
                    record.bbox.y2,
                    image_url,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn entries(&mut self) -> Result<Vec<LoggedDetection>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, label, ripeness, confidence, x1, y1, x2, y2, image_url
             FROM detections ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let ripeness: String = row.get(2)?;
            let confidence: f64 = row.get(3)?;
            out.push(LoggedDetection {
                id: u64::try_from(id).map_err(|_| anyhow!("corrupt detection log: negative id"))?,
                record: DetectionRecord {
                    label: row.get(1)?,
                    ripeness: parse_ripeness(&ripeness)?,
                    confidence: confidence as f32,
                    bbox: BoundingBox::new(row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?),
                },
                image_url: row.get(8)?,
            });
        }
        Ok(out)
    }
}

fn parse_ripeness(value: &str) -> Result<RipenessCategory> {
    RipenessCategory::ALL
        .iter()
        .copied()
        .find(|c| c.as_str() == value)
        .ok_or_else(|| anyhow!("corrupt detection log: unknown ripeness '{}'", value))
}

/// Writes `entries` as CSV with the `CSV_HEADER` column order.
pub fn write_csv<W: Write>(entries: &[LoggedDetection], mut out: W) -> Result<()> {
    writeln!(out, "{}", CSV_HEADER)?;
    for entry in entries {
        let r = &entry.record;
        writeln!(
            out,
            "{},{},{},{:.2},{},{},{},{},{}",
            entry.id,
            csv_field(&r.label),
            r.ripeness.as_str(),
            r.confidence,
            r.bbox.x1,
            r.bbox.y1,
            r.bbox.x2,
            r.bbox.y2,
            csv_field(entry.image_url.as_deref().unwrap_or("")),
        )?;
    }
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Destination for annotated images.
pub trait UploadService: Send + Sync {
    /// Store `jpeg` with metadata `tags`; returns a stable retrieval URL.
    fn upload(&self, jpeg: &[u8], tags: &[String]) -> Result<String>;
}

/// Stores uploads on the local filesystem, content-addressed by SHA-256.
///
/// Each image is written as `<hex>.jpg` next to a `<hex>.tags` file holding
/// one tag per line. Re-uploading identical bytes returns the same URL.
#[derive(Clone, Debug)]
pub struct FilesystemUpload {
    dir: PathBuf,
}

impl FilesystemUpload {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create upload dir {}", dir.display()))?;
        let dir = dir
            .canonicalize()
            .with_context(|| format!("failed to resolve upload dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl UploadService for FilesystemUpload {
    fn upload(&self, jpeg: &[u8], tags: &[String]) -> Result<String> {
        let digest = hex::encode(Sha256::digest(jpeg));
        let image_path = self.dir.join(format!("{digest}.jpg"));
        std::fs::write(&image_path, jpeg)
            .with_context(|| format!("failed to write {}", image_path.display()))?;
        let tags_path = self.dir.join(format!("{digest}.tags"));
        std::fs::write(&tags_path, tags.join("\n"))
            .with_context(|| format!("failed to write {}", tags_path.display()))?;
        Ok(format!("file://{}", image_path.display()))
    }
}

/// Upload tags for one request: `label:ripeness` per record.
pub fn upload_tags(records: &[DetectionRecord]) -> Vec<String> {
    records
        .iter()
        .map(|r| format!("{}:{}", r.label, r.ripeness))
        .collect()
}
