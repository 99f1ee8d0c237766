//! Attendance log: one row per identity per `run` session.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use edgeface_core::ClassificationResult;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS attendance (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT    NOT NULL,
    day         TEXT    NOT NULL,
    time        TEXT    NOT NULL,
    confidence  REAL    NOT NULL
);
CREATE INDEX IF NOT EXISTS attendance_day ON attendance(day);
";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub confidence: f32,
}

/// SQLite-backed attendance log for one session.
pub struct AttendanceLog {
    conn: Connection,
    /// Identities already recorded in this session.
    seen: HashSet<String>,
}

impl AttendanceLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open attendance db {}", path.display()))?;
        tracing::debug!(path = %path.display(), "opened attendance db");
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("failed to initialise attendance schema")?;
        Ok(Self {
            conn,
            seen: HashSet::new(),
        })
    }

    /// Record an accepted result. Rejected results and identities already
    /// seen this session are ignored. Returns whether a row was written.
    pub fn record(&mut self, result: &ClassificationResult, at: DateTime<Local>) -> Result<bool> {
        let Some(name) = result.loggable_identity() else {
            return Ok(false);
        };
        if self.seen.contains(name) {
            return Ok(false);
        }

        self.conn
            .execute(
                "INSERT INTO attendance (name, day, time, confidence) VALUES (?1, ?2, ?3, ?4)",
                params![
                    name,
                    at.format(DATE_FORMAT).to_string(),
                    at.format(TIME_FORMAT).to_string(),
                    f64::from(result.confidence),
                ],
            )
            .with_context(|| format!("failed to record attendance for {name}"))?;

        self.seen.insert(name.to_string());
        tracing::info!(name, confidence = result.confidence, "attendance recorded");
        Ok(true)
    }

    /// All records for `day`, oldest first.
    pub fn for_day(&self, day: NaiveDate) -> Result<Vec<AttendanceRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, time, confidence FROM attendance WHERE day = ?1 ORDER BY time, id",
        )?;
        let rows = stmt.query_map(params![day.format(DATE_FORMAT).to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (name, time, confidence) = row?;
            let time = NaiveTime::parse_from_str(&time, TIME_FORMAT)
                .with_context(|| format!("malformed time {time:?} for {name}"))?;
            records.push(AttendanceRecord {
                name,
                date: day,
                time,
                confidence: confidence as f32,
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use edgeface_core::BoundingBox;

    fn result(label: &str, accepted: bool) -> ClassificationResult {
        ClassificationResult {
            label: label.to_string(),
            confidence: if accepted { 72.5 } else { 12.0 },
            accepted,
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        }
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_records_accepted_once_per_session() {
        let mut log = AttendanceLog::open_in_memory().unwrap();
        assert!(log.record(&result("alice", true), at(4, 9, 0)).unwrap());
        assert!(!log.record(&result("alice", true), at(4, 9, 5)).unwrap());
        assert!(log.record(&result("bob", true), at(4, 9, 1)).unwrap());

        let records = log.for_day(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()).unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
        assert_eq!(records[0].time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(records[0].confidence, 72.5);
    }

    #[test]
    fn test_rejected_not_recorded() {
        let mut log = AttendanceLog::open_in_memory().unwrap();
        assert!(!log.record(&result("Unknown", false), at(4, 9, 0)).unwrap());
        // Predicted label kept for display but not accepted.
        assert!(!log.record(&result("alice", false), at(4, 9, 0)).unwrap());
        let records = log.for_day(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_days_are_separate() {
        let mut log = AttendanceLog::open_in_memory().unwrap();
        log.record(&result("alice", true), at(4, 9, 0)).unwrap();
        let other = log.for_day(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()).unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn test_new_session_records_again() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("attendance.db");

        let mut first = AttendanceLog::open(&path).unwrap();
        first.record(&result("alice", true), at(4, 9, 0)).unwrap();
        drop(first);

        let mut second = AttendanceLog::open(&path).unwrap();
        assert!(second.record(&result("alice", true), at(4, 14, 0)).unwrap());
        let records = second.for_day(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()).unwrap();
        assert_eq!(records.len(), 2);
    }
}
