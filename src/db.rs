use crate::grading::GradingConfig;
use crate::roster::StudentRecord;
use crate::session::{BulkWriteOutcome, EntryStatus, ScoreEntry, SheetKey};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE: &str = "marksheet.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(workspace.join(DB_FILE))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    create_schema(&conn)?;
    Ok(conn)
}

pub fn create_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            index_number TEXT,
            class_level TEXT NOT NULL,
            stream TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_stream
         ON students(class_level, stream)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS score_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            term INTEGER NOT NULL,
            year INTEGER NOT NULL,
            assessment TEXT NOT NULL,
            marks TEXT NOT NULL,
            status TEXT NOT NULL,
            comment TEXT NOT NULL DEFAULT '',
            locked INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            UNIQUE(student_id, term, year, assessment),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_records_sheet
         ON score_records(term, year, assessment)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    // Workspaces created before row locking shipped have no locked column.
    ensure_score_records_locked(conn)?;
    Ok(())
}

fn ensure_score_records_locked(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "score_records", "locked")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE score_records ADD COLUMN locked INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

const GRADING_CONFIG_KEY: &str = "grading.config";

/// The active grading configuration, or the shipped default when the
/// workspace has never stored one.
pub fn load_grading_config(conn: &Connection) -> anyhow::Result<GradingConfig> {
    match settings_get_json(conn, GRADING_CONFIG_KEY)? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(GradingConfig::default()),
    }
}

pub fn save_grading_config(conn: &Connection, config: &GradingConfig) -> anyhow::Result<()> {
    settings_set_json(conn, GRADING_CONFIG_KEY, &serde_json::to_value(config)?)
}

pub fn upsert_student(conn: &Connection, student: &StudentRecord) -> anyhow::Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO students(id, full_name, index_number, class_level, stream, active, updated_at)
         VALUES(?, ?, ?, ?, ?, 1, ?)
         ON CONFLICT(id) DO UPDATE SET
           full_name = excluded.full_name,
           index_number = excluded.index_number,
           class_level = excluded.class_level,
           stream = excluded.stream,
           updated_at = excluded.updated_at",
        (
            &student.id,
            &student.full_name,
            &student.index_number,
            &student.class_level,
            &student.stream,
            now,
        ),
    )?;
    Ok(())
}

pub fn insert_student(
    conn: &Connection,
    full_name: &str,
    index_number: Option<&str>,
    class_level: &str,
    stream: &str,
) -> anyhow::Result<StudentRecord> {
    let student = StudentRecord {
        id: Uuid::new_v4().to_string(),
        full_name: full_name.to_string(),
        index_number: index_number.map(|s| s.to_string()),
        class_level: class_level.to_string(),
        stream: stream.to_string(),
    };
    upsert_student(conn, &student)?;
    Ok(student)
}

pub fn list_roster(
    conn: &Connection,
    class_level: &str,
    stream: &str,
) -> anyhow::Result<Vec<StudentRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, full_name, index_number, class_level, stream
         FROM students
         WHERE class_level = ? AND stream = ? AND active = 1
         ORDER BY full_name",
    )?;
    let roster = stmt
        .query_map((class_level, stream), |r| {
            Ok(StudentRecord {
                id: r.get(0)?,
                full_name: r.get(1)?,
                index_number: r.get(2)?,
                class_level: r.get(3)?,
                stream: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(roster)
}

fn marks_from_json(raw: &str) -> BTreeMap<String, Option<u32>> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Stored entries for a sheet, restricted to the given roster.
pub fn load_score_entries(
    conn: &Connection,
    key: &SheetKey,
    roster: &[StudentRecord],
) -> anyhow::Result<Vec<ScoreEntry>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, marks, status, comment, locked
         FROM score_records
         WHERE term = ? AND year = ? AND assessment = ?",
    )?;
    let rows = stmt
        .query_map((key.term, key.year, &key.assessment), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)? != 0,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut entries = Vec::new();
    for (student_id, marks, status, comment, locked) in rows {
        if !roster.iter().any(|s| s.id == student_id) {
            continue;
        }
        entries.push(ScoreEntry {
            student_id: Some(student_id),
            marks: marks_from_json(&marks),
            status: EntryStatus::parse(&status).unwrap_or(EntryStatus::Present),
            comment,
            locked,
        });
    }
    Ok(entries)
}

/// Bulk upsert of a sheet's entries. One row failing does not abort the
/// batch; the outcome reports how many of the requested writes landed.
pub fn upsert_scores(
    conn: &Connection,
    key: &SheetKey,
    entries: &[ScoreEntry],
) -> anyhow::Result<BulkWriteOutcome> {
    let now = Utc::now().to_rfc3339();
    let mut succeeded = 0usize;
    for entry in entries {
        let Some(student_id) = entry.student_id.as_deref() else {
            continue;
        };
        let marks = serde_json::to_string(&entry.marks)?;
        let res = conn.execute(
            "INSERT INTO score_records(id, student_id, term, year, assessment,
                                       marks, status, comment, locked, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, term, year, assessment) DO UPDATE SET
               marks = excluded.marks,
               status = excluded.status,
               comment = excluded.comment,
               locked = excluded.locked,
               updated_at = excluded.updated_at",
            (
                Uuid::new_v4().to_string(),
                student_id,
                key.term,
                key.year,
                &key.assessment,
                marks,
                entry.status.as_str(),
                &entry.comment,
                entry.locked as i64,
                &now,
            ),
        );
        if res.is_ok() {
            succeeded += 1;
        }
    }
    Ok(BulkWriteOutcome {
        requested: entries.len(),
        succeeded,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteOutcome {
    pub requested: usize,
    pub deleted: usize,
}

/// Delete every stored record for a sheet key within the given roster.
/// Reports `{deleted, requested}` honestly; the two can differ.
pub fn delete_scores(
    conn: &Connection,
    key: &SheetKey,
    roster: &[StudentRecord],
) -> anyhow::Result<BulkDeleteOutcome> {
    let mut requested = 0usize;
    let mut deleted = 0usize;
    for student in roster {
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM score_records
                 WHERE student_id = ? AND term = ? AND year = ? AND assessment = ?",
                (&student.id, key.term, key.year, &key.assessment),
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_none() {
            continue;
        }
        requested += 1;
        let res = conn.execute(
            "DELETE FROM score_records
             WHERE student_id = ? AND term = ? AND year = ? AND assessment = ?",
            (&student.id, key.term, key.year, &key.assessment),
        );
        if let Ok(n) = res {
            deleted += n;
        }
    }
    Ok(BulkDeleteOutcome { requested, deleted })
}
