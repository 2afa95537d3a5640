use anyhow::Result;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    title               TEXT NOT NULL,
    done                INTEGER NOT NULL DEFAULT 0,
    tags                TEXT NOT NULL DEFAULT '',
    priority            INTEGER NOT NULL DEFAULT 0 CHECK(priority BETWEEN 0 AND 5),
    due                 TEXT,
    start_at            TEXT,
    recurring           INTEGER NOT NULL DEFAULT 0,
    recurrence_rule     TEXT NOT NULL DEFAULT '',
    recurrence_interval INTEGER NOT NULL DEFAULT 0,
    notes               TEXT NOT NULL DEFAULT '',
    created_at          TEXT NOT NULL,
    completed_at        TEXT
);

CREATE TABLE IF NOT EXISTS task_topics (
    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    topic   TEXT NOT NULL CHECK(length(topic) > 0),
    PRIMARY KEY (task_id, topic)
);

CREATE INDEX IF NOT EXISTS task_topics_topic ON task_topics(topic);

CREATE TABLE IF NOT EXISTS topic_notes (
    topic TEXT PRIMARY KEY,
    body  TEXT NOT NULL
);
";

/// Columns that older databases may lack, with the statement that adds each.
const TASK_COLUMNS: &[(&str, &str)] = &[
    ("tags", "ALTER TABLE tasks ADD COLUMN tags TEXT NOT NULL DEFAULT ''"),
    ("start_at", "ALTER TABLE tasks ADD COLUMN start_at TEXT"),
    ("priority", "ALTER TABLE tasks ADD COLUMN priority INTEGER NOT NULL DEFAULT 0"),
    ("recurring", "ALTER TABLE tasks ADD COLUMN recurring INTEGER NOT NULL DEFAULT 0"),
    (
        "recurrence_rule",
        "ALTER TABLE tasks ADD COLUMN recurrence_rule TEXT NOT NULL DEFAULT ''",
    ),
    (
        "recurrence_interval",
        "ALTER TABLE tasks ADD COLUMN recurrence_interval INTEGER NOT NULL DEFAULT 0",
    ),
    ("notes", "ALTER TABLE tasks ADD COLUMN notes TEXT NOT NULL DEFAULT ''"),
    ("completed_at", "ALTER TABLE tasks ADD COLUMN completed_at TEXT"),
];

fn set_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    set_pragmas(&conn)?;
    Ok(conn)
}

pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    migrate(conn)?;
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

/// Bring a database created by an older release up to the current schema.
fn migrate(conn: &Connection) -> Result<()> {
    let existing = table_columns(conn, "tasks")?;
    for (column, alter) in TASK_COLUMNS {
        if !existing.iter().any(|c| c == column) {
            log::info!("adding missing column tasks.{column}");
            conn.execute_batch(alter)?;
        }
    }

    // Single-topic databases kept the topic in tasks.project.
    if existing.iter().any(|c| c == "project") {
        let copied = conn.execute(
            "INSERT OR IGNORE INTO task_topics (task_id, topic)
             SELECT id, trim(project) FROM tasks
             WHERE project IS NOT NULL AND trim(project) != ''",
            [],
        )?;
        if copied > 0 {
            log::info!("copied {copied} legacy project value(s) into task_topics");
        }
        conn.execute("UPDATE tasks SET project = '' WHERE project != ''", [])?;
    }
    Ok(())
}

/// Run `f` inside a SAVEPOINT named `name`.
///
/// Savepoints nest, so this works both standalone and inside a transaction
/// the caller already opened. On error everything `f` did is rolled back and
/// the original error is returned.
pub fn savepoint<T>(conn: &Connection, name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    conn.execute_batch(&format!("SAVEPOINT {name}"))?;
    match f() {
        Ok(v) => {
            conn.execute_batch(&format!("RELEASE {name}"))?;
            Ok(v)
        }
        Err(e) => {
            for stmt in [format!("ROLLBACK TO {name}"), format!("RELEASE {name}")] {
                if let Err(cleanup) = conn.execute_batch(&stmt) {
                    log::warn!("{stmt} failed: {cleanup}");
                }
            }
            Err(e)
        }
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a stored timestamp. Accepts RFC3339 and bare `YYYY-MM-DD` (taken as
/// midnight UTC); anything else reads as absent.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    set_pragmas(&conn)?;
    init(&conn)?;
    Ok(conn)
}
