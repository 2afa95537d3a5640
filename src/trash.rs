//! Deleted tasks live on as one JSON snapshot file each, outside the database.
//!
//! A snapshot is written before the row is removed, so a failed write leaves
//! the task untouched. Restoring inserts the snapshot as a new row and only
//! then removes the file.

use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db;
use crate::model::Task;
use crate::ops;

const MAX_SLUG_LEN: usize = 48;

#[derive(Debug, Clone, Serialize)]
pub struct TrashEntry {
    pub path: PathBuf,
    pub deleted_at: DateTime<Utc>,
    pub task: Task,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    deleted_at: DateTime<Utc>,
    task: &'a Task,
}

#[derive(Deserialize)]
struct Snapshot {
    deleted_at: DateTime<Utc>,
    task: Task,
}

#[derive(Debug, Clone)]
pub struct Trash {
    dir: PathBuf,
}

impl Trash {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one snapshot per task, stamped with the current time.
    pub fn snapshot(&self, tasks: &[Task]) -> Result<Vec<PathBuf>> {
        self.snapshot_at(tasks, Utc::now())
    }

    /// Write one snapshot per task. Stops at the first failure and reports it;
    /// files written before the failure are left in place.
    pub fn snapshot_at(&self, tasks: &[Task], deleted_at: DateTime<Utc>) -> Result<Vec<PathBuf>> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create trash directory {}", self.dir.display()))?;

        let stamp = deleted_at.format("%Y%m%dT%H%M%SZ");
        let mut written = Vec::with_capacity(tasks.len());
        for (index, task) in tasks.iter().enumerate() {
            let name = format!("{stamp}-{}-{index}-{}.json", task.id, slug(&task.title));
            let path = self.dir.join(name);
            let data = serde_json::to_vec_pretty(&SnapshotRef { deleted_at, task })?;
            write_new(&path, &data)
                .with_context(|| format!("failed to write snapshot {}", path.display()))?;
            written.push(path);
        }
        log::info!(
            "wrote {} snapshot(s) to {}",
            written.len(),
            self.dir.display()
        );
        Ok(written)
    }

    /// All readable snapshots, most recently deleted first. Files that are not
    /// snapshots are skipped.
    pub fn list(&self) -> Result<Vec<TrashEntry>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read trash directory {}", self.dir.display()))
            }
        };

        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_file() {
                continue;
            }
            let path = dir_entry.path();
            let data =
                fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
            match serde_json::from_slice::<Snapshot>(&data) {
                Ok(snapshot) => entries.push(TrashEntry {
                    path,
                    deleted_at: snapshot.deleted_at,
                    task: snapshot.task,
                }),
                Err(e) => log::warn!("skipping {}: {e}", path.display()),
            }
        }
        entries.sort_by(|a, b| {
            b.deleted_at
                .cmp(&a.deleted_at)
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(entries)
    }

    /// Remove freshly written snapshots whose delete did not go through.
    /// Failures are logged, not returned.
    pub(crate) fn discard(&self, paths: &[PathBuf]) {
        for path in paths {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != ErrorKind::NotFound {
                    log::warn!("could not remove stale snapshot {}: {e}", path.display());
                }
            }
        }
    }

    /// Re-insert every entry as a new task in one transaction, then remove the
    /// snapshot files. Each snapshot file is consumed at most once, so an
    /// entry listed twice restores one task. Returns the new ids in entry
    /// order.
    pub fn restore(&self, conn: &Connection, entries: &[TrashEntry]) -> Result<Vec<i64>> {
        let mut seen = HashSet::new();
        let entries: Vec<&TrashEntry> = entries
            .iter()
            .filter(|entry| seen.insert(entry.path.as_path()))
            .collect();
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let ids = db::savepoint(conn, "restore_trash", || {
            entries
                .iter()
                .map(|entry| ops::insert_task(conn, &entry.task))
                .collect::<Result<Vec<_>>>()
        })?;

        for entry in &entries {
            match fs::remove_file(&entry.path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => log::warn!(
                    "restored task but could not remove {}: {e}",
                    entry.path.display()
                ),
            }
        }
        log::info!("restored {} task(s) from trash", ids.len());
        Ok(ids)
    }

    /// Delete snapshot files for good. Already missing files are fine.
    pub fn purge(&self, entries: &[TrashEntry]) -> Result<()> {
        for entry in entries {
            match fs::remove_file(&entry.path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("failed to remove {}", entry.path.display()))
                }
            }
        }
        log::info!("purged {} trash entr(ies)", entries.len());
        Ok(())
    }
}

fn write_new(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// Filename-safe form of a title: lowercase, spaces to dashes, only
/// `[a-z0-9_-]` kept, at most 48 characters, `task` when nothing is left.
pub fn slug(title: &str) -> String {
    let mut out: String = title
        .trim()
        .to_lowercase()
        .replace(' ', "-")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_')
        .collect();
    out.truncate(MAX_SLUG_LEN);
    if out.is_empty() {
        out.push_str("task");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(conn: &Connection, title: &str, topics: &str) -> Task {
        let id = ops::add_task(conn, title).unwrap();
        ops::update_metadata(
            conn,
            id,
            &crate::model::TaskMetadata {
                topics: topics.into(),
                tags: "x,y".into(),
                priority: 2,
                ..Default::default()
            },
        )
        .unwrap();
        ops::get_task(conn, id).unwrap()
    }

    #[test]
    fn slug_rules() {
        assert_eq!(slug("  Buy Milk!  "), "buy-milk");
        assert_eq!(slug("日本"), "task");
        assert_eq!(slug(&"a".repeat(80)).len(), 48);
        assert_eq!(slug("snake_case-ok"), "snake_case-ok");
    }

    #[test]
    fn snapshot_file_shape() {
        let conn = crate::db::open_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let trash = Trash::new(dir.path().join("nested/trash"));
        let task = sample(&conn, "Write report", "b, a");
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();

        let paths = trash.snapshot_at(&[task.clone()], at).unwrap();
        assert_eq!(paths.len(), 1);
        let name = paths[0].file_name().unwrap().to_str().unwrap().to_string();
        assert_eq!(name, format!("20240506T070809Z-{}-0-write-report.json", task.id));

        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(&paths[0]).unwrap()).unwrap();
        assert_eq!(json["deleted_at"], "2024-05-06T07:08:09Z");
        assert_eq!(json["task"]["title"], "Write report");
        assert_eq!(json["task"]["topics"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn snapshot_failure_mid_batch_reports_error() {
        let conn = crate::db::open_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let trash = Trash::new(dir.path());
        let first = sample(&conn, "first", "");
        let second = sample(&conn, "second", "");
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        // Occupy the second file's name so its write fails.
        let blocked = dir
            .path()
            .join(format!("20240101T000000Z-{}-1-second.json", second.id));
        fs::write(&blocked, b"occupied").unwrap();

        assert!(trash.snapshot_at(&[first.clone(), second], at).is_err());
        let written = dir
            .path()
            .join(format!("20240101T000000Z-{}-0-first.json", first.id));
        assert!(written.exists());
    }

    #[test]
    fn list_skips_foreign_files_and_sorts_newest_first() {
        let conn = crate::db::open_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let trash = Trash::new(dir.path());
        let older = sample(&conn, "older", "");
        let newer = sample(&conn, "newer", "");
        trash
            .snapshot_at(&[older], Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .unwrap();
        trash
            .snapshot_at(&[newer], Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
            .unwrap();
        fs::write(dir.path().join("notes.txt"), "not json").unwrap();
        fs::write(dir.path().join("other.json"), r#"{"hello": 1}"#).unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let entries = trash.list().unwrap();
        let titles: Vec<&str> = entries.iter().map(|e| e.task.title.as_str()).collect();
        assert_eq!(titles, vec!["newer", "older"]);
    }

    #[test]
    fn list_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let trash = Trash::new(dir.path().join("never-created"));
        assert!(trash.list().unwrap().is_empty());
    }

    #[test]
    fn purge_is_idempotent() {
        let conn = crate::db::open_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let trash = Trash::new(dir.path());
        trash.snapshot(&[sample(&conn, "t", "")]).unwrap();
        let entries = trash.list().unwrap();
        trash.purge(&entries).unwrap();
        assert!(trash.list().unwrap().is_empty());
        trash.purge(&entries).unwrap();
    }

    #[test]
    fn restore_inserts_new_rows_and_removes_files() {
        let conn = crate::db::open_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let trash = Trash::new(dir.path());
        let id = sample(&conn, "come back", "home, work").id;
        ops::update_metadata(
            &conn,
            id,
            &crate::model::TaskMetadata {
                topics: "home, work".into(),
                tags: "x,y".into(),
                priority: 4,
                due: Some(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()),
                start: Some(Utc.with_ymd_and_hms(2024, 5, 20, 8, 30, 0).unwrap()),
                recurring: true,
            },
        )
        .unwrap();
        ops::update_recurrence(&conn, id, "every 2 weeks on Fri", 3).unwrap();
        ops::update_notes(&conn, id, "line one\nline two").unwrap();
        ops::set_done(&conn, id, true).unwrap();
        let task = ops::get_task(&conn, id).unwrap();
        ops::delete_task(&conn, &trash, id).unwrap();

        let entries = trash.list().unwrap();
        assert_eq!(entries.len(), 1);
        let ids = trash.restore(&conn, &entries).unwrap();
        assert_eq!(ids.len(), 1);
        assert_ne!(ids[0], task.id);

        let restored = ops::get_task(&conn, ids[0]).unwrap();
        let expected = Task {
            id: ids[0],
            ..task
        };
        assert_eq!(restored, expected);
        assert!(trash.list().unwrap().is_empty());
    }

    #[test]
    fn restore_consumes_each_snapshot_once() {
        let conn = crate::db::open_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let trash = Trash::new(dir.path());
        let task = sample(&conn, "only once", "");
        ops::delete_task(&conn, &trash, task.id).unwrap();

        let entry = trash.list().unwrap().remove(0);
        let ids = trash.restore(&conn, &[entry.clone(), entry]).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ops::fetch_all(&conn).unwrap().len(), 1);
        assert!(trash.list().unwrap().is_empty());
    }

    #[test]
    fn failed_restore_keeps_files_and_inserts_nothing() {
        let conn = crate::db::open_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let trash = Trash::new(dir.path());
        let good = sample(&conn, "good", "");
        let mut bad = sample(&conn, "bad", "");
        // Violates the priority CHECK constraint on insert.
        bad.priority = 42;
        ops::delete_task(&conn, &trash, good.id).unwrap();
        let mut entries = trash.list().unwrap();
        entries.push(TrashEntry {
            path: dir.path().join("bad.json"),
            deleted_at: Utc::now(),
            task: bad,
        });
        let before = ops::fetch_all(&conn).unwrap().len();

        assert!(trash.restore(&conn, &entries).is_err());
        assert_eq!(ops::fetch_all(&conn).unwrap().len(), before);
        assert!(entries[0].path.exists());
    }
}
