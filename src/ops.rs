use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Days, Duration, Local, TimeZone, Utc};
use rusqlite::Connection;

use crate::db::{self, format_timestamp, parse_timestamp};
use crate::model::{clamp_priority, Task, TaskMetadata, TopicSummary};
use crate::recurrence::{self, NormalizedRule};
use crate::topic_notes;
use crate::trash::Trash;

const TASK_COLUMNS: &str = "id, title, done, tags, priority, due, start_at, recurring, \
     recurrence_rule, recurrence_interval, notes, created_at, completed_at";

const INSERT_TASK: &str = "
INSERT INTO tasks (title, done, tags, priority, due, start_at, recurring,
                   recurrence_rule, recurrence_interval, notes, created_at, completed_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
";

// Keeps the original completion time when a done task is marked done again.
const SET_DONE: &str = "
UPDATE tasks
SET done = ?1,
    completed_at = CASE WHEN ?1 THEN COALESCE(CASE WHEN done = 1 THEN completed_at END, ?2) END
WHERE id = ?3
";

const UPDATE_METADATA: &str = "
UPDATE tasks
SET tags = ?1, priority = ?2, due = ?3, start_at = ?4, recurring = ?5
WHERE id = ?6
";

const LIST_TOPICS: &str = "
SELECT name, SUM(open), SUM(total), MAX(has_note) FROM (
    SELECT tt.topic AS name,
           SUM(CASE WHEN t.done = 0 THEN 1 ELSE 0 END) AS open,
           COUNT(*) AS total,
           0 AS has_note
    FROM task_topics tt
    INNER JOIN tasks t ON t.id = tt.task_id
    GROUP BY tt.topic
    UNION ALL
    SELECT topic, 0, 0, 1 FROM topic_notes
)
GROUP BY name
ORDER BY name
";

fn task_exists(conn: &Connection, id: i64) -> Result<bool> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM tasks WHERE id = ?1", [id], |row| {
        row.get(0)
    })?;
    Ok(count > 0)
}

fn require_task(conn: &Connection, id: i64) -> Result<()> {
    if !task_exists(conn, id)? {
        bail!("task #{id} not found");
    }
    Ok(())
}

fn read_timestamp(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<chrono::DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .as_deref()
        .and_then(parse_timestamp))
}

fn read_task_row(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        done: row.get::<_, i64>(2)? != 0,
        topics: Vec::new(),
        tags: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        priority: row.get(4)?,
        due: read_timestamp(row, 5)?,
        start: read_timestamp(row, 6)?,
        recurring: row.get::<_, i64>(7)? != 0,
        recurrence_rule: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        recurrence_interval: row.get(9)?,
        notes: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        created_at: read_timestamp(row, 11)?.unwrap_or_default(),
        completed_at: read_timestamp(row, 12)?,
    })
}

/// Fill in `topics` for every task with one query over the whole id set.
fn attach_topics(conn: &Connection, tasks: &mut [Task]) -> Result<()> {
    if tasks.is_empty() {
        return Ok(());
    }
    let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
    let mut stmt = conn.prepare_cached(
        "SELECT task_id, topic FROM task_topics
         WHERE task_id IN (SELECT value FROM json_each(?1))
         ORDER BY task_id, topic",
    )?;
    let rows = stmt.query_map([serde_json::to_string(&ids)?], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut by_task: HashMap<i64, Vec<String>> = HashMap::new();
    for row in rows {
        let (id, topic) = row?;
        by_task.entry(id).or_default().push(topic);
    }
    for task in tasks.iter_mut() {
        task.topics = by_task.remove(&task.id).unwrap_or_default();
    }
    Ok(())
}

fn query_tasks(conn: &Connection, filter: &str) -> Result<Vec<Task>> {
    let query = format!("SELECT {TASK_COLUMNS} FROM tasks {filter} ORDER BY id");
    let mut stmt = conn.prepare(&query)?;
    let mut tasks = stmt
        .query_map([], read_task_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    attach_topics(conn, &mut tasks)?;
    Ok(tasks)
}

/// Split a comma separated topic list into trimmed, unique, sorted names.
pub fn parse_topics(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Every live task, ordered by id, with topics populated.
pub fn fetch_all(conn: &Connection) -> Result<Vec<Task>> {
    query_tasks(conn, "")
}

pub fn get_task(conn: &Connection, id: i64) -> Result<Task> {
    require_task(conn, id)?;
    let query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
    let task = conn.query_row(&query, [id], read_task_row)?;
    let mut tasks = [task];
    attach_topics(conn, &mut tasks)?;
    let [task] = tasks;
    Ok(task)
}

pub fn add_task(conn: &Connection, title: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO tasks (title, done, created_at) VALUES (?1, 0, ?2)",
        rusqlite::params![title, format_timestamp(&Utc::now())],
    )?;
    let id = conn.last_insert_rowid();
    log::debug!("added task #{id}");
    Ok(id)
}

/// Insert a complete task record under a fresh id, topics included.
pub(crate) fn insert_task(conn: &Connection, task: &Task) -> Result<i64> {
    conn.execute(
        INSERT_TASK,
        rusqlite::params![
            task.title,
            task.done,
            task.tags,
            task.priority,
            task.due.as_ref().map(format_timestamp),
            task.start.as_ref().map(format_timestamp),
            task.recurring,
            task.recurrence_rule,
            task.recurrence_interval,
            task.notes,
            format_timestamp(&task.created_at),
            task.completed_at.as_ref().map(format_timestamp),
        ],
    )?;
    let id = conn.last_insert_rowid();
    let topics: BTreeSet<&str> = task
        .topics
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    let topics: Vec<String> = topics.into_iter().map(str::to_string).collect();
    replace_topics(conn, id, &topics)?;
    Ok(id)
}

pub fn set_done(conn: &Connection, id: i64, done: bool) -> Result<()> {
    require_task(conn, id)?;
    conn.execute(
        SET_DONE,
        rusqlite::params![done, format_timestamp(&Utc::now()), id],
    )?;
    Ok(())
}

pub fn update_title(conn: &Connection, id: i64, title: &str) -> Result<()> {
    require_task(conn, id)?;
    conn.execute(
        "UPDATE tasks SET title = ?1 WHERE id = ?2",
        rusqlite::params![title, id],
    )?;
    Ok(())
}

pub fn update_priority(conn: &Connection, id: i64, priority: i64) -> Result<()> {
    require_task(conn, id)?;
    conn.execute(
        "UPDATE tasks SET priority = ?1 WHERE id = ?2",
        rusqlite::params![clamp_priority(priority), id],
    )?;
    Ok(())
}

pub fn update_notes(conn: &Connection, id: i64, notes: &str) -> Result<()> {
    require_task(conn, id)?;
    conn.execute(
        "UPDATE tasks SET notes = ?1 WHERE id = ?2",
        rusqlite::params![notes, id],
    )?;
    Ok(())
}

/// Move the due date by `days` calendar days. A task without a due date is
/// shifted from now.
pub fn shift_due(conn: &Connection, id: i64, days: i64) -> Result<()> {
    require_task(conn, id)?;
    let current: Option<String> =
        conn.query_row("SELECT due FROM tasks WHERE id = ?1", [id], |row| row.get(0))?;
    let base = current
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now);
    let shifted = shift_local_days(base, days)
        .with_context(|| format!("shifting due date by {days} days is out of range"))?;
    conn.execute(
        "UPDATE tasks SET due = ?1 WHERE id = ?2",
        rusqlite::params![format_timestamp(&shifted), id],
    )?;
    Ok(())
}

/// Add calendar days in local time, keeping the wall-clock time of day.
fn shift_local_days(base: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    let local = base.with_timezone(&Local).naive_local();
    let delta = Days::new(days.unsigned_abs());
    let shifted = if days >= 0 {
        local.checked_add_days(delta)?
    } else {
        local.checked_sub_days(delta)?
    };
    // A time skipped by a DST gap lands one hour later.
    let resolved = match Local.from_local_datetime(&shifted).earliest() {
        Some(dt) => dt,
        None => {
            let later = shifted.checked_add_signed(Duration::try_hours(1)?)?;
            Local.from_local_datetime(&later).earliest()?
        }
    };
    Some(resolved.with_timezone(&Utc))
}

fn replace_topics(conn: &Connection, id: i64, topics: &[String]) -> Result<()> {
    conn.execute("DELETE FROM task_topics WHERE task_id = ?1", [id])?;
    let mut stmt =
        conn.prepare_cached("INSERT OR IGNORE INTO task_topics (task_id, topic) VALUES (?1, ?2)")?;
    for topic in topics {
        stmt.execute(rusqlite::params![id, topic])?;
    }
    Ok(())
}

/// Replace tags, priority, dates, the recurring flag and the whole topic set.
pub fn update_metadata(conn: &Connection, id: i64, meta: &TaskMetadata) -> Result<()> {
    require_task(conn, id)?;
    let topics = parse_topics(&meta.topics);
    db::savepoint(conn, "update_metadata", || {
        conn.execute(
            UPDATE_METADATA,
            rusqlite::params![
                meta.tags,
                clamp_priority(meta.priority),
                meta.due.as_ref().map(format_timestamp),
                meta.start.as_ref().map(format_timestamp),
                meta.recurring,
                id,
            ],
        )?;
        replace_topics(conn, id, &topics)
    })?;
    log::debug!("updated metadata for task #{id}: topics={topics:?}");
    Ok(())
}

/// Store a rule and interval verbatim. Leaves the `recurring` flag alone.
pub fn update_recurrence(conn: &Connection, id: i64, rule: &str, interval: i64) -> Result<()> {
    require_task(conn, id)?;
    conn.execute(
        "UPDATE tasks SET recurrence_rule = ?1, recurrence_interval = ?2 WHERE id = ?3",
        rusqlite::params![rule, interval.max(0), id],
    )?;
    Ok(())
}

/// Normalise rule input and store it together with a matching `recurring`
/// flag.
pub fn apply_recurrence(
    conn: &Connection,
    id: i64,
    raw_rule: &str,
    interval: i64,
) -> Result<NormalizedRule> {
    require_task(conn, id)?;
    let normalized = recurrence::normalize(raw_rule, interval);
    db::savepoint(conn, "apply_recurrence", || {
        update_recurrence(conn, id, &normalized.rule, normalized.interval)?;
        conn.execute(
            "UPDATE tasks SET recurring = ?1 WHERE id = ?2",
            rusqlite::params![normalized.recurring, id],
        )?;
        Ok(())
    })?;
    Ok(normalized)
}

fn delete_rows(conn: &Connection, ids: &[i64]) -> Result<usize> {
    let ids_json = serde_json::to_string(ids)?;
    db::savepoint(conn, "delete_tasks", || {
        conn.execute(
            "DELETE FROM task_topics WHERE task_id IN (SELECT value FROM json_each(?1))",
            [&ids_json],
        )?;
        let removed = conn.execute(
            "DELETE FROM tasks WHERE id IN (SELECT value FROM json_each(?1))",
            [&ids_json],
        )?;
        Ok(removed)
    })
}

/// Snapshot the task into the trash, then remove it. Nothing is removed when
/// the snapshot cannot be written, and the snapshot is dropped again when the
/// row cannot be removed.
pub fn delete_task(conn: &Connection, trash: &Trash, id: i64) -> Result<()> {
    let task = get_task(conn, id)?;
    let written = trash.snapshot(std::slice::from_ref(&task))?;
    delete_rows(conn, &[id]).inspect_err(|_| trash.discard(&written))?;
    log::info!("moved task #{id} to trash");
    Ok(())
}

/// Move every done task to the trash. Returns how many were removed.
pub fn delete_done_tasks(conn: &Connection, trash: &Trash) -> Result<usize> {
    let done = query_tasks(conn, "WHERE done = 1")?;
    if done.is_empty() {
        return Ok(0);
    }
    let written = trash.snapshot(&done)?;
    let ids: Vec<i64> = done.iter().map(|t| t.id).collect();
    let removed = delete_rows(conn, &ids).inspect_err(|_| trash.discard(&written))?;
    log::info!("moved {removed} done task(s) to trash");
    Ok(removed)
}

/// Re-point every association from `old` to `new` and merge their notes.
/// Returns how many tasks carried `old`.
pub fn rename_topic(conn: &Connection, old: &str, new: &str) -> Result<usize> {
    let (old, new) = (old.trim(), new.trim());
    if new.is_empty() {
        bail!("new topic name must not be empty");
    }
    if old == new {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM task_topics WHERE topic = ?1",
            [old],
            |row| row.get(0),
        )?;
        return Ok(usize::try_from(count)?);
    }
    let moved = db::savepoint(conn, "rename_topic", || {
        conn.execute(
            "INSERT OR IGNORE INTO task_topics (task_id, topic)
             SELECT task_id, ?2 FROM task_topics WHERE topic = ?1",
            rusqlite::params![old, new],
        )?;
        let moved = conn.execute("DELETE FROM task_topics WHERE topic = ?1", [old])?;
        topic_notes::rename(conn, old, new)?;
        Ok(moved)
    })?;
    log::debug!("renamed topic '{old}' to '{new}' on {moved} task(s)");
    Ok(moved)
}

/// Detach `name` from every task and drop its note. Tasks stay.
pub fn delete_topic(conn: &Connection, name: &str) -> Result<usize> {
    let name = name.trim();
    let removed = db::savepoint(conn, "delete_topic", || {
        let removed = conn.execute("DELETE FROM task_topics WHERE topic = ?1", [name])?;
        topic_notes::delete(conn, name)?;
        Ok(removed)
    })?;
    log::debug!("removed topic '{name}' from {removed} task(s)");
    Ok(removed)
}

pub fn list_topics(conn: &Connection) -> Result<Vec<TopicSummary>> {
    let mut stmt = conn.prepare(LIST_TOPICS)?;
    let rows = stmt.query_map([], |row| {
        Ok(TopicSummary {
            name: row.get(0)?,
            open: row.get(1)?,
            total: row.get(2)?,
            has_note: row.get::<_, i64>(3)? != 0,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Into::into)
}

/// Status filter for task listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    Open,
    Done,
    All,
}

impl StatusFilter {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "open" | "" => Ok(Self::Open),
            "done" => Ok(Self::Done),
            "all" => Ok(Self::All),
            _ => bail!("invalid filter '{s}': must be open, done, or all"),
        }
    }

    fn matches(&self, task: &Task) -> bool {
        match self {
            Self::Open => !task.done,
            Self::Done => task.done,
            Self::All => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: StatusFilter,
    pub topic: Option<String>,
    /// Case-insensitive title substring.
    pub search: Option<String>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        if !self.status.matches(task) {
            return false;
        }
        if let Some(topic) = &self.topic {
            if !task.topics.iter().any(|t| t == topic) {
                return false;
            }
        }
        if let Some(needle) = &self.search {
            if !task.title.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortMode {
    #[default]
    Auto,
    State,
    Due,
    Priority,
    Created,
    Id,
}

impl SortMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "state" => Ok(Self::State),
            "due" => Ok(Self::Due),
            "priority" => Ok(Self::Priority),
            "created" => Ok(Self::Created),
            "id" => Ok(Self::Id),
            _ => bail!("invalid sort '{s}': must be auto, state, due, priority, created, or id"),
        }
    }
}

/// Dated before undated, earlier first.
fn cmp_due(a: &Task, b: &Task) -> Ordering {
    match (a.due, b.due) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn sort_tasks(tasks: &mut [Task], mode: SortMode) {
    let open_first = |a: &Task, b: &Task| a.done.cmp(&b.done);
    match mode {
        SortMode::Auto => tasks.sort_by(|a, b| {
            open_first(a, b)
                .then_with(|| cmp_due(a, b))
                .then_with(|| b.priority.cmp(&a.priority))
                .then_with(|| a.id.cmp(&b.id))
        }),
        SortMode::State => tasks.sort_by(|a, b| open_first(a, b).then_with(|| a.id.cmp(&b.id))),
        SortMode::Due => tasks.sort_by(|a, b| cmp_due(a, b).then_with(|| a.id.cmp(&b.id))),
        SortMode::Priority => {
            tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)))
        }
        SortMode::Created => tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        SortMode::Id => tasks.sort_by_key(|t| t.id),
    }
}

/// Fetch, filter and order tasks for display.
pub fn list_tasks(conn: &Connection, filter: &TaskFilter, sort: SortMode) -> Result<Vec<Task>> {
    let mut tasks = fetch_all(conn)?;
    tasks.retain(|t| filter.matches(t));
    sort_tasks(&mut tasks, sort);
    Ok(tasks)
}
