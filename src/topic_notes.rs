use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

use crate::db;

/// Separator placed between two notes merged by a topic rename.
pub const MERGE_SEPARATOR: &str = "\n\n---\n\n";

pub fn get(conn: &Connection, topic: &str) -> Result<String> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM topic_notes WHERE topic = ?1",
            [topic],
            |row| row.get(0),
        )
        .optional()?;
    Ok(body.unwrap_or_default())
}

/// Upsert the note for `topic`. A blank body removes the note.
pub fn set(conn: &Connection, topic: &str, body: &str) -> Result<()> {
    if body.trim().is_empty() {
        return delete(conn, topic);
    }
    conn.execute(
        "INSERT INTO topic_notes (topic, body) VALUES (?1, ?2)
         ON CONFLICT(topic) DO UPDATE SET body = excluded.body",
        rusqlite::params![topic, body],
    )?;
    log::debug!("set note for topic '{topic}'");
    Ok(())
}

pub fn delete(conn: &Connection, topic: &str) -> Result<()> {
    conn.execute("DELETE FROM topic_notes WHERE topic = ?1", [topic])?;
    Ok(())
}

/// Move the note of `old` onto `new`. When both have notes, the old one is
/// appended to the new one after [`MERGE_SEPARATOR`].
pub fn rename(conn: &Connection, old: &str, new: &str) -> Result<()> {
    if old == new {
        return Ok(());
    }
    db::savepoint(conn, "rename_topic_note", || {
        let old_body = get(conn, old)?;
        if old_body.trim().is_empty() {
            return delete(conn, old);
        }
        let new_body = get(conn, new)?;
        let merged = if new_body.trim().is_empty() {
            old_body
        } else {
            format!("{new_body}{MERGE_SEPARATOR}{old_body}")
        };
        set(conn, new, &merged)?;
        delete(conn, old)
    })
}
