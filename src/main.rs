mod cli;

use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use clap::Parser;
use rusqlite::Connection;

use cli::{Cli, Command, TopicAction, TrashAction};
use taskpad::config::Config;
use taskpad::model::TaskMetadata;
use taskpad::ops::{self, SortMode, StatusFilter, TaskFilter};
use taskpad::report::Report;
use taskpad::trash::{Trash, TrashEntry};
use taskpad::{db, output, topic_notes};

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

fn open_db(db_path: &Path) -> Result<Connection> {
    ensure_parent_dir(db_path)?;
    let path = db_path
        .to_str()
        .context("database path is not valid UTF-8")?;
    let conn = db::open(path)?;
    db::init(&conn)?;
    Ok(conn)
}

/// Dates given as `YYYY-MM-DD` mean local midnight; anything else must be
/// RFC 3339.
fn parse_date_arg(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(day) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        let midnight = day.and_hms_opt(0, 0, 0).context("invalid date")?;
        return Local
            .from_local_datetime(&midnight)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .with_context(|| format!("'{text}' does not exist in the local timezone"));
    }
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid date '{text}': expected YYYY-MM-DD or RFC 3339"))
}

fn read_content(content: Option<String>, stdin: bool) -> Result<String> {
    match content {
        Some(c) if !stdin => Ok(c),
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

/// Pick trash entries by 1-based position in the listing.
fn select_entries(
    entries: Vec<TrashEntry>,
    indices: &[usize],
    all: bool,
) -> Result<Vec<TrashEntry>> {
    if all {
        return Ok(entries);
    }
    let mut picked = Vec::with_capacity(indices.len());
    for &index in indices {
        match index.checked_sub(1).and_then(|i| entries.get(i)) {
            Some(entry) => picked.push(entry.clone()),
            None => bail!(
                "no trash entry {index} (trash has {} entr{})",
                entries.len(),
                if entries.len() == 1 { "y" } else { "ies" }
            ),
        }
    }
    Ok(picked)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let db_path: PathBuf = cli.db.unwrap_or_else(|| config.db_path());
    let trash = Trash::new(cli.trash.unwrap_or_else(|| config.trash_dir()));
    let today = Local::now().date_naive();
    log::debug!(
        "database {}, trash {}",
        db_path.display(),
        trash.dir().display()
    );

    match cli.command {
        Command::Add {
            title,
            topics,
            priority,
            due,
        } => {
            let conn = open_db(&db_path)?;
            let due = due.as_deref().map(parse_date_arg).transpose()?;
            let id = ops::add_task(&conn, &title)?;
            if topics.is_some() || priority.is_some() || due.is_some() {
                let meta = TaskMetadata {
                    topics: topics.unwrap_or_default(),
                    priority: priority.unwrap_or(0),
                    due,
                    ..TaskMetadata::default()
                };
                ops::update_metadata(&conn, id, &meta)?;
            }
            println!("{id}");
            eprintln!("Added task #{id}");
        }

        Command::List {
            all,
            done,
            topic,
            search,
            sort,
            tree,
            json,
        } => {
            let conn = open_db(&db_path)?;
            let status = if all {
                StatusFilter::All
            } else if done {
                StatusFilter::Done
            } else {
                config.status_filter()?
            };
            let sort = match sort {
                Some(s) => SortMode::parse(&s)?,
                None => config.sort_mode()?,
            };
            let filter = TaskFilter {
                status,
                topic,
                search,
            };
            let tasks = ops::list_tasks(&conn, &filter, sort)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else if tree {
                print!("{}", output::format_by_topic(&tasks, today));
            } else {
                print!("{}", output::format_task_list(&tasks, today));
            }
        }

        Command::Show { id, json } => {
            let conn = open_db(&db_path)?;
            let task = ops::get_task(&conn, id)?;
            if json {
                let detail = output::TaskDetail::new(&task, today);
                println!("{}", serde_json::to_string_pretty(&detail)?);
            } else {
                print!("{}", output::format_task_detail(&task, today));
            }
        }

        Command::Done { id } => {
            let conn = open_db(&db_path)?;
            ops::set_done(&conn, id, true)?;
            eprintln!("Marked #{id} as done");
        }

        Command::Undo { id } => {
            let conn = open_db(&db_path)?;
            ops::set_done(&conn, id, false)?;
            eprintln!("Reopened #{id}");
        }

        Command::Title { id, title } => {
            let conn = open_db(&db_path)?;
            ops::update_title(&conn, id, &title)?;
            eprintln!("Renamed #{id}");
        }

        Command::Priority { id, priority } => {
            let conn = open_db(&db_path)?;
            ops::update_priority(&conn, id, priority)?;
            let task = ops::get_task(&conn, id)?;
            eprintln!("Set priority of #{id} to {}", task.priority);
        }

        Command::Due { id, days } => {
            let conn = open_db(&db_path)?;
            ops::shift_due(&conn, id, days)?;
            let task = ops::get_task(&conn, id)?;
            match task.due {
                Some(due) => eprintln!(
                    "#{id} now due {}",
                    due.with_timezone(&Local).format("%Y-%m-%d")
                ),
                None => eprintln!("#{id} has no due date"),
            }
        }

        Command::Meta {
            id,
            topics,
            tags,
            priority,
            due,
            start,
            clear_due,
            clear_start,
            recurring,
        } => {
            let conn = open_db(&db_path)?;
            let current = ops::get_task(&conn, id)?;
            let due = match (due, clear_due) {
                (_, true) => None,
                (Some(d), false) => Some(parse_date_arg(&d)?),
                (None, false) => current.due,
            };
            let start = match (start, clear_start) {
                (_, true) => None,
                (Some(s), false) => Some(parse_date_arg(&s)?),
                (None, false) => current.start,
            };
            let meta = TaskMetadata {
                topics: topics.unwrap_or_else(|| current.topics.join(",")),
                tags: tags.unwrap_or(current.tags),
                priority: priority.unwrap_or(current.priority),
                due,
                start,
                recurring: recurring.unwrap_or(current.recurring),
            };
            ops::update_metadata(&conn, id, &meta)?;
            eprintln!("Updated #{id}");
        }

        Command::Recur { id, rule, interval } => {
            let conn = open_db(&db_path)?;
            let normalized = ops::apply_recurrence(&conn, id, &rule, interval)?;
            if normalized.recurring {
                let task = ops::get_task(&conn, id)?;
                eprintln!(
                    "#{id} repeats {}",
                    taskpad::recurrence::summary(&task)
                );
            } else {
                eprintln!("#{id} no longer repeats");
            }
        }

        Command::Notes { id, content, stdin } => {
            let conn = open_db(&db_path)?;
            let notes = read_content(content, stdin)?;
            ops::update_notes(&conn, id, &notes)?;
            eprintln!("Updated notes for #{id}");
        }

        Command::Rm { id } => {
            let conn = open_db(&db_path)?;
            ops::delete_task(&conn, &trash, id)?;
            eprintln!("Moved #{id} to trash");
        }

        Command::ClearDone => {
            let conn = open_db(&db_path)?;
            let removed = ops::delete_done_tasks(&conn, &trash)?;
            eprintln!("Moved {removed} done task(s) to trash");
        }

        Command::Topics { json } => {
            let conn = open_db(&db_path)?;
            let topics = ops::list_topics(&conn)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&topics)?);
            } else {
                print!("{}", output::format_topics(&topics));
            }
        }

        Command::Topic { action } => {
            let conn = open_db(&db_path)?;
            match action {
                TopicAction::Rename { old, new } => {
                    let moved = ops::rename_topic(&conn, &old, &new)?;
                    eprintln!("Renamed '{old}' to '{new}' on {moved} task(s)");
                }
                TopicAction::Rm { name } => {
                    let removed = ops::delete_topic(&conn, &name)?;
                    eprintln!("Removed '{name}' from {removed} task(s)");
                }
                TopicAction::Note {
                    name,
                    body,
                    stdin,
                    clear,
                } => {
                    if clear {
                        topic_notes::delete(&conn, &name)?;
                        eprintln!("Cleared note for '{name}'");
                    } else if body.is_some() || stdin {
                        let body = read_content(body, stdin)?;
                        topic_notes::set(&conn, &name, &body)?;
                        eprintln!("Updated note for '{name}'");
                    } else {
                        let note = topic_notes::get(&conn, &name)?;
                        if !note.is_empty() {
                            println!("{}", note.trim_end());
                        }
                    }
                }
            }
        }

        Command::Trash { action } => match action {
            TrashAction::List { json } => {
                let entries = trash.list()?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                } else {
                    print!("{}", output::format_trash(&entries));
                }
            }
            TrashAction::Restore { indices, all } => {
                let entries = select_entries(trash.list()?, &indices, all)?;
                let conn = open_db(&db_path)?;
                let ids = trash.restore(&conn, &entries)?;
                let ids: Vec<String> = ids.iter().map(|id| format!("#{id}")).collect();
                eprintln!("Restored {} task(s): {}", ids.len(), ids.join(", "));
            }
            TrashAction::Purge { indices, all } => {
                let entries = select_entries(trash.list()?, &indices, all)?;
                trash.purge(&entries)?;
                eprintln!("Purged {} entr(ies)", entries.len());
            }
            TrashAction::Dir => {
                println!("{}", trash.dir().display());
            }
        },

        Command::Report { json } => {
            let conn = open_db(&db_path)?;
            let tasks = ops::fetch_all(&conn)?;
            let report = Report::build(
                &tasks,
                today,
                config.recent_limit(),
                config.upcoming_days(),
            );
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", output::format_report(&report));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use taskpad::model::Task;

    fn entry(id: i64) -> TrashEntry {
        TrashEntry {
            path: PathBuf::from(format!("/tmp/{id}.json")),
            deleted_at: Utc::now(),
            task: Task {
                id,
                title: format!("t{id}"),
                done: false,
                topics: vec![],
                tags: String::new(),
                priority: 0,
                due: None,
                start: None,
                recurring: false,
                recurrence_rule: String::new(),
                recurrence_interval: 0,
                notes: String::new(),
                created_at: Utc::now(),
                completed_at: None,
            },
        }
    }

    #[test]
    fn plain_date_is_local_midnight() {
        let ts = parse_date_arg("2024-05-17").unwrap();
        let local = ts.with_timezone(&Local);
        assert_eq!(local.date_naive(), NaiveDate::from_ymd_opt(2024, 5, 17).unwrap());
        assert_eq!(local.hour(), 0);
    }

    #[test]
    fn rfc3339_date_is_accepted() {
        let ts = parse_date_arg("2024-05-17T09:30:00Z").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 5, 17, 9, 30, 0).unwrap());
        assert!(parse_date_arg("next tuesday").is_err());
    }

    #[test]
    fn select_by_one_based_index() {
        let entries = vec![entry(1), entry(2), entry(3)];
        let picked = select_entries(entries.clone(), &[3, 1], false).unwrap();
        let ids: Vec<i64> = picked.iter().map(|e| e.task.id).collect();
        assert_eq!(ids, vec![3, 1]);

        assert!(select_entries(entries.clone(), &[0], false).is_err());
        assert!(select_entries(entries.clone(), &[4], false).is_err());
        assert_eq!(select_entries(entries, &[], true).unwrap().len(), 3);
    }
}
