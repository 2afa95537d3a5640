use std::collections::BTreeMap;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;

use crate::model::{Task, TopicSummary};
use crate::recurrence;
use crate::report::Report;
use crate::trash::TrashEntry;

const TITLE_WIDTH: usize = 40;
const NO_TOPIC: &str = "(no topic)";

#[derive(Serialize)]
pub struct TaskDetail<'a> {
    #[serde(flatten)]
    pub task: &'a Task,
    pub is_recurring: bool,
    pub next_occurrence: Option<NaiveDate>,
}

impl<'a> TaskDetail<'a> {
    pub fn new(task: &'a Task, today: NaiveDate) -> Self {
        Self {
            task,
            is_recurring: recurrence::is_recurring(task),
            next_occurrence: recurrence::next_occurrence_from(task, today),
        }
    }
}

fn date(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d").to_string()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Badges shown after a title: priority, overdue days, recurrence.
fn badges(task: &Task, today: NaiveDate) -> String {
    let mut out = String::new();
    if task.priority > 0 {
        out.push_str(&format!(" [p{}]", task.priority));
    }
    if let Some(due) = task.due {
        let due_day = due.with_timezone(&Local).date_naive();
        if !task.done && due_day < today {
            out.push_str(&format!(" [+{}d]", (today - due_day).num_days()));
        } else {
            out.push_str(&format!(" due {}", date(&due)));
        }
    }
    if recurrence::is_recurring(task) {
        out.push_str(&format!(" [recur {}]", recurrence::summary(task)));
    }
    out
}

fn task_line(task: &Task, today: NaiveDate) -> String {
    format!(
        "{} #{:<4} {}{}",
        task.icon(),
        task.id,
        task.title,
        badges(task, today)
    )
}

pub fn format_task_list(tasks: &[Task], today: NaiveDate) -> String {
    let mut out = String::new();
    for task in tasks {
        let topics = if task.topics.is_empty() {
            String::new()
        } else {
            format!("  ({})", task.topics.join(", "))
        };
        out.push_str(&format!("{}{}\n", task_line(task, today), topics));
    }
    out
}

/// Tasks grouped under their topics. A task with several topics appears under
/// each of them; tasks without topics come last.
pub fn format_by_topic(tasks: &[Task], today: NaiveDate) -> String {
    let mut groups: BTreeMap<&str, Vec<&Task>> = BTreeMap::new();
    let mut untagged = Vec::new();
    for task in tasks {
        if task.topics.is_empty() {
            untagged.push(task);
        }
        for topic in &task.topics {
            groups.entry(topic.as_str()).or_default().push(task);
        }
    }

    let mut out = String::new();
    let mut write_group = |name: &str, members: &[&Task]| {
        out.push_str(&format!("{name}\n"));
        for (i, task) in members.iter().enumerate() {
            let connector = if i == members.len() - 1 {
                "└── "
            } else {
                "├── "
            };
            out.push_str(&format!("{connector}{}\n", task_line(task, today)));
        }
    };
    for (name, members) in &groups {
        write_group(name, members);
    }
    if !untagged.is_empty() {
        write_group(NO_TOPIC, &untagged);
    }
    out
}

pub fn format_task_detail(task: &Task, today: NaiveDate) -> String {
    let mut out = String::new();
    out.push_str(&format!("Id:          {}\n", task.id));
    out.push_str(&format!("Title:       {}\n", task.title));
    out.push_str(&format!(
        "Status:      {}\n",
        if task.done { "done" } else { "open" }
    ));
    if !task.topics.is_empty() {
        out.push_str(&format!("Topics:      {}\n", task.topics.join(", ")));
    }
    let tags = task.tag_list();
    if !tags.is_empty() {
        out.push_str(&format!("Tags:        {}\n", tags.join(", ")));
    }
    out.push_str(&format!("Priority:    {}\n", task.priority));
    if let Some(ref start) = task.start {
        out.push_str(&format!("Start:       {}\n", date(start)));
    }
    if let Some(ref due) = task.due {
        out.push_str(&format!("Due:         {}\n", date(due)));
    }
    if recurrence::is_recurring(task) {
        out.push_str(&format!("Recurrence:  {}\n", recurrence::summary(task)));
        if let Some(next) = recurrence::next_occurrence_from(task, today) {
            out.push_str(&format!("Next:        {next}\n"));
        }
    }
    out.push_str(&format!("Created:     {}\n", date(&task.created_at)));
    if let Some(ref completed) = task.completed_at {
        out.push_str(&format!("Completed:   {}\n", date(completed)));
    }
    if !task.notes.trim().is_empty() {
        out.push('\n');
        out.push_str(task.notes.trim_end());
        out.push('\n');
    }
    out
}

pub fn format_topics(topics: &[TopicSummary]) -> String {
    let mut out = String::new();
    for topic in topics {
        let note = if topic.has_note { "  [note]" } else { "" };
        out.push_str(&format!(
            "{}  {}/{} open{}\n",
            topic.name, topic.open, topic.total, note
        ));
    }
    out
}

pub fn format_trash(entries: &[TrashEntry]) -> String {
    let mut out = String::new();
    for (i, entry) in entries.iter().enumerate() {
        let topics = if entry.task.topics.is_empty() {
            String::new()
        } else {
            format!("  ({})", entry.task.topics.join(", "))
        };
        out.push_str(&format!(
            "{:>3}. {}  #{} {}{}\n",
            i + 1,
            entry.deleted_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            entry.task.id,
            entry.task.title,
            topics
        ));
    }
    out
}

fn report_line(task: &Task, suffix: &str) -> String {
    format!(
        "  • #{} {:<width$}  {suffix}\n",
        task.id,
        truncate(&task.title, TITLE_WIDTH),
        width = TITLE_WIDTH
    )
}

fn report_section(out: &mut String, title: &str, tasks: &[Task]) {
    if tasks.is_empty() {
        return;
    }
    out.push_str(&format!("{title} ({})\n", tasks.len()));
    for task in tasks {
        let due = task.due.as_ref().map(date).unwrap_or_default();
        out.push_str(&report_line(task, &format!("due {due}")));
    }
    out.push('\n');
}

pub fn format_report(report: &Report) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", report.today.format("%A, %b %-d, %Y")));

    if report.all_clear() {
        out.push_str("All clear. No due tasks.\n\n");
    } else {
        report_section(&mut out, "Overdue", &report.overdue);
        report_section(&mut out, "Due Today", &report.due_today);
        report_section(
            &mut out,
            &format!("Upcoming ({}d)", report.upcoming_days),
            &report.upcoming,
        );
    }

    if !report.recurring.is_empty() {
        out.push_str(&format!("Recurring Tasks ({})\n", report.recurring.len()));
        for item in &report.recurring {
            let due = item
                .task
                .due
                .as_ref()
                .map(|d| format!("due {}", date(d)))
                .unwrap_or_else(|| "no due".to_string());
            let mut suffix = format!("[{}] {due}", item.label);
            if let Some(next) = item.next {
                suffix.push_str(&format!(" • next {next}"));
            }
            out.push_str(&report_line(&item.task, &suffix));
        }
        out.push('\n');
    }

    out.push_str(&format!("Recently Added ({})\n", report.recently_added.len()));
    for task in &report.recently_added {
        out.push_str(&report_line(task, &format!("created {}", date(&task.created_at))));
    }
    out.push('\n');

    out.push_str(&format!("Recently Done ({})\n", report.recently_done.len()));
    for task in &report.recently_done {
        let when = task
            .completed_at
            .as_ref()
            .map(date)
            .unwrap_or_else(|| "unknown".to_string());
        out.push_str(&report_line(task, &format!("done {when}")));
    }
    out
}
