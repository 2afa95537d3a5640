use chrono::{Days, Local, NaiveDate};
use serde::Serialize;

use crate::model::Task;
use crate::recurrence;

#[derive(Debug, Clone, Serialize)]
pub struct RecurringItem {
    pub task: Task,
    pub label: String,
    pub next: Option<NaiveDate>,
}

/// Reminder overview of a task list as of one calendar day.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub today: NaiveDate,
    pub upcoming_days: u64,
    pub overdue: Vec<Task>,
    pub due_today: Vec<Task>,
    pub upcoming: Vec<Task>,
    pub recurring: Vec<RecurringItem>,
    pub recently_added: Vec<Task>,
    pub recently_done: Vec<Task>,
}

fn local_date(ts: &chrono::DateTime<chrono::Utc>) -> NaiveDate {
    ts.with_timezone(&Local).date_naive()
}

impl Report {
    pub fn build(tasks: &[Task], today: NaiveDate, recent_limit: usize, upcoming_days: u64) -> Self {
        let horizon = today
            .checked_add_days(Days::new(upcoming_days))
            .unwrap_or(NaiveDate::MAX);

        let mut report = Report {
            today,
            upcoming_days,
            overdue: Vec::new(),
            due_today: Vec::new(),
            upcoming: Vec::new(),
            recurring: Vec::new(),
            recently_added: Vec::new(),
            recently_done: Vec::new(),
        };

        for task in tasks.iter().filter(|t| !t.done) {
            if recurrence::is_recurring(task) {
                report.recurring.push(RecurringItem {
                    task: task.clone(),
                    label: recurrence::rule_label(task),
                    next: recurrence::next_occurrence_from(task, today),
                });
            }
            let Some(due) = task.due.as_ref().map(local_date) else {
                continue;
            };
            if due < today {
                report.overdue.push(task.clone());
            } else if due == today {
                report.due_today.push(task.clone());
            } else if due < horizon {
                report.upcoming.push(task.clone());
            }
        }

        let mut added = tasks.to_vec();
        added.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        added.truncate(recent_limit);
        report.recently_added = added;

        let mut done: Vec<Task> = tasks.iter().filter(|t| t.done).cloned().collect();
        done.sort_by(|a, b| match (a.completed_at, b.completed_at) {
            (Some(x), Some(y)) => y.cmp(&x).then_with(|| b.id.cmp(&a.id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b.id.cmp(&a.id),
        });
        done.truncate(recent_limit);
        report.recently_done = done;

        report
    }

    pub fn all_clear(&self) -> bool {
        self.overdue.is_empty() && self.due_today.is_empty() && self.upcoming.is_empty()
    }
}
