use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "taskpad", about = "Personal task list with topics, recurrence and a trash")]
pub struct Cli {
    /// Path to the SQLite database [default: ~/.taskpad/taskpad.db]
    #[arg(long, env = "TASKPAD_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Trash directory for deleted tasks [default: ~/.taskpad/trash]
    #[arg(long, env = "TASKPAD_TRASH", global = true)]
    pub trash: Option<PathBuf>,

    /// Config file [default: ~/.taskpad/config.toml]
    #[arg(long, env = "TASKPAD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Add a task
    Add {
        /// Task title
        title: String,
        /// Comma separated topics
        #[arg(short, long)]
        topics: Option<String>,
        /// Priority (0-5)
        #[arg(short, long)]
        priority: Option<i64>,
        /// Due date (YYYY-MM-DD)
        #[arg(short, long)]
        due: Option<String>,
    },

    /// List tasks
    List {
        /// Show open and done tasks
        #[arg(long, conflicts_with = "done")]
        all: bool,
        /// Show only done tasks
        #[arg(long)]
        done: bool,
        /// Only tasks in this topic
        #[arg(long)]
        topic: Option<String>,
        /// Case-insensitive title search
        #[arg(long)]
        search: Option<String>,
        /// Sort order (auto, state, due, priority, created, id)
        #[arg(long)]
        sort: Option<String>,
        /// Group tasks under their topics
        #[arg(long)]
        tree: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show task details
    Show {
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Mark a task as done
    Done { id: i64 },

    /// Mark a done task as open again
    Undo { id: i64 },

    /// Rename a task
    Title { id: i64, title: String },

    /// Set a task's priority (clamped to 0-5)
    Priority { id: i64, priority: i64 },

    /// Move a task's due date by a number of days
    Due {
        id: i64,
        /// Days to shift (negative moves earlier)
        #[arg(allow_negative_numbers = true)]
        days: i64,
    },

    /// Edit topics, tags, priority and dates. Omitted fields keep their value.
    Meta {
        id: i64,
        /// Comma separated topics (empty string clears)
        #[arg(long)]
        topics: Option<String>,
        /// Free-form tags
        #[arg(long)]
        tags: Option<String>,
        #[arg(long)]
        priority: Option<i64>,
        /// Due date (YYYY-MM-DD or RFC 3339)
        #[arg(long, conflicts_with = "clear_due")]
        due: Option<String>,
        /// Start date (YYYY-MM-DD or RFC 3339)
        #[arg(long, conflicts_with = "clear_start")]
        start: Option<String>,
        /// Remove the due date
        #[arg(long)]
        clear_due: bool,
        /// Remove the start date
        #[arg(long)]
        clear_start: bool,
        /// Set the recurring flag
        #[arg(long)]
        recurring: Option<bool>,
    },

    /// Set a recurrence rule ("every 2 weeks on fri", "monthly", "none")
    Recur {
        id: i64,
        /// Rule text; omit to use only --interval
        #[arg(default_value = "")]
        rule: String,
        /// Repeat every N days when no rule is given
        #[arg(short, long, default_value = "0")]
        interval: i64,
    },

    /// Replace a task's notes
    Notes {
        id: i64,
        /// New notes (omit to read from stdin)
        content: Option<String>,
        /// Read notes from stdin
        #[arg(long)]
        stdin: bool,
    },

    /// Move a task to the trash
    Rm { id: i64 },

    /// Move all done tasks to the trash
    ClearDone,

    /// List topics with task counts
    Topics {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage a topic
    Topic {
        #[command(subcommand)]
        action: TopicAction,
    },

    /// Inspect and restore deleted tasks
    Trash {
        #[command(subcommand)]
        action: TrashAction,
    },

    /// Overdue, due and upcoming tasks plus recent activity
    Report {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum TopicAction {
    /// Rename a topic, merging into an existing one
    Rename { old: String, new: String },

    /// Remove a topic from all tasks and drop its note
    Rm { name: String },

    /// Show or replace a topic's note
    Note {
        name: String,
        /// New note body (omit to show the current note)
        body: Option<String>,
        /// Read the note body from stdin
        #[arg(long, conflicts_with = "body")]
        stdin: bool,
        /// Delete the note
        #[arg(long, conflicts_with_all = ["body", "stdin"])]
        clear: bool,
    },
}

#[derive(Subcommand)]
pub enum TrashAction {
    /// List trash entries, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Restore entries by their 1-based index in `trash list`
    Restore {
        #[arg(required_unless_present = "all")]
        indices: Vec<usize>,
        #[arg(long, conflicts_with = "indices")]
        all: bool,
    },

    /// Permanently delete entries by their 1-based index in `trash list`
    Purge {
        #[arg(required_unless_present = "all")]
        indices: Vec<usize>,
        #[arg(long, conflicts_with = "indices")]
        all: bool,
    },

    /// Print the trash directory
    Dir,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn negative_due_shift() {
        let cli = Cli::try_parse_from(["taskpad", "due", "3", "-2"]).unwrap();
        match cli.command {
            Command::Due { id, days } => assert_eq!((id, days), (3, -2)),
            _ => panic!("expected due"),
        }
    }

    #[test]
    fn trash_restore_needs_selection() {
        assert!(Cli::try_parse_from(["taskpad", "trash", "restore"]).is_err());
        assert!(Cli::try_parse_from(["taskpad", "trash", "restore", "--all"]).is_ok());
        assert!(Cli::try_parse_from(["taskpad", "trash", "restore", "1", "3"]).is_ok());
    }
}
