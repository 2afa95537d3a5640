//! Recurrence rules and next-occurrence scheduling.
//!
//! Rules follow a small grammar, case-insensitive and whitespace tolerant:
//!
//! ```text
//! every [N] (day|days|week|weeks|month|months) [on <weekday>]
//! (daily|weekly|monthly) [on <weekday>]
//! ```
//!
//! Anything else is an opaque rule: it is stored and displayed verbatim, and
//! scheduling falls back to the task's day interval when it has one.
//!
//! All scheduling happens on calendar days in local time. A next occurrence is
//! always strictly after "today".

use std::fmt;

use chrono::{Datelike, Days, Local, Months, NaiveDate, Weekday};

use crate::model::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Day,
    Week,
    Month,
}

impl Unit {
    fn parse(word: &str) -> Option<Self> {
        match word {
            "day" | "days" => Some(Self::Day),
            "week" | "weeks" => Some(Self::Week),
            "month" | "months" => Some(Self::Month),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecurrenceSpec {
    pub every: u32,
    pub unit: Unit,
    pub weekday: Option<Weekday>,
}

impl RecurrenceSpec {
    /// Parse a rule string. Returns `None` for opaque rules.
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_lowercase();
        if lowered.is_empty() {
            return None;
        }

        let (every, unit, rest) = if let Some(rest) = lowered.strip_prefix("every") {
            let rest = rest.trim_start();
            let digits_end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            let every = match &rest[..digits_end] {
                "" => 1,
                n => n.parse::<u32>().ok()?.max(1),
            };
            let rest = rest[digits_end..].trim_start();
            let unit_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            let unit = Unit::parse(&rest[..unit_end])?;
            (every, unit, &rest[unit_end..])
        } else {
            let word_end = lowered.find(char::is_whitespace).unwrap_or(lowered.len());
            let unit = match &lowered[..word_end] {
                "daily" => Unit::Day,
                "weekly" => Unit::Week,
                "monthly" => Unit::Month,
                _ => return None,
            };
            (1, unit, &lowered[word_end..])
        };

        let mut words = rest.split_whitespace();
        let weekday = match words.next() {
            None => None,
            Some("on") => Some(parse_weekday(words.next()?)?),
            Some(_) => return None,
        };
        if words.next().is_some() {
            return None;
        }

        Some(Self {
            every,
            unit,
            weekday,
        })
    }

    /// First date strictly after `today` produced by stepping from `base`.
    pub fn next_after(&self, base: NaiveDate, today: NaiveDate) -> Option<NaiveDate> {
        match (self.unit, self.weekday) {
            (Unit::Day, _) => next_by_days(base, today, i64::from(self.every)),
            (Unit::Week, None) => next_by_days(base, today, i64::from(self.every) * 7),
            (Unit::Week, Some(wd)) => next_weekly_on(base, today, self.every, wd),
            (Unit::Month, None) => next_by_months(base, today, self.every),
            (Unit::Month, Some(wd)) => next_monthly_on(base, today, self.every, wd),
        }
    }
}

impl fmt::Display for RecurrenceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.every == 1 {
            write!(f, "every {}", self.unit.as_str())?;
        } else {
            write!(f, "every {} {}s", self.every, self.unit.as_str())?;
        }
        if let Some(wd) = self.weekday {
            write!(f, " on {wd}")?;
        }
        Ok(())
    }
}

fn parse_weekday(word: &str) -> Option<Weekday> {
    match word {
        "mon" | "monday" => Some(Weekday::Mon),
        "tue" | "tues" | "tuesday" => Some(Weekday::Tue),
        "wed" | "wednesday" => Some(Weekday::Wed),
        "thu" | "thur" | "thurs" | "thursday" => Some(Weekday::Thu),
        "fri" | "friday" => Some(Weekday::Fri),
        "sat" | "saturday" => Some(Weekday::Sat),
        "sun" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

pub fn parse_rule(raw: &str) -> Option<RecurrenceSpec> {
    RecurrenceSpec::parse(raw)
}

fn rule_is_set(rule: &str) -> bool {
    let rule = rule.trim();
    !rule.is_empty() && !rule.eq_ignore_ascii_case("none")
}

/// A task recurs if its flag is set or it carries a rule other than "none".
pub fn is_recurring(task: &Task) -> bool {
    task.recurring || rule_is_set(&task.recurrence_rule)
}

/// The calendar day scheduling starts from: due, else start, else created.
pub fn base_date(task: &Task) -> NaiveDate {
    let ts = task.due.or(task.start).unwrap_or(task.created_at);
    ts.with_timezone(&Local).date_naive()
}

pub fn next_occurrence(task: &Task) -> Option<NaiveDate> {
    next_occurrence_from(task, Local::now().date_naive())
}

pub fn next_occurrence_from(task: &Task, today: NaiveDate) -> Option<NaiveDate> {
    if !is_recurring(task) {
        return None;
    }
    let base = base_date(task);
    if let Some(spec) = RecurrenceSpec::parse(&task.recurrence_rule) {
        return spec.next_after(base, today);
    }
    if task.recurrence_interval > 0 {
        return next_by_days(base, today, task.recurrence_interval);
    }
    None
}

/// Short label for list badges: the canonical rule, the raw rule, or "recur".
pub fn rule_label(task: &Task) -> String {
    if let Some(spec) = RecurrenceSpec::parse(&task.recurrence_rule) {
        return spec.to_string();
    }
    if rule_is_set(&task.recurrence_rule) {
        return task.recurrence_rule.trim().to_string();
    }
    "recur".to_string()
}

/// Detail line for a recurring task, empty when it does not recur.
pub fn summary(task: &Task) -> String {
    if !is_recurring(task) {
        return String::new();
    }
    if let Some(spec) = RecurrenceSpec::parse(&task.recurrence_rule) {
        return spec.to_string();
    }
    let rule = if rule_is_set(&task.recurrence_rule) {
        task.recurrence_rule.trim()
    } else {
        "custom"
    };
    if task.recurrence_interval > 0 {
        format!("{rule}/{}d", task.recurrence_interval)
    } else {
        rule.to_string()
    }
}

/// Rule input after normalisation, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRule {
    pub rule: String,
    pub interval: i64,
    pub recurring: bool,
}

/// Canonicalise user input: parsed rules are stored by label with no interval,
/// an interval without a rule becomes `every N days`, and nothing at all
/// becomes `none`. Opaque rules are kept verbatim alongside their interval.
pub fn normalize(raw_rule: &str, interval: i64) -> NormalizedRule {
    let raw = raw_rule.trim();
    let interval = interval.max(0);
    if let Some(spec) = RecurrenceSpec::parse(raw) {
        return NormalizedRule {
            rule: spec.to_string(),
            interval: 0,
            recurring: true,
        };
    }
    if rule_is_set(raw) {
        return NormalizedRule {
            rule: raw.to_string(),
            interval,
            recurring: true,
        };
    }
    match u32::try_from(interval) {
        Ok(days) if days > 0 => NormalizedRule {
            rule: RecurrenceSpec {
                every: days,
                unit: Unit::Day,
                weekday: None,
            }
            .to_string(),
            interval: 0,
            recurring: true,
        },
        _ => NormalizedRule {
            rule: "none".to_string(),
            interval: 0,
            recurring: false,
        },
    }
}

fn next_by_days(base: NaiveDate, today: NaiveDate, interval: i64) -> Option<NaiveDate> {
    if interval <= 0 || base > today {
        return Some(base);
    }
    let elapsed = (today - base).num_days();
    let steps = elapsed / interval + 1;
    base.checked_add_days(Days::new(u64::try_from(steps * interval).ok()?))
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.weekday().num_days_from_monday()))
}

fn next_weekly_on(base: NaiveDate, today: NaiveDate, every: u32, weekday: Weekday) -> Option<NaiveDate> {
    let every = u64::from(every.max(1));
    let base_week = week_start(base);
    let mut weeks = u64::try_from((week_start(today) - base_week).num_weeks()).unwrap_or(0);
    loop {
        let candidate = base_week
            .checked_add_days(Days::new(weeks * 7 + u64::from(weekday.num_days_from_monday())))?;
        if candidate > today {
            return Some(candidate);
        }
        weeks += every;
    }
}

fn next_by_months(base: NaiveDate, today: NaiveDate, every: u32) -> Option<NaiveDate> {
    let every = every.max(1);
    let mut months = 0u32;
    loop {
        // Always offset from the base so a clamped day (Jan 31 -> Feb 29)
        // does not carry into later months.
        let candidate = base.checked_add_months(Months::new(months))?;
        if candidate > today {
            return Some(candidate);
        }
        months = months.checked_add(every)?;
    }
}

fn first_weekday_of_month(month_start: NaiveDate, weekday: Weekday) -> Option<NaiveDate> {
    let offset = (7 + weekday.num_days_from_monday() - month_start.weekday().num_days_from_monday()) % 7;
    month_start.checked_add_days(Days::new(u64::from(offset)))
}

fn next_monthly_on(base: NaiveDate, today: NaiveDate, every: u32, weekday: Weekday) -> Option<NaiveDate> {
    let every = every.max(1);
    let first = base.with_day(1)?;
    let mut months = 0u32;
    loop {
        let candidate = first_weekday_of_month(first.checked_add_months(Months::new(months))?, weekday)?;
        if candidate > today {
            return Some(candidate);
        }
        months = months.checked_add(every)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn task_due(y: i32, m: u32, d: u32, rule: &str) -> Task {
        let due = Local
            .with_ymd_and_hms(y, m, d, 12, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        Task {
            id: 1,
            title: "t".into(),
            done: false,
            topics: vec![],
            tags: String::new(),
            priority: 0,
            due: Some(due),
            start: None,
            recurring: false,
            recurrence_rule: rule.into(),
            recurrence_interval: 0,
            notes: String::new(),
            created_at: Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap(),
            completed_at: None,
        }
    }

    #[test]
    fn parse_every_forms() {
        let spec = parse_rule("every 3 days").unwrap();
        assert_eq!((spec.every, spec.unit, spec.weekday), (3, Unit::Day, None));

        let spec = parse_rule("  EVERY week ").unwrap();
        assert_eq!((spec.every, spec.unit), (1, Unit::Week));

        let spec = parse_rule("every 2 weeks on Friday").unwrap();
        assert_eq!(spec.weekday, Some(Weekday::Fri));
        assert_eq!(spec.to_string(), "every 2 weeks on Fri");

        let spec = parse_rule("every2months").unwrap();
        assert_eq!((spec.every, spec.unit), (2, Unit::Month));
    }

    #[test]
    fn parse_aliases() {
        assert_eq!(parse_rule("daily").unwrap().to_string(), "every day");
        assert_eq!(parse_rule("Weekly on mon").unwrap().to_string(), "every week on Mon");
        assert_eq!(parse_rule("monthly").unwrap().to_string(), "every month");
    }

    #[test]
    fn parse_rejects_unknown_text() {
        assert!(parse_rule("").is_none());
        assert!(parse_rule("none").is_none());
        assert!(parse_rule("every fortnight").is_none());
        assert!(parse_rule("every week on funday").is_none());
        assert!(parse_rule("weekly at noon").is_none());
        assert!(parse_rule("every day on mon extra").is_none());
    }

    #[test]
    fn zero_count_is_one() {
        assert_eq!(parse_rule("every 0 days").unwrap().every, 1);
    }

    #[test]
    fn day_steps_strictly_after_today() {
        let t = task_due(2024, 1, 1, "every 3 days");
        assert_eq!(next_occurrence_from(&t, date(2024, 1, 5)), Some(date(2024, 1, 7)));
        // Landing exactly on today moves on to the next step.
        assert_eq!(next_occurrence_from(&t, date(2024, 1, 7)), Some(date(2024, 1, 10)));
    }

    #[test]
    fn future_base_is_next() {
        let t = task_due(2024, 3, 1, "every 3 days");
        assert_eq!(next_occurrence_from(&t, date(2024, 1, 5)), Some(date(2024, 3, 1)));
    }

    #[test]
    fn weekly_on_weekday() {
        let t = task_due(2024, 1, 1, "every 2 weeks on Fri");
        assert_eq!(next_occurrence_from(&t, date(2024, 1, 10)), Some(date(2024, 1, 12)));
        assert_eq!(next_occurrence_from(&t, date(2024, 1, 12)), Some(date(2024, 1, 26)));
    }

    #[test]
    fn weekly_without_weekday_is_seven_day_steps() {
        let t = task_due(2024, 1, 1, "weekly");
        assert_eq!(next_occurrence_from(&t, date(2024, 1, 8)), Some(date(2024, 1, 15)));
    }

    #[test]
    fn monthly_on_weekday_uses_first_weekday() {
        let t = task_due(2024, 1, 10, "every 1 month on Mon");
        // January's first Monday (Jan 1) has passed.
        assert_eq!(next_occurrence_from(&t, date(2024, 1, 20)), Some(date(2024, 2, 5)));
        assert_eq!(next_occurrence_from(&t, date(2024, 2, 5)), Some(date(2024, 3, 4)));
    }

    #[test]
    fn monthly_keeps_day_of_month() {
        let t = task_due(2024, 1, 31, "monthly");
        assert_eq!(next_occurrence_from(&t, date(2024, 2, 10)), Some(date(2024, 2, 29)));
        assert_eq!(next_occurrence_from(&t, date(2024, 3, 1)), Some(date(2024, 3, 31)));
    }

    #[test]
    fn opaque_rule_uses_interval() {
        let mut t = task_due(2024, 1, 1, "whenever");
        assert_eq!(next_occurrence_from(&t, date(2024, 1, 5)), None);
        t.recurrence_interval = 10;
        assert_eq!(next_occurrence_from(&t, date(2024, 1, 5)), Some(date(2024, 1, 11)));
    }

    #[test]
    fn non_recurring_has_no_next() {
        let t = task_due(2024, 1, 1, "none");
        assert!(!is_recurring(&t));
        assert_eq!(next_occurrence_from(&t, date(2024, 1, 5)), None);
    }

    #[test]
    fn flag_alone_marks_recurring() {
        let mut t = task_due(2024, 1, 1, "none");
        t.recurring = true;
        assert!(is_recurring(&t));
        assert_eq!(summary(&t), "custom");
        t.recurrence_interval = 4;
        assert_eq!(summary(&t), "custom/4d");
        assert_eq!(rule_label(&t), "recur");
    }

    #[test]
    fn base_prefers_due_then_start_then_created() {
        let mut t = task_due(2024, 1, 1, "");
        assert_eq!(base_date(&t), date(2024, 1, 1));
        t.start = t.due.map(|d| d + chrono::Duration::days(2));
        t.due = None;
        assert_eq!(base_date(&t), date(2024, 1, 3));
        t.start = None;
        assert_eq!(base_date(&t), t.created_at.with_timezone(&Local).date_naive());
    }

    #[test]
    fn normalize_input() {
        assert_eq!(
            normalize("Every 2 Weeks on fri", 5),
            NormalizedRule {
                rule: "every 2 weeks on Fri".into(),
                interval: 0,
                recurring: true
            }
        );
        assert_eq!(
            normalize("", 3),
            NormalizedRule {
                rule: "every 3 days".into(),
                interval: 0,
                recurring: true
            }
        );
        assert_eq!(
            normalize("none", 0),
            NormalizedRule {
                rule: "none".into(),
                interval: 0,
                recurring: false
            }
        );
        assert_eq!(
            normalize("after payday", 14),
            NormalizedRule {
                rule: "after payday".into(),
                interval: 14,
                recurring: true
            }
        );
    }
}
