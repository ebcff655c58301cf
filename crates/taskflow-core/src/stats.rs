use chrono::NaiveDate;
use serde::Serialize;

use crate::filter::View;
use crate::task::Task;

/// Sidebar counters. `all` counts incomplete tasks only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub today: usize,
    pub upcoming: usize,
    pub all: usize,
    pub completed: usize,
}

impl TaskCounts {
    pub fn compute(tasks: &[Task], today: NaiveDate) -> Self {
        let count = |view: View| tasks.iter().filter(|t| view.matches(t, today)).count();
        Self {
            today: count(View::Today),
            upcoming: count(View::Upcoming),
            all: tasks.iter().filter(|t| !t.completed).count(),
            completed: count(View::Completed),
        }
    }

    pub fn for_view(&self, view: View) -> usize {
        match view {
            View::Today => self.today,
            View::Upcoming => self.upcoming,
            View::All => self.all,
            View::Completed => self.completed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total: usize,
    pub completed: usize,
    /// Whole percent, 0 for an empty collection.
    pub completion_rate: u32,
}

impl Stats {
    pub fn compute(tasks: &[Task]) -> Self {
        let total = tasks.len();
        let completed = tasks.iter().filter(|t| t.completed).count();
        Self {
            total,
            completed,
            completion_rate: completion_rate(completed, total),
        }
    }
}

pub fn completion_rate(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    // Integer round-half-up of completed * 100 / total.
    let scaled = (completed as u64 * 200 + total as u64) / (total as u64 * 2);
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{Stats, TaskCounts, completion_rate};
    use crate::filter::View;
    use crate::task::{Task, TaskDraft};

    #[test]
    fn completion_rate_rounds() {
        assert_eq!(completion_rate(0, 0), 0);
        assert_eq!(completion_rate(1, 3), 33);
        assert_eq!(completion_rate(2, 3), 67);
        assert_eq!(completion_rate(1, 8), 13);
        assert_eq!(completion_rate(1, 200), 1);
        assert_eq!(completion_rate(4, 4), 100);
    }

    #[test]
    fn counts_cover_every_bucket() {
        let now = Utc
            .with_ymd_and_hms(2026, 10, 16, 9, 0, 0)
            .single()
            .expect("valid now");
        let today = NaiveDate::from_ymd_opt(2026, 10, 16).expect("valid date");
        let make = |id: &str, due: Option<NaiveDate>| {
            let mut draft = TaskDraft::new(id);
            draft.due_date = due;
            Task::new(id.to_string(), id.to_string(), &draft, now)
        };

        let mut done = make("done", None);
        done.set_completed(true, now);
        let tasks = vec![
            make("undated", None),
            make("tomorrow", NaiveDate::from_ymd_opt(2026, 10, 17)),
            make("next-week", NaiveDate::from_ymd_opt(2026, 10, 23)),
            done,
        ];

        let counts = TaskCounts::compute(&tasks, today);
        assert_eq!(
            counts,
            TaskCounts {
                today: 1,
                upcoming: 1,
                all: 3,
                completed: 1,
            }
        );
        assert_eq!(counts.for_view(View::Upcoming), 1);

        let stats = Stats::compute(&tasks);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.completion_rate, 25);
    }
}
