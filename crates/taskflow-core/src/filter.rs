use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDate;
use tracing::trace;

use crate::datetime::tomorrow;
use crate::task::{
  Priority,
  Task
};

pub const ALL_PROJECTS: &str = "all";

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
)]
pub enum View {
  #[default]
  Today,
  Upcoming,
  All,
  Completed
}

impl View {
  pub const ALL: [View; 4] = [
    View::Today,
    View::Upcoming,
    View::All,
    View::Completed
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      | View::Today => "today",
      | View::Upcoming => "upcoming",
      | View::All => "all",
      | View::Completed => "completed"
    }
  }

  pub fn title(self) -> &'static str {
    match self {
      | View::Today => "Today",
      | View::Upcoming => "Upcoming",
      | View::All => "All Tasks",
      | View::Completed => "Completed"
    }
  }

  /// Bucket membership for a single
  /// task.
  ///
  /// `Upcoming` compares strictly
  /// against tomorrow, so an
  /// incomplete task due exactly
  /// tomorrow lands in neither `Today`
  /// nor `Upcoming`.
  pub fn matches(
    self,
    task: &Task,
    today: NaiveDate
  ) -> bool {
    match self {
      | View::Today => {
        !task.completed
          && task
            .due_date
            .is_none_or(|due| due <= today)
      }
      | View::Upcoming => {
        let tomorrow = tomorrow(today);
        !task.completed
          && task
            .due_date
            .is_some_and(|due| due > tomorrow)
      }
      | View::Completed => task.completed,
      | View::All => true
    }
  }
}

impl fmt::Display for View {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for View {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "today" => Ok(View::Today),
      | "upcoming" => Ok(View::Upcoming),
      | "all" => Ok(View::All),
      | "completed" | "done" => {
        Ok(View::Completed)
      }
      | other => Err(anyhow!(
        "unknown view: {other} \
         (expected today, upcoming, \
         all or completed)"
      ))
    }
  }
}

/// Project axis of the list filter:
/// everything, or one exact project
/// name.
#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Eq,
)]
pub enum ProjectFilter {
  #[default]
  All,
  Only(String)
}

impl ProjectFilter {
  pub fn matches(
    &self,
    task: &Task
  ) -> bool {
    match self {
      | ProjectFilter::All => true,
      | ProjectFilter::Only(project) => {
        task.project == *project
      }
    }
  }
}

impl From<&str> for ProjectFilter {
  fn from(value: &str) -> Self {
    if value == ALL_PROJECTS {
      ProjectFilter::All
    } else {
      ProjectFilter::Only(
        value.to_string()
      )
    }
  }
}

impl fmt::Display for ProjectFilter {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    match self {
      | ProjectFilter::All => {
        f.write_str(ALL_PROJECTS)
      }
      | ProjectFilter::Only(project) => {
        f.write_str(project)
      }
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
  pub view:       View,
  pub project:    ProjectFilter,
  /// Stored lowercased; empty means
  /// no search.
  search:         String,
  /// Empty means every priority.
  pub priorities: BTreeSet<Priority>
}

impl TaskQuery {
  pub fn new(view: View) -> Self {
    Self {
      view,
      ..Self::default()
    }
  }

  pub fn search(&self) -> &str {
    &self.search
  }

  pub fn set_search(
    &mut self,
    term: &str
  ) {
    self.search = term.to_lowercase();
  }

  pub fn clear_search(&mut self) {
    self.search.clear();
  }

  /// Flips membership of `priority` in
  /// the priority filter. Returns
  /// whether it is now active.
  pub fn toggle_priority(
    &mut self,
    priority: Priority
  ) -> bool {
    if self.priorities.remove(&priority)
    {
      false
    } else {
      self.priorities.insert(priority);
      true
    }
  }

  pub fn matches(
    &self,
    task: &Task,
    today: NaiveDate
  ) -> bool {
    self.view.matches(task, today)
      && self.project.matches(task)
      && (self.search.is_empty()
        || task
          .text
          .to_lowercase()
          .contains(&self.search))
      && (self.priorities.is_empty()
        || self
          .priorities
          .contains(&task.priority))
  }
}

/// Applies view, project, search and
/// priority filters in that order,
/// preserving collection order.
#[tracing::instrument(skip(
  tasks, query
), fields(view = %query.view, project = %query.project))]
pub fn filter_tasks<'a>(
  tasks: &'a [Task],
  query: &TaskQuery,
  today: NaiveDate
) -> Vec<&'a Task> {
  let out: Vec<&Task> = tasks
    .iter()
    .filter(|task| {
      query.matches(task, today)
    })
    .collect();
  trace!(
    total = tasks.len(),
    matched = out.len(),
    "filtered tasks"
  );
  out
}
