use std::collections::BTreeSet;
use std::fmt;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::accounts::{Account, AccountError, AccountStore};
use crate::filter::{ProjectFilter, TaskQuery, View, filter_tasks};
use crate::kvstore::{KeyValueStore, tasks_key};
use crate::stats::{Stats, TaskCounts};
use crate::task::{Priority, Task, TaskDraft, next_task_id};
use crate::transfer::{Export, export_tasks, parse_import};

pub const DELETE_PROMPT: &str = "Are you sure you want to delete this task?";
pub const CLEAR_PROMPT: &str = "Are you sure you want to delete all tasks? This cannot be undone.";
pub const IMPORT_PROMPT: &str = "This will replace all current tasks. Continue?";

/// Asks the user to approve a destructive operation.
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&str) -> bool,
{
    fn confirm(&mut self, prompt: &str) -> bool {
        self(prompt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NoticeLevel::Success => "success",
            NoticeLevel::Info => "info",
            NoticeLevel::Error => "error",
        })
    }
}

/// Transient user-facing message produced by an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Application state for one signed-in (or signed-out) session: the user's
/// task collection, the list filters and pending notices.
///
/// Every mutation rewrites the whole collection under the user's key. When
/// that write fails the in-memory collection is restored and an error
/// notice is queued.
///
/// Stored records are loaded leniently, the same way imports are. If the
/// stored collection still cannot be read, it is left untouched on disk and
/// every write is refused until a later reload succeeds.
#[derive(Debug)]
pub struct TaskController<S> {
    store: S,
    user: Option<String>,
    tasks: Vec<Task>,
    load_error: Option<String>,
    query: TaskQuery,
    notices: Vec<Notice>,
}

impl<S: KeyValueStore> TaskController<S> {
    pub fn new(store: S) -> Self {
        let mut controller = Self {
            store,
            user: None,
            tasks: vec![],
            load_error: None,
            query: TaskQuery::default(),
            notices: vec![],
        };
        controller.on_user_changed();
        controller
    }

    pub fn with_view(mut self, view: View) -> Self {
        self.query.view = view;
        self
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn accounts(&mut self) -> AccountStore<&mut S> {
        AccountStore::new(&mut self.store)
    }

    pub fn current_user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn sign_up(&mut self, username: &str, password: &str) -> Result<Account, AccountError> {
        let account = self.accounts().sign_up(username, password)?;
        self.on_user_changed();
        Ok(account)
    }

    pub fn sign_in(&mut self, username: &str, password: &str) -> Result<Account, AccountError> {
        let account = self.accounts().sign_in(username, password)?;
        self.on_user_changed();
        Ok(account)
    }

    pub fn sign_out(&mut self) -> anyhow::Result<()> {
        self.accounts().sign_out()?;
        self.on_user_changed();
        Ok(())
    }

    /// Re-reads the session pointer and the matching collection.
    #[instrument(skip(self))]
    pub fn on_user_changed(&mut self) {
        self.user = match self.accounts().current_user() {
            Ok(user) => user,
            Err(err) => {
                warn!(error = %err, "failed reading current user; treating as signed out");
                None
            }
        };
        match self.load_tasks(Utc::now()) {
            Ok(tasks) => {
                self.tasks = tasks;
                self.load_error = None;
                info!(user = ?self.user, tasks = self.tasks.len(), "loaded task collection");
            }
            Err(err) => {
                let reason = format!("{err:#}");
                error!(user = ?self.user, error = %reason, "error loading tasks; writes blocked");
                self.tasks = vec![];
                self.load_error = Some(reason);
                self.notify(
                    NoticeLevel::Error,
                    "Error loading tasks. Changes will not be saved until they can be read.",
                );
            }
        }
    }

    /// Why the stored collection could not be read, if it could not.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    fn storage_key(&self) -> String {
        tasks_key(self.user.as_deref())
    }

    fn load_tasks(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Task>> {
        let key = self.storage_key();
        let Some(raw) = self
            .store
            .get(&key)
            .with_context(|| format!("failed reading {key}"))?
        else {
            return Ok(vec![]);
        };
        parse_import(&raw, now).with_context(|| format!("unreadable collection under {key}"))
    }

    /// Writes the collection, or restores `previous` on failure.
    fn persist(&mut self, previous: Vec<Task>) -> bool {
        let key = self.storage_key();
        if self.load_error.is_some() {
            warn!(key = %key, "stored collection was never loaded; refusing to overwrite it");
            self.tasks = previous;
            self.notify(
                NoticeLevel::Error,
                "Error saving tasks. Stored tasks could not be loaded, so nothing was written.",
            );
            return false;
        }

        let result = serde_json::to_string(&self.tasks)
            .map_err(anyhow::Error::from)
            .and_then(|raw| self.store.set(&key, &raw));

        match result {
            Ok(()) => {
                debug!(key = %key, count = self.tasks.len(), "saved tasks");
                true
            }
            Err(err) => {
                error!(key = %key, error = %err, "error saving tasks");
                self.tasks = previous;
                self.notify(NoticeLevel::Error, "Error saving tasks. Please try again.");
                false
            }
        }
    }

    fn notify(&mut self, level: NoticeLevel, message: &str) {
        self.notices.push(Notice {
            level,
            message: message.to_string(),
        });
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Prepends a new open task. Does nothing when the text is blank.
    #[instrument(skip(self, draft, now))]
    pub fn add_task(&mut self, draft: &TaskDraft, now: DateTime<Utc>) -> Option<&Task> {
        let Some(text) = draft.trimmed_text() else {
            debug!("ignoring task with empty text");
            return None;
        };

        let previous = self.tasks.clone();
        let id = next_task_id(now, &self.tasks);
        let task = Task::new(id, text.to_string(), draft, now);
        info!(id = %task.id, "adding task");
        self.tasks.insert(0, task);

        if !self.persist(previous) {
            return None;
        }
        self.notify(NoticeLevel::Success, "Task added successfully!");
        self.tasks.first()
    }

    #[instrument(skip(self, now))]
    pub fn toggle_task(&mut self, id: &str, now: DateTime<Utc>) -> Option<&Task> {
        let idx = self.tasks.iter().position(|task| task.id == id)?;

        let previous = self.tasks.clone();
        let task = &mut self.tasks[idx];
        let completed = !task.completed;
        task.set_completed(completed, now);
        info!(completed, "toggled task");

        if !self.persist(previous) {
            return None;
        }
        if completed {
            self.notify(NoticeLevel::Success, "Task completed!");
        } else {
            self.notify(NoticeLevel::Info, "Task uncompleted");
        }
        self.tasks.get(idx)
    }

    /// Overwrites text, due date, priority and project.
    #[instrument(skip(self, draft, now))]
    pub fn edit_task(
        &mut self,
        id: &str,
        draft: &TaskDraft,
        now: DateTime<Utc>,
    ) -> Option<&Task> {
        let idx = self.tasks.iter().position(|task| task.id == id)?;
        let Some(text) = draft.trimmed_text() else {
            self.notify(NoticeLevel::Error, "Task text cannot be empty.");
            return None;
        };

        let previous = self.tasks.clone();
        let text = text.to_string();
        self.tasks[idx].apply_draft(text, draft, now);
        info!("edited task");

        if !self.persist(previous) {
            return None;
        }
        self.notify(NoticeLevel::Success, "Task updated successfully!");
        self.tasks.get(idx)
    }

    #[instrument(skip(self, confirm))]
    pub fn delete_task(&mut self, id: &str, confirm: &mut impl Confirm) -> bool {
        if self.task(id).is_none() {
            debug!("no task with that id");
            return false;
        }
        if !confirm.confirm(DELETE_PROMPT) {
            debug!("delete declined");
            return false;
        }

        let previous = self.tasks.clone();
        self.tasks.retain(|task| task.id != id);
        if !self.persist(previous) {
            return false;
        }
        self.notify(NoticeLevel::Info, "Task deleted successfully!");
        true
    }

    #[instrument(skip(self, confirm))]
    pub fn clear_all(&mut self, confirm: &mut impl Confirm) -> bool {
        if !confirm.confirm(CLEAR_PROMPT) {
            debug!("clear declined");
            return false;
        }

        let previous = std::mem::take(&mut self.tasks);
        info!(removed = previous.len(), "clearing all tasks");
        if !self.persist(previous) {
            return false;
        }
        self.notify(NoticeLevel::Info, "All tasks cleared!");
        true
    }

    /// Replaces the whole collection with an exported payload. A payload
    /// that fails to parse leaves the collection untouched.
    #[instrument(skip(self, raw, confirm, now))]
    pub fn import_collection(
        &mut self,
        raw: &str,
        confirm: &mut impl Confirm,
        now: DateTime<Utc>,
    ) -> bool {
        let imported = match parse_import(raw, now) {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(error = %err, "rejected import payload");
                self.notify(
                    NoticeLevel::Error,
                    "Error importing tasks. Invalid file format.",
                );
                return false;
            }
        };
        if !confirm.confirm(IMPORT_PROMPT) {
            debug!("import declined");
            return false;
        }

        info!(count = imported.len(), "replacing collection with import");
        let previous = std::mem::replace(&mut self.tasks, imported);
        if !self.persist(previous) {
            return false;
        }
        self.notify(NoticeLevel::Success, "Tasks imported successfully!");
        true
    }

    /// Serializes the collection and hands it to `deliver`. Success is
    /// only reported once `deliver` has succeeded.
    #[instrument(skip(self, deliver))]
    pub fn export_collection<T>(
        &mut self,
        today: NaiveDate,
        deliver: impl FnOnce(&Export) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let export = export_tasks(&self.tasks, today)?;
        let delivered = deliver(&export)?;
        info!(file = %export.file_name, count = self.tasks.len(), "exported tasks");
        self.notify(NoticeLevel::Success, "Tasks exported successfully!");
        Ok(delivered)
    }

    pub fn query(&self) -> &TaskQuery {
        &self.query
    }

    pub fn view(&self) -> View {
        self.query.view
    }

    pub fn set_view(&mut self, view: View) {
        debug!(%view, "view changed");
        self.query.view = view;
    }

    pub fn set_project_filter(&mut self, filter: &str) {
        self.query.project = ProjectFilter::from(filter);
    }

    pub fn set_search(&mut self, term: &str) {
        self.query.set_search(term);
    }

    pub fn clear_search(&mut self) {
        self.query.clear_search();
    }

    pub fn toggle_priority_filter(&mut self, priority: Priority) -> bool {
        self.query.toggle_priority(priority)
    }

    /// Closes transient UI state; the only such state held here is search.
    pub fn dismiss(&mut self) {
        self.clear_search();
    }

    pub fn filtered_tasks(&self, today: NaiveDate) -> Vec<&Task> {
        filter_tasks(&self.tasks, &self.query, today)
    }

    pub fn counts(&self, today: NaiveDate) -> TaskCounts {
        TaskCounts::compute(&self.tasks, today)
    }

    pub fn stats(&self) -> Stats {
        Stats::compute(&self.tasks)
    }

    pub fn projects(&self) -> BTreeSet<&str> {
        self.tasks.iter().map(|task| task.project.as_str()).collect()
    }
}
