use std::io::{self, IsTerminal, Write};

use chrono::NaiveDate;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::controller::{Notice, NoticeLevel};
use crate::datetime::format_date;
use crate::filter::View;
use crate::stats::{Stats, TaskCounts};
use crate::task::{Priority, Task};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> Self {
        Self { color: cfg.color }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    /// Colour only when enabled and the stream being written is a terminal.
    fn ansi_for(&self, stream: &impl IsTerminal) -> bool {
        self.color && stream.is_terminal()
    }

    #[tracing::instrument(skip(self, tasks, today))]
    pub fn print_task_table(&mut self, tasks: &[&Task], today: NaiveDate) -> anyhow::Result<()> {
        let out = io::stdout().lock();
        let ansi = self.ansi_for(&out);
        self.write_task_table(out, tasks, today, ansi)
    }

    pub fn write_task_table<W: Write>(
        &self,
        mut out: W,
        tasks: &[&Task],
        today: NaiveDate,
        ansi: bool,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks here.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Done".to_string(),
            "Due".to_string(),
            "Priority".to_string(),
            "Project".to_string(),
            "Task".to_string(),
        ];

        let mut rows = Vec::with_capacity(tasks.len());

        for task in tasks {
            let done = if task.completed { "[x]" } else { "[ ]" }.to_string();

            let due = match task.due_date {
                Some(date) if date < today => paint("Overdue", "31", ansi),
                Some(date) if date == today => paint("Today", "33", ansi),
                Some(date) => format_date(date),
                None => String::new(),
            };

            let priority = match task.priority {
                Priority::High => paint(task.priority.as_str(), "31", ansi),
                Priority::Medium => paint(task.priority.as_str(), "33", ansi),
                Priority::Low => paint(task.priority.as_str(), "32", ansi),
            };

            let id = paint(&task.id, "36", ansi);
            rows.push(vec![
                id,
                done,
                due,
                priority,
                task.project.clone(),
                task.text.clone(),
            ]);
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, task))]
    pub fn print_task_info(&mut self, task: &Task) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id         {}", task.id)?;
        writeln!(out, "text       {}", task.text)?;
        writeln!(out, "completed  {}", if task.completed { "yes" } else { "no" })?;
        writeln!(out, "priority   {}", task.priority)?;
        writeln!(out, "project    {}", task.project)?;
        writeln!(
            out,
            "created    {}",
            task.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;

        if let Some(due) = task.due_date {
            writeln!(out, "due        {}", format_date(due))?;
        }
        if let Some(done) = task.completed_at {
            writeln!(out, "finished   {}", done.format("%Y-%m-%d %H:%M:%S UTC"))?;
        }
        if let Some(updated) = task.updated_at {
            writeln!(out, "updated    {}", updated.format("%Y-%m-%d %H:%M:%S UTC"))?;
        }

        Ok(())
    }

    pub fn print_summary(
        &mut self,
        view: View,
        counts: &TaskCounts,
        stats: &Stats,
    ) -> anyhow::Result<()> {
        let out = io::stdout().lock();
        let ansi = self.ansi_for(&out);
        self.write_summary(out, view, counts, stats, ansi)
    }

    pub fn write_summary<W: Write>(
        &self,
        mut out: W,
        view: View,
        counts: &TaskCounts,
        stats: &Stats,
        ansi: bool,
    ) -> anyhow::Result<()> {
        let nav = View::ALL
            .iter()
            .map(|v| {
                let label = format!("{} ({})", v.title(), counts.for_view(*v));
                if *v == view {
                    paint(&label, "1", ansi)
                } else {
                    label
                }
            })
            .collect::<Vec<_>>()
            .join("  ");
        writeln!(out, "{nav}")?;
        writeln!(
            out,
            "{} of {} tasks completed ({}%)",
            stats.completed, stats.total, stats.completion_rate
        )?;
        Ok(())
    }

    pub fn print_notices(&mut self, notices: &[Notice]) -> anyhow::Result<()> {
        let out = io::stderr().lock();
        let ansi = self.ansi_for(&out);
        self.write_notices(out, notices, ansi)
    }

    pub fn write_notices<W: Write>(
        &self,
        mut out: W,
        notices: &[Notice],
        ansi: bool,
    ) -> anyhow::Result<()> {
        for notice in notices {
            let tag = match notice.level {
                NoticeLevel::Success => paint("ok", "32", ansi),
                NoticeLevel::Info => paint("info", "36", ansi),
                NoticeLevel::Error => paint("error", "31", ansi),
            };
            writeln!(out, "{tag}: {}", notice.message)?;
        }
        Ok(())
    }
}

fn paint(text: &str, code: &str, ansi: bool) -> String {
    if !ansi {
        return text.to_string();
    }
    format!("\x1b[{code}m{text}\x1b[0m")
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
