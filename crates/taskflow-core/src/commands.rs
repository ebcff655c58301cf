use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};

use crate::cli::Invocation;
use crate::config::Config;
use crate::controller::{Confirm, TaskController};
use crate::datetime::{local_today, parse_due_date};
use crate::filter::View;
use crate::kvstore::KeyValueStore;
use crate::render::Renderer;
use crate::task::{Priority, TaskDraft};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "signup", "signin", "signout", "whoami", "add", "list", "ls", "info", "done", "toggle",
        "edit", "delete", "clear", "import", "export", "stats", "projects", "show", "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

/// Confirmation that asks on the terminal unless told to assume yes.
#[derive(Debug, Clone, Copy)]
pub struct PromptConfirm {
    pub assume_yes: bool,
}

impl Confirm for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        match prompt_line(&format!("{prompt} [y/N] ")) {
            Ok(answer) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(err) => {
                warn!(error = %err, "could not read confirmation; treating as no");
                false
            }
        }
    }
}

#[instrument(skip(ctl, cfg, renderer, inv, confirm))]
pub fn dispatch<S: KeyValueStore>(
    ctl: &mut TaskController<S>,
    cfg: &Config,
    renderer: &mut Renderer,
    inv: Invocation,
    confirm: &mut impl Confirm,
) -> anyhow::Result<()> {
    let now = Utc::now();
    debug!(command = %inv.command, args = ?inv.args, "dispatching command");

    let result = execute(ctl, cfg, renderer, &inv, confirm, now);
    renderer.print_notices(&ctl.take_notices())?;
    result
}

pub fn execute<S: KeyValueStore>(
    ctl: &mut TaskController<S>,
    cfg: &Config,
    renderer: &mut Renderer,
    inv: &Invocation,
    confirm: &mut impl Confirm,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let args = inv.args.as_slice();
    match inv.command.as_str() {
        "signup" => cmd_signup(ctl, args),
        "signin" => cmd_signin(ctl, args),
        "signout" => cmd_signout(ctl),
        "whoami" => cmd_whoami(ctl),
        "add" => cmd_add(ctl, args, now),
        "list" | "ls" => cmd_list(ctl, cfg, renderer, args, now),
        "info" => cmd_info(ctl, renderer, args),
        "done" | "toggle" => cmd_toggle(ctl, args, now),
        "edit" => cmd_edit(ctl, args, now),
        "delete" => cmd_delete(ctl, args, confirm),
        "clear" => cmd_clear(ctl, confirm),
        "import" => cmd_import(ctl, args, confirm, now),
        "export" => cmd_export(ctl, args, now),
        "stats" => cmd_stats(ctl, cfg, renderer, now),
        "projects" => cmd_projects(ctl),
        "show" => cmd_show(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

#[instrument(skip(ctl, args))]
fn cmd_signup<S: KeyValueStore>(
    ctl: &mut TaskController<S>,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command signup");
    let (username, password) = credentials_from_args(args)?;
    let account = ctl.sign_up(&username, &password)?;
    println!("Created account {} and signed in.", account.username);
    Ok(())
}

#[instrument(skip(ctl, args))]
fn cmd_signin<S: KeyValueStore>(
    ctl: &mut TaskController<S>,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command signin");
    let (username, password) = credentials_from_args(args)?;
    let account = ctl.sign_in(&username, &password)?;
    println!(
        "Signed in as {} ({} task(s)).",
        account.username,
        ctl.tasks().len()
    );
    Ok(())
}

fn cmd_signout<S: KeyValueStore>(ctl: &mut TaskController<S>) -> anyhow::Result<()> {
    info!("command signout");
    ctl.sign_out()?;
    println!("Signed out.");
    Ok(())
}

fn cmd_whoami<S: KeyValueStore>(ctl: &mut TaskController<S>) -> anyhow::Result<()> {
    match ctl.current_user() {
        Some(user) => println!("{user}"),
        None => println!("Not signed in."),
    }
    Ok(())
}

#[instrument(skip(ctl, args, now))]
fn cmd_add<S: KeyValueStore>(
    ctl: &mut TaskController<S>,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command add");
    require_user(ctl)?;

    let today = local_today(now);
    let (words, mods) = parse_words_and_mods(args, today)?;
    let mut draft = TaskDraft::new(words.join(" "));
    apply_mods(&mut draft, &mods);

    match ctl.add_task(&draft, now) {
        Some(task) => println!("Created task {}.", task.id),
        None if draft.trimmed_text().is_none() => {
            return Err(anyhow!("add: task text is required"));
        }
        None => {}
    }
    Ok(())
}

#[instrument(skip(ctl, cfg, renderer, args, now))]
fn cmd_list<S: KeyValueStore>(
    ctl: &mut TaskController<S>,
    cfg: &Config,
    renderer: &mut Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command list");
    require_user(ctl)?;

    let today = local_today(now);
    let (words, mods) = parse_words_and_mods(args, today)?;
    ctl.set_view(cfg.default_view);

    // Bare words are always search text; views are chosen with `view:`.
    if !words.is_empty() {
        ctl.set_search(&words.join(" "));
    }

    for one_mod in &mods {
        match one_mod {
            Mod::View(view) => ctl.set_view(*view),
            Mod::Project(project) => ctl.set_project_filter(project),
            Mod::Search(term) => ctl.set_search(term),
            Mod::Priority(priority) => {
                ctl.toggle_priority_filter(*priority);
            }
            Mod::Due(_) => warn!("due: is not a list filter; ignored"),
        }
    }

    println!("{}", ctl.view().title());
    renderer.print_task_table(&ctl.filtered_tasks(today), today)?;
    Ok(())
}

#[instrument(skip(ctl, renderer, args))]
fn cmd_info<S: KeyValueStore>(
    ctl: &mut TaskController<S>,
    renderer: &mut Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    require_user(ctl)?;
    let id = single_id(args, "info")?;
    let task = ctl
        .task(id)
        .ok_or_else(|| anyhow!("no task with id {id}"))?;
    renderer.print_task_info(task)
}

#[instrument(skip(ctl, args, now))]
fn cmd_toggle<S: KeyValueStore>(
    ctl: &mut TaskController<S>,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command toggle");
    require_user(ctl)?;
    let id = single_id(args, "done")?;

    let completed = ctl.toggle_task(id, now).map(|task| task.completed);
    match completed {
        Some(true) => println!("Completed task {id}."),
        Some(false) => println!("Reopened task {id}."),
        None if ctl.task(id).is_none() => return Err(anyhow!("no task with id {id}")),
        None => {}
    }
    Ok(())
}

#[instrument(skip(ctl, args, now))]
fn cmd_edit<S: KeyValueStore>(
    ctl: &mut TaskController<S>,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command edit");
    require_user(ctl)?;

    let Some((id, rest)) = args.split_first() else {
        return Err(anyhow!("edit requires a task id"));
    };
    let current = ctl
        .task(id)
        .ok_or_else(|| anyhow!("no task with id {id}"))?;

    // Start from the stored values so unspecified fields are kept.
    let mut draft = TaskDraft {
        text: current.text.clone(),
        due_date: current.due_date,
        priority: current.priority,
        project: current.project.clone(),
    };
    let (words, mods) = parse_words_and_mods(rest, local_today(now))?;
    if !words.is_empty() {
        draft.text = words.join(" ");
    }
    apply_mods(&mut draft, &mods);

    if ctl.edit_task(id, &draft, now).is_some() {
        println!("Modified task {id}.");
    }
    Ok(())
}

#[instrument(skip(ctl, args, confirm))]
fn cmd_delete<S: KeyValueStore>(
    ctl: &mut TaskController<S>,
    args: &[String],
    confirm: &mut impl Confirm,
) -> anyhow::Result<()> {
    info!("command delete");
    require_user(ctl)?;
    let id = single_id(args, "delete")?;
    if ctl.task(id).is_none() {
        return Err(anyhow!("no task with id {id}"));
    }

    if ctl.delete_task(id, confirm) {
        println!("Deleted task {id}.");
    }
    Ok(())
}

#[instrument(skip(ctl, confirm))]
fn cmd_clear<S: KeyValueStore>(
    ctl: &mut TaskController<S>,
    confirm: &mut impl Confirm,
) -> anyhow::Result<()> {
    info!("command clear");
    require_user(ctl)?;
    ctl.clear_all(confirm);
    Ok(())
}

#[instrument(skip(ctl, args, confirm, now))]
fn cmd_import<S: KeyValueStore>(
    ctl: &mut TaskController<S>,
    args: &[String],
    confirm: &mut impl Confirm,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command import");
    require_user(ctl)?;

    let source = args
        .first()
        .ok_or_else(|| anyhow!("import requires a file path (or - for stdin)"))?;
    let raw = if source == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed reading stdin")?;
        buf
    } else {
        fs::read_to_string(source).with_context(|| format!("failed reading {source}"))?
    };

    if ctl.import_collection(&raw, confirm, now) {
        println!("Imported {} task(s).", ctl.tasks().len());
    }
    Ok(())
}

#[instrument(skip(ctl, args, now))]
fn cmd_export<S: KeyValueStore>(
    ctl: &mut TaskController<S>,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command export");
    require_user(ctl)?;

    let target = args.first().map(String::as_str);
    let written = ctl.export_collection(local_today(now), |export| match target {
        Some("-") => {
            let mut out = io::stdout().lock();
            writeln!(out, "{}", export.contents)?;
            Ok(None)
        }
        target => {
            let path = export_target(target.map(Path::new), &export.file_name);
            fs::write(&path, &export.contents)
                .with_context(|| format!("failed writing {}", path.display()))?;
            Ok(Some(path))
        }
    })?;

    if let Some(path) = written {
        println!("Exported {} task(s) to {}.", ctl.tasks().len(), path.display());
    }
    Ok(())
}

#[instrument(skip(ctl, cfg, renderer, now))]
fn cmd_stats<S: KeyValueStore>(
    ctl: &mut TaskController<S>,
    cfg: &Config,
    renderer: &mut Renderer,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    require_user(ctl)?;
    let today = local_today(now);
    renderer.print_summary(cfg.default_view, &ctl.counts(today), &ctl.stats())
}

fn cmd_projects<S: KeyValueStore>(ctl: &mut TaskController<S>) -> anyhow::Result<()> {
    require_user(ctl)?;
    for project in ctl.projects() {
        println!("{project}");
    }
    Ok(())
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    for (setting, value) in cfg.entries() {
        println!("{setting}={value}");
    }
    for file in &cfg.loaded_files {
        println!("# read {}", file.display());
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "Commands: signup, signin, signout, whoami, add, list, info, done, edit, delete, clear, import, export, stats, projects, show"
    );
    println!("Modifiers: due:<date> priority:<low|medium|high> project:<name> view:<view> search:<text>");
    println!("list: bare words search task text; pick a view with view:today|upcoming|all|completed");
    Ok(())
}

fn require_user<S: KeyValueStore>(ctl: &TaskController<S>) -> anyhow::Result<()> {
    if ctl.current_user().is_none() {
        return Err(anyhow!(
            "not signed in; run `taskflow signin <username>` or `taskflow signup <username>`"
        ));
    }
    Ok(())
}

fn single_id<'a>(args: &'a [String], command: &str) -> anyhow::Result<&'a str> {
    match args {
        [id] => Ok(id.as_str()),
        [] => Err(anyhow!("{command} requires a task id")),
        _ => Err(anyhow!("{command} takes exactly one task id")),
    }
}

fn credentials_from_args(args: &[String]) -> anyhow::Result<(String, String)> {
    let username = args.first().cloned().unwrap_or_default();
    let password = match args.get(1) {
        Some(password) => password.clone(),
        None => prompt_line("Password: ")?,
    };
    Ok((username, password))
}

fn export_target(target: Option<&Path>, file_name: &str) -> PathBuf {
    match target {
        Some(path) if path.is_dir() => path.join(file_name),
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(file_name),
    }
}

fn prompt_line(prompt: &str) -> anyhow::Result<String> {
    let mut err = io::stderr().lock();
    write!(err, "{prompt}")?;
    err.flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed reading stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mod {
    Due(Option<NaiveDate>),
    Priority(Priority),
    Project(String),
    View(View),
    Search(String),
}

fn parse_words_and_mods(
    args: &[String],
    today: NaiveDate,
) -> anyhow::Result<(Vec<String>, Vec<Mod>)> {
    let mut words = Vec::new();
    let mut mods = Vec::new();

    let mut literal = false;
    for arg in args {
        if arg == "--" {
            literal = true;
            continue;
        }

        if !literal && let Some(one_mod) = parse_one_mod(arg, today)? {
            mods.push(one_mod);
            continue;
        }

        words.push(arg.clone());
    }

    Ok((words, mods))
}

fn parse_one_mod(tok: &str, today: NaiveDate) -> anyhow::Result<Option<Mod>> {
    let Some((key, value)) = tok.split_once(':') else {
        return Ok(None);
    };

    match key.to_ascii_lowercase().as_str() {
        "due" => Ok(Some(Mod::Due(parse_due_date(value, today)?))),
        "pri" | "priority" => Ok(Some(Mod::Priority(value.parse()?))),
        "project" | "proj" => Ok(Some(Mod::Project(value.to_string()))),
        "view" => Ok(Some(Mod::View(value.parse()?))),
        "search" => Ok(Some(Mod::Search(value.to_string()))),
        _ => Ok(None),
    }
}

fn apply_mods(draft: &mut TaskDraft, mods: &[Mod]) {
    for one_mod in mods {
        match one_mod {
            Mod::Due(due) => draft.due_date = *due,
            Mod::Priority(priority) => draft.priority = *priority,
            Mod::Project(project) => draft.project = project.clone(),
            Mod::View(_) | Mod::Search(_) => {
                debug!(?one_mod, "list-only modifier ignored");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use tempfile::tempdir;

    use super::{Mod, execute, parse_words_and_mods};
    use crate::cli::Invocation;
    use crate::config::Config;
    use crate::controller::{NoticeLevel, TaskController};
    use crate::datetime::local_today;
    use crate::filter::View;
    use crate::kvstore::MemoryStore;
    use crate::render::Renderer;
    use crate::task::Priority;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    fn invocation(command: &str, args: &[&str]) -> Invocation {
        Invocation {
            command: command.to_string(),
            args: strings(args),
        }
    }

    fn test_config() -> Config {
        Config::default()
    }

    #[test]
    fn splits_words_from_modifiers() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 16).expect("valid date");
        let (words, mods) = parse_words_and_mods(
            &strings(&["Buy", "milk", "due:tomorrow", "pri:high", "project:home", "--", "a:b"]),
            today,
        )
        .expect("parse");

        assert_eq!(words, strings(&["Buy", "milk", "a:b"]));
        assert_eq!(
            mods,
            vec![
                Mod::Due(NaiveDate::from_ymd_opt(2026, 10, 17)),
                Mod::Priority(Priority::High),
                Mod::Project("home".to_string()),
            ]
        );
    }

    #[test]
    fn unknown_keys_stay_in_text_and_bad_values_fail() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 16).expect("valid date");
        let (words, mods) =
            parse_words_and_mods(&strings(&["note:", "this"]), today).expect("parse");
        assert_eq!(words, strings(&["note:", "this"]));
        assert!(mods.is_empty());

        assert!(parse_words_and_mods(&strings(&["pri:urgent"]), today).is_err());
        assert!(parse_words_and_mods(&strings(&["view:someday"]), today).is_err());
    }

    #[test]
    fn task_commands_require_a_session() {
        let cfg = test_config();
        let mut ctl = TaskController::new(MemoryStore::new());
        let mut renderer = Renderer::plain();
        let now = Utc::now();
        let err = execute(
            &mut ctl,
            &cfg,
            &mut renderer,
            &invocation("add", &["x"]),
            &mut |_: &str| true,
            now,
        )
        .expect_err("must be signed in");
        assert!(err.to_string().contains("not signed in"));
    }

    #[test]
    fn add_edit_toggle_delete_through_commands() {
        let cfg = test_config();
        let mut ctl = TaskController::new(MemoryStore::new());
        let mut renderer = Renderer::plain();
        let mut yes = |_: &str| true;
        let now = Utc
            .with_ymd_and_hms(2026, 10, 16, 12, 0, 0)
            .single()
            .expect("valid now");

        execute(&mut ctl, &cfg, &mut renderer, &invocation("signup", &["Alice", "pw1"]), &mut yes, now)
            .expect("signup");
        execute(
            &mut ctl,
            &cfg,
            &mut renderer,
            &invocation("add", &["Buy", "milk", "pri:low"]),
            &mut yes,
            now,
        )
        .expect("add");
        let id = ctl.tasks()[0].id.clone();
        assert_eq!(ctl.tasks()[0].text, "Buy milk");
        assert_eq!(ctl.tasks()[0].priority, Priority::Low);

        let later = now + Duration::minutes(1);
        execute(
            &mut ctl,
            &cfg,
            &mut renderer,
            &invocation("edit", &[id.as_str(), "project:work"]),
            &mut yes,
            later,
        )
        .expect("edit");
        let task = ctl.task(&id).expect("task");
        assert_eq!(task.text, "Buy milk");
        assert_eq!(task.project, "work");
        assert_eq!(task.priority, Priority::Low);
        assert_eq!(task.updated_at, Some(later));

        execute(&mut ctl, &cfg, &mut renderer, &invocation("done", &[id.as_str()]), &mut yes, later)
            .expect("toggle");
        assert!(ctl.task(&id).expect("task").completed);

        execute(
            &mut ctl,
            &cfg,
            &mut renderer,
            &invocation("list", &["view:completed", "project:work"]),
            &mut yes,
            later,
        )
        .expect("list");
        assert_eq!(ctl.view(), View::Completed);
        assert_eq!(ctl.filtered_tasks(local_today(later)).len(), 1);

        execute(&mut ctl, &cfg, &mut renderer, &invocation("delete", &[id.as_str()]), &mut yes, later)
            .expect("delete");
        assert!(ctl.tasks().is_empty());
        assert!(
            execute(&mut ctl, &cfg, &mut renderer, &invocation("delete", &[id.as_str()]), &mut yes, later)
                .is_err()
        );
    }

    #[test]
    fn list_words_search_instead_of_switching_view() {
        let cfg = test_config();
        let mut ctl = TaskController::new(MemoryStore::new());
        let mut renderer = Renderer::plain();
        let mut yes = |_: &str| true;
        let now = Utc
            .with_ymd_and_hms(2026, 10, 16, 12, 0, 0)
            .single()
            .expect("valid now");

        execute(&mut ctl, &cfg, &mut renderer, &invocation("signup", &["dan", "pw"]), &mut yes, now)
            .expect("signup");
        execute(&mut ctl, &cfg, &mut renderer, &invocation("add", &["mark", "done", "later"]), &mut yes, now)
            .expect("add");
        execute(&mut ctl, &cfg, &mut renderer, &invocation("add", &["other"]), &mut yes, now)
            .expect("add");

        execute(&mut ctl, &cfg, &mut renderer, &invocation("list", &["done"]), &mut yes, now)
            .expect("list");
        assert_eq!(ctl.view(), View::Today);
        assert_eq!(ctl.query().search(), "done");
        let found = ctl.filtered_tasks(local_today(now));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "mark done later");
    }

    #[test]
    fn failed_export_write_reports_no_success() {
        let cfg = test_config();
        let mut ctl = TaskController::new(MemoryStore::new());
        let mut renderer = Renderer::plain();
        let mut yes = |_: &str| true;
        let now = Utc::now();
        execute(&mut ctl, &cfg, &mut renderer, &invocation("signup", &["erin", "pw"]), &mut yes, now)
            .expect("signup");
        execute(&mut ctl, &cfg, &mut renderer, &invocation("add", &["x"]), &mut yes, now)
            .expect("add");
        ctl.take_notices();

        let temp = tempdir().expect("tempdir");
        let missing = temp.path().join("no-such-dir").join("out.json");
        let missing = missing.to_string_lossy().to_string();
        assert!(
            execute(&mut ctl, &cfg, &mut renderer, &invocation("export", &[missing.as_str()]), &mut yes, now)
                .is_err()
        );
        assert!(
            ctl.take_notices()
                .iter()
                .all(|n| n.level != NoticeLevel::Success)
        );

        let target = temp.path().to_string_lossy().to_string();
        execute(&mut ctl, &cfg, &mut renderer, &invocation("export", &[target.as_str()]), &mut yes, now)
            .expect("export into directory");
        let written = fs::read_dir(temp.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .any(|entry| entry.file_name().to_string_lossy().starts_with("taskflow-backup-"));
        assert!(written);
        assert_eq!(ctl.take_notices()[0].level, NoticeLevel::Success);
    }
}
