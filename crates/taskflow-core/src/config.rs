use std::fmt;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;

use anyhow::{
  Context,
  anyhow,
  bail
};
use tracing::{
  debug,
  info,
  trace
};

use crate::filter::View;

const RC_ENV_VAR: &str = "TASKFLOWRC";
const RC_FILE: &str = ".taskflowrc";
const DATA_DIR: &str = ".taskflow";
const MAX_INCLUDE_DEPTH: usize = 8;

/// The settings an rc file or an
/// override may name.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
)]
pub enum Setting {
  DataLocation,
  DefaultView,
  Color,
  Confirmation
}

impl Setting {
  pub const ALL: [Setting; 4] = [
    Setting::DataLocation,
    Setting::DefaultView,
    Setting::Color,
    Setting::Confirmation
  ];

  pub fn key(self) -> &'static str {
    match self {
      | Setting::DataLocation => {
        "data.location"
      }
      | Setting::DefaultView => {
        "default.view"
      }
      | Setting::Color => "color",
      | Setting::Confirmation => {
        "confirmation"
      }
    }
  }
}

impl fmt::Display for Setting {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.key())
  }
}

impl FromStr for Setting {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let key = s.trim();
    Setting::ALL
      .into_iter()
      .find(|setting| {
        setting.key() == key
      })
      .ok_or_else(|| {
        anyhow!(
          "unknown setting '{key}' \
           (expected data.location, \
           default.view, color or \
           confirmation)"
        )
      })
  }
}

/// Effective configuration: built-in
/// defaults, then rc files, then
/// command-line overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  /// `None` means `~/.taskflow`.
  pub data_location: Option<PathBuf>,
  pub default_view:  View,
  pub color:         bool,
  pub confirmation:  bool,
  pub loaded_files:  Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Self {
      data_location: None,
      default_view:  View::Today,
      color:         true,
      confirmation:  true,
      loaded_files:  vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    match resolve_rc_path(rc_override) {
      | Some(path) => {
        info!(rc = %path.display(), "loading rc file");
        cfg.read_rc(&path, 0)?;
      }
      | None => {
        debug!(
          "no rc file found; using \
           defaults"
        )
      }
    }

    Ok(cfg)
  }

  /// Validates and stores one
  /// setting.
  pub fn set(
    &mut self,
    key: &str,
    value: &str
  ) -> anyhow::Result<()> {
    let setting =
      key.parse::<Setting>()?;
    let value = value.trim();
    match setting {
      | Setting::DataLocation => {
        if value.is_empty() {
          bail!(
            "data.location cannot be \
             empty"
          );
        }
        self.data_location = Some(
          expand_tilde(Path::new(value))
        );
      }
      | Setting::DefaultView => {
        self.default_view =
          value.parse()?;
      }
      | Setting::Color => {
        self.color =
          parse_switch(setting, value)?;
      }
      | Setting::Confirmation => {
        self.confirmation =
          parse_switch(setting, value)?;
      }
    }
    trace!(%setting, value, "setting applied");
    Ok(())
  }

  /// Applies `rc.<key>` / `<key>`
  /// overrides in order; the first
  /// invalid one aborts.
  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) -> anyhow::Result<()>
  where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (raw_key, value) in overrides {
      let key = raw_key
        .strip_prefix("rc.")
        .unwrap_or(&raw_key);
      debug!(key, value = %value, "applying override");
      self.set(key, &value).with_context(
        || {
          format!(
            "invalid override \
             {raw_key}={value}"
          )
        }
      )?;
    }
    Ok(())
  }

  /// Every setting with its effective
  /// value, in display order.
  pub fn entries(
    &self
  ) -> Vec<(Setting, String)> {
    Setting::ALL
      .into_iter()
      .map(|setting| {
        let value = match setting {
          | Setting::DataLocation => {
            self
              .data_location
              .as_ref()
              .map(|path| {
                path
                  .display()
                  .to_string()
              })
              .unwrap_or_else(|| {
                format!("~/{DATA_DIR}")
              })
          }
          | Setting::DefaultView => {
            self
              .default_view
              .to_string()
          }
          | Setting::Color => {
            switch_label(self.color)
          }
          | Setting::Confirmation => {
            switch_label(
              self.confirmation
            )
          }
        };
        (setting, value)
      })
      .collect()
  }

  fn read_rc(
    &mut self,
    path: &Path,
    depth: usize
  ) -> anyhow::Result<()> {
    if depth > MAX_INCLUDE_DEPTH {
      bail!(
        "rc includes nested deeper \
         than {MAX_INCLUDE_DEPTH} at {}",
        path.display()
      );
    }
    if self
      .loaded_files
      .iter()
      .any(|seen| seen == path)
    {
      bail!(
        "rc include cycle at {}",
        path.display()
      );
    }

    let text = fs::read_to_string(path)
      .with_context(|| {
        format!(
          "failed to read {}",
          path.display()
        )
      })?;
    self
      .loaded_files
      .push(path.to_path_buf());

    for (idx, raw_line) in
      text.lines().enumerate()
    {
      let at = || {
        format!(
          "{}:{}",
          path.display(),
          idx + 1
        )
      };
      let Some(line) =
        parse_rc_line(raw_line)
          .with_context(at)?
      else {
        continue;
      };

      match line {
        | RcLine::Include(target) => {
          let target =
            include_target(path, target);
          debug!(include = %target.display(), "following include");
          self
            .read_rc(&target, depth + 1)
            .with_context(at)?;
        }
        | RcLine::Assign(key, value) => {
          self
            .set(key, value)
            .with_context(at)?;
        }
      }
    }

    Ok(())
  }
}

#[derive(Debug, PartialEq, Eq)]
enum RcLine<'a> {
  Include(&'a str),
  Assign(&'a str, &'a str)
}

/// `None` for blank and comment-only
/// lines.
fn parse_rc_line(
  raw: &str
) -> anyhow::Result<Option<RcLine<'_>>>
{
  let line = raw
    .split_once('#')
    .map_or(raw, |(before, _)| before)
    .trim();
  if line.is_empty() {
    return Ok(None);
  }

  if line == "include" {
    bail!("include needs a path");
  }
  if let Some(target) =
    line.strip_prefix("include ")
  {
    return Ok(Some(RcLine::Include(
      target.trim()
    )));
  }

  let (key, value) = line
    .split_once('=')
    .ok_or_else(|| {
      anyhow!(
        "expected 'key = value', got \
         '{line}'"
      )
    })?;
  Ok(Some(RcLine::Assign(
    key.trim(),
    value.trim()
  )))
}

fn include_target(
  from: &Path,
  target: &str
) -> PathBuf {
  let expanded =
    expand_tilde(Path::new(target));
  if expanded.is_absolute() {
    return expanded;
  }
  from
    .parent()
    .unwrap_or_else(|| Path::new("."))
    .join(expanded)
}

fn parse_switch(
  setting: Setting,
  value: &str
) -> anyhow::Result<bool> {
  match value
    .to_ascii_lowercase()
    .as_str()
  {
    | "on" | "yes" | "true" | "1" => {
      Ok(true)
    }
    | "off" | "no" | "false" | "0" => {
      Ok(false)
    }
    | other => Err(anyhow!(
      "{setting} must be on or off, \
       got '{other}'"
    ))
  }
}

fn switch_label(on: bool) -> String {
  let label = if on { "on" } else { "off" };
  label.to_string()
}

/// `--config`, then `$TASKFLOWRC`,
/// then `~/.taskflowrc` if it exists.
fn resolve_rc_path(
  override_path: Option<&Path>
) -> Option<PathBuf> {
  if let Some(path) = override_path {
    return Some(expand_tilde(path));
  }

  if let Ok(env_path) =
    std::env::var(RC_ENV_VAR)
    && !env_path.trim().is_empty()
  {
    return Some(expand_tilde(
      Path::new(env_path.trim())
    ));
  }

  dirs::home_dir()
    .map(|home| home.join(RC_FILE))
    .filter(|candidate| {
      candidate.is_file()
    })
}

/// `--data`, then `data.location`,
/// then `~/.taskflow`.
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  if let Some(dir) = override_dir {
    return Ok(expand_tilde(dir));
  }
  if let Some(dir) = &cfg.data_location
  {
    return Ok(dir.clone());
  }
  dirs::home_dir()
    .map(|home| home.join(DATA_DIR))
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory; pass --data or \
         set data.location"
      )
    })
}

fn expand_tilde(path: &Path) -> PathBuf {
  let Ok(rest) = path.strip_prefix("~")
  else {
    return path.to_path_buf();
  };
  match dirs::home_dir() {
    | Some(home) => home.join(rest),
    | None => path.to_path_buf()
  }
}

#[cfg(test)]
mod tests {
  use std::fs;
  use std::path::PathBuf;

  use tempfile::tempdir;

  use super::{
    Config,
    RcLine,
    Setting,
    parse_rc_line,
    resolve_data_dir
  };
  use crate::filter::View;

  #[test]
  fn reads_settings_includes_and_comments()
   {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("main.rc");
    fs::write(
      temp.path().join("extra.rc"),
      "confirmation = off\n"
    )
    .expect("write include");
    fs::write(
      &rc,
      "# comment\n\
       default.view = upcoming # trailing\n\
       \n\
       include extra.rc\n"
    )
    .expect("write rc");

    let cfg =
      Config::load(Some(rc.as_path()))
        .expect("load config");
    assert_eq!(
      cfg.default_view,
      View::Upcoming
    );
    assert!(!cfg.confirmation);
    assert!(cfg.color);
    assert_eq!(cfg.loaded_files.len(), 2);
  }

  #[test]
  fn rejects_unknown_keys_and_bad_values()
  {
    let temp =
      tempdir().expect("tempdir");
    for body in [
      "colour = on\n",
      "color = purple\n",
      "default.view = someday\n",
      "color on\n"
    ] {
      let rc = temp.path().join("bad.rc");
      fs::write(&rc, body)
        .expect("write rc");
      let err =
        Config::load(Some(rc.as_path()))
          .expect_err(body);
      assert!(
        format!("{err:#}")
          .contains("bad.rc:1"),
        "{err:#}"
      );
    }
  }

  #[test]
  fn include_cycles_are_errors() {
    let temp =
      tempdir().expect("tempdir");
    let a = temp.path().join("a.rc");
    fs::write(&a, "include b.rc\n")
      .expect("write a");
    fs::write(
      temp.path().join("b.rc"),
      "include a.rc\n"
    )
    .expect("write b");
    assert!(
      Config::load(Some(a.as_path()))
        .is_err()
    );
  }

  #[test]
  fn overrides_strip_rc_prefix_and_validate()
   {
    let mut cfg = Config::default();
    cfg
      .apply_overrides(vec![
        (
          "rc.default.view".to_string(),
          "completed".to_string()
        ),
        (
          "color".to_string(),
          "off".to_string()
        ),
      ])
      .expect("overrides");
    assert_eq!(
      cfg.default_view,
      View::Completed
    );
    assert!(!cfg.color);

    assert!(
      cfg
        .apply_overrides(vec![(
          "rc.confirmation".to_string(),
          "maybe".to_string()
        )])
        .is_err()
    );
  }

  #[test]
  fn data_dir_prefers_flag_then_setting()
  {
    let mut cfg = Config::default();
    cfg
      .set("data.location", "/srv/tf")
      .expect("set");
    assert_eq!(
      resolve_data_dir(&cfg, None)
        .expect("dir"),
      PathBuf::from("/srv/tf")
    );
    assert_eq!(
      resolve_data_dir(
        &cfg,
        Some(PathBuf::from("/tmp/x").as_path())
      )
      .expect("dir"),
      PathBuf::from("/tmp/x")
    );
  }

  #[test]
  fn entries_list_every_setting() {
    let cfg = Config::default();
    let keys: Vec<Setting> = cfg
      .entries()
      .into_iter()
      .map(|(setting, _)| setting)
      .collect();
    assert_eq!(keys, Setting::ALL.to_vec());
    assert_eq!(
      cfg.entries()[1].1,
      "today"
    );
  }

  #[test]
  fn rc_lines_parse() {
    assert_eq!(
      parse_rc_line("  # only a comment")
        .expect("parse"),
      None
    );
    assert_eq!(
      parse_rc_line("include ~/more.rc")
        .expect("parse"),
      Some(RcLine::Include("~/more.rc"))
    );
    assert_eq!(
      parse_rc_line(" color=off ")
        .expect("parse"),
      Some(RcLine::Assign("color", "off"))
    );
    assert!(
      parse_rc_line("include ").is_err()
    );
  }
}
