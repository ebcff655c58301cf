use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::anyhow;
use clap::{ArgAction, Parser};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::commands::{expand_command_abbrev, known_command_names};

/// One configuration override, from `--rc key=value` or a positional
/// `rc.key=value` / `rc.key:value` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcOverride {
    pub key: String,
    pub value: String,
}

impl FromStr for RcOverride {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("rc.").unwrap_or(s);
        let split = match (s.find('='), s.find(':')) {
            (Some(eq), Some(colon)) => eq.min(colon),
            (Some(at), None) | (None, Some(at)) => at,
            (None, None) => return Err(anyhow!("expected KEY=VALUE, got: {s}")),
        };
        let key = s[..split].trim();
        if key.is_empty() {
            return Err(anyhow!("override has no key: {s}"));
        }
        Ok(Self {
            key: key.to_string(),
            value: s[split + 1..].trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskflow",
    version,
    about = "TaskFlow: local task lists with per-user accounts",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    /// More log output (repeatable).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Less log output (repeatable).
    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,

    /// Override a setting for this run.
    #[arg(long = "rc", value_name = "KEY=VALUE")]
    pub rc_overrides: Vec<RcOverride>,

    /// Read settings from this file instead of ~/.taskflowrc.
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Keep data in this directory.
    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    /// Answer yes to every confirmation prompt.
    #[arg(short = 'y', long = "yes")]
    pub yes: bool,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub rest: Vec<OsString>,
}

/// Lifts positional `rc.` overrides out of the raw arguments so clap never
/// sees them. Tokens after a bare `--` are left alone.
#[tracing::instrument(skip_all)]
pub fn split_rc_overrides(raw: Vec<OsString>) -> (Vec<OsString>, Vec<RcOverride>) {
    let mut args = Vec::with_capacity(raw.len());
    let mut overrides = Vec::new();
    let mut literal = false;

    for (idx, arg) in raw.into_iter().enumerate() {
        let lifted = match arg.to_str() {
            Some("--") => {
                literal = true;
                None
            }
            Some(token) if idx > 0 && !literal && token.starts_with("rc.") => {
                token.parse::<RcOverride>().ok()
            }
            _ => None,
        };

        match lifted {
            Some(one) => {
                debug!(key = %one.key, value = %one.value, "positional rc override");
                overrides.push(one);
            }
            None => args.push(arg),
        }
    }

    (args, overrides)
}

/// Default filter directive for a `-v`/`-q` count.
pub fn log_directive(verbose: u8, quiet: u8) -> &'static str {
    match (quiet, verbose) {
        (2.., _) => "error",
        (1, _) | (0, 0) => "warn",
        (0, 1) => "info",
        (0, 2) => "debug",
        _ => "trace",
    }
}

/// Logs go to stderr so tables on stdout stay clean. `RUST_LOG` wins over
/// the flags.
pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_directive(verbose, quiet))
            .map_err(|e| anyhow!("invalid log filter: {e}"))?,
    };

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(verbose >= 2)
        .with_ansi(io::stderr().is_terminal())
        .try_init();

    if let Err(err) = installed {
        debug!(error = %err, "tracing already initialised");
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: String,
    pub args: Vec<String>,
}

impl Invocation {
    #[tracing::instrument(skip(rest))]
    pub fn parse(rest: Vec<OsString>) -> anyhow::Result<Self> {
        let mut tokens = rest
            .into_iter()
            .map(|arg| arg.to_string_lossy().to_string());

        let Some(first) = tokens.next() else {
            debug!("no explicit command, using default list");
            return Ok(Self {
                command: "list".to_string(),
                args: vec![],
            });
        };

        let known = known_command_names();
        let command = expand_command_abbrev(&first, &known)
            .ok_or_else(|| anyhow!("unknown or ambiguous command: {first}"))?;
        debug!(token = %first, expanded = %command, "resolved command token");

        Ok(Self {
            command: command.to_string(),
            args: tokens.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::Parser;

    use super::{GlobalCli, Invocation, RcOverride, log_directive, split_rc_overrides};

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    fn rc(key: &str, value: &str) -> RcOverride {
        RcOverride {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn lifts_positional_overrides_until_double_dash() {
        let (args, overrides) = split_rc_overrides(os(&[
            "taskflow",
            "rc.color=off",
            "add",
            "rc.default.view:all",
            "--",
            "rc.note=kept",
        ]));
        assert_eq!(args, os(&["taskflow", "add", "--", "rc.note=kept"]));
        assert_eq!(overrides, vec![rc("color", "off"), rc("default.view", "all")]);
    }

    #[test]
    fn override_splits_on_first_separator() {
        let parsed: RcOverride = "data.location=C:/tasks".parse().expect("parse");
        assert_eq!(parsed, rc("data.location", "C:/tasks"));
        assert!("rc.=x".parse::<RcOverride>().is_err());
        assert!("color".parse::<RcOverride>().is_err());
    }

    #[test]
    fn rc_flag_goes_through_the_same_parser() {
        let cli = GlobalCli::parse_from(os(&["taskflow", "--rc", "color=off", "-y", "list"]));
        assert_eq!(cli.rc_overrides, vec![rc("color", "off")]);
        assert!(cli.yes);
        assert_eq!(cli.rest, os(&["list"]));
    }

    #[test]
    fn verbosity_maps_to_directives() {
        assert_eq!(log_directive(0, 0), "warn");
        assert_eq!(log_directive(1, 0), "info");
        assert_eq!(log_directive(2, 0), "debug");
        assert_eq!(log_directive(5, 0), "trace");
        assert_eq!(log_directive(3, 1), "warn");
        assert_eq!(log_directive(0, 2), "error");
    }

    #[test]
    fn empty_invocation_lists() {
        let inv = Invocation::parse(vec![]).expect("parse");
        assert_eq!(inv.command, "list");
        assert!(inv.args.is_empty());
    }

    #[test]
    fn expands_unique_abbreviations() {
        let inv = Invocation::parse(os(&["imp", "backup.json"])).expect("parse");
        assert_eq!(inv.command, "import");
        assert_eq!(inv.args, vec!["backup.json".to_string()]);
        assert!(Invocation::parse(os(&["s"])).is_err());
    }
}
