use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tasklane",
    version,
    about = "Task tracker client for the tasks REST service",
    disable_help_subcommand = true,
    arg_required_else_help = false
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    #[arg(long = "base-url")]
    pub base_url: Option<String>,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub rest: Vec<OsString>,
}

/// Installs the stderr subscriber. `RUST_LOG` wins over the `-v`/`-q` counts.
pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.KEY=VALUE` / `rc.KEY:VALUE` overrides out of the argument
/// list before clap sees it. Everything after `--` is passed through, so a task
/// title may itself look like an override.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut rc_overrides = Vec::new();
    let mut passthrough = false;

    for (idx, arg) in raw.iter().enumerate() {
        if idx == 0 || passthrough {
            cleaned.push(arg.clone());
            continue;
        }
        if arg == "--" {
            passthrough = true;
            cleaned.push(arg.clone());
            continue;
        }
        match split_rc_override(&arg.to_string_lossy()) {
            Some((key, value)) => {
                debug!(key = %key, value = %value, "captured positional rc override");
                rc_overrides.push((key, value));
            }
            None => cleaned.push(arg.clone()),
        }
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides,
    })
}

/// The first `=` or `:` separates key from value; the key must be non-empty.
fn split_rc_override(arg: &str) -> Option<(String, String)> {
    let rest = arg.strip_prefix("rc.")?;
    let split = rest.find(['=', ':'])?;
    let key = rest[..split].trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((format!("rc.{key}"), rest[split + 1..].trim().to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub command_args: Vec<String>,
}

impl Invocation {
    #[tracing::instrument(skip(cfg, rest))]
    pub fn parse(cfg: &Config, rest: Vec<OsString>) -> anyhow::Result<Self> {
        let tokens: Vec<String> = rest
            .into_iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();

        let Some((first, args)) = tokens.split_first() else {
            let cmd = cfg
                .get("default.command")
                .unwrap_or_else(|| "shell".to_string());
            debug!(command = %cmd, "no explicit command, using default");
            return Ok(Self {
                command: cmd,
                command_args: vec![],
            });
        };

        let known = crate::commands::known_command_names();
        let command = crate::commands::expand_command_abbrev(first, &known)
            .ok_or_else(|| anyhow!("unknown or ambiguous command: {first}"))?;
        debug!(token = %first, expanded = %command, "resolved command token");

        Ok(Self {
            command: command.to_string(),
            command_args: args.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&os(&["tasklane", "rc.page.size=10", "list", "rc.color:off"]))
            .expect("preprocess");
        assert_eq!(pre.cleaned_args, os(&["tasklane", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.page.size".to_string(), "10".to_string()),
                ("rc.color".to_string(), "off".to_string()),
            ]
        );
    }

    #[test]
    fn override_split_takes_the_first_separator() {
        assert_eq!(
            split_rc_override("rc.api.base_url=http://h:9/api"),
            Some(("rc.api.base_url".to_string(), "http://h:9/api".to_string()))
        );
        assert_eq!(
            split_rc_override("rc.color:off"),
            Some(("rc.color".to_string(), "off".to_string()))
        );
        assert_eq!(split_rc_override("rc.=5"), None);
        assert_eq!(split_rc_override("rc.page size=5"), None);
        assert_eq!(split_rc_override("rc.page.size"), None);
        assert_eq!(split_rc_override("page.size=5"), None);
    }

    #[test]
    fn arguments_after_double_dash_are_not_overrides() {
        let pre = preprocess_args(&os(&["tasklane", "add", "--", "rc.page.size=10", "notes"]))
            .expect("preprocess");
        assert!(pre.rc_overrides.is_empty());
        assert_eq!(
            pre.cleaned_args,
            os(&["tasklane", "add", "--", "rc.page.size=10", "notes"])
        );
    }

    #[test]
    fn global_flags_parse_before_the_command() {
        let cli = GlobalCli::parse_from(os(&[
            "tasklane",
            "-vv",
            "--base-url",
            "http://localhost:9000/api/v1/tasks",
            "--rc",
            "page.size=3",
            "list",
            "completed",
        ]));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.base_url.as_deref(), Some("http://localhost:9000/api/v1/tasks"));
        assert_eq!(cli.rc_overrides.len(), 1);
        assert_eq!(cli.rest, os(&["list", "completed"]));
    }

    #[test]
    fn invocation_defaults_to_shell_and_expands_prefixes() {
        let cfg = Config::default();
        let inv = Invocation::parse(&cfg, vec![]).expect("default");
        assert_eq!(inv.command, "shell");

        let inv = Invocation::parse(&cfg, os(&["li", "--all"])).expect("prefix");
        assert_eq!(inv.command, "list");
        assert_eq!(inv.command_args, vec!["--all".to_string()]);

        assert!(Invocation::parse(&cfg, os(&["d", "7"])).is_err());
        assert!(Invocation::parse(&cfg, os(&["frobnicate"])).is_err());
    }
}
