use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::commands::{expand_command_abbrev, known_command_names};
use crate::config::Config;

/// Command line with positional `rc.KEY=VALUE` tokens pulled out.
#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "checklet",
    version,
    about = "Checklet: per-user todo lists from the terminal",
    disable_help_subcommand = true,
    arg_required_else_help = false
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,

    /// Setting override, e.g. `--rc default.filter=active`.
    #[arg(long = "rc", value_name = "KEY=VALUE", value_parser = rc_pair, action = ArgAction::Append)]
    pub rc_overrides: Vec<(String, String)>,

    #[arg(long = "checkletrc")]
    pub checkletrc: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    /// Password for register/login; falls back to $CHECKLET_PASSWORD.
    #[arg(long = "password")]
    pub password: Option<String>,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub rest: Vec<OsString>,
}

fn rc_pair(s: &str) -> anyhow::Result<(String, String)> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
    let key = k.trim();
    if key.is_empty() {
        return Err(anyhow!("missing key in {s}"));
    }
    Ok((key.to_string(), v.trim().to_string()))
}

/// `-q` beats `-v`; without either only warnings are shown.
fn log_level(verbose: u8, quiet: u8) -> &'static str {
    match (quiet, verbose) {
        (2.., _) => "error",
        (1, _) | (0, 0) => "warn",
        (0, 1) => "info",
        (0, 2) => "debug",
        (0, _) => "trace",
    }
}

/// Logs go to stderr so command output stays clean. `RUST_LOG` wins over
/// the verbosity flags.
pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level(verbose, quiet)))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();
    if let Err(err) = installed {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }
    Ok(())
}

/// Pulls `rc.key=value` / `rc.key:value` tokens out of the argument list,
/// keeping the binary name in place.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> PreprocessedArgs {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut rc_overrides = Vec::new();

    for (idx, arg) in raw.iter().enumerate() {
        let positional = (idx > 0)
            .then(|| arg.to_str())
            .flatten()
            .and_then(|s| s.strip_prefix("rc."))
            .and_then(|rest| rest.split_once(['=', ':']));
        match positional {
            Some((k, v)) => {
                debug!(key = k, value = v, "captured positional rc override");
                rc_overrides.push((k.to_string(), v.to_string()));
            }
            None => cleaned.push(arg.clone()),
        }
    }

    PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub command_args: Vec<String>,
}

impl Invocation {
    #[tracing::instrument(skip(cfg, rest))]
    pub fn parse(cfg: &Config, rest: Vec<OsString>) -> anyhow::Result<Self> {
        let mut tokens = rest
            .into_iter()
            .map(|arg| arg.to_string_lossy().to_string());

        let Some(first) = tokens.next() else {
            let cmd = cfg
                .get("default.command")
                .unwrap_or_else(|| "list".to_string());
            debug!(command = %cmd, "no explicit command, using default");
            return Ok(Self {
                command: cmd,
                command_args: vec![],
            });
        };

        let known = known_command_names();
        let command = expand_command_abbrev(&first, &known)
            .ok_or_else(|| anyhow!("unknown or ambiguous command: {first}"))?
            .to_string();
        debug!(token = %first, expanded = %command, "resolved command token");

        Ok(Self {
            command,
            command_args: tokens.collect(),
        })
    }
}
