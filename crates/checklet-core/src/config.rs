use std::collections::HashMap;
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
  trace,
  warn
};

const RC_ENV_VAR: &str = "CHECKLETRC";
const RC_FILE_NAME: &str =
  ".checkletrc";

/// Every key checklet reads, with its built-in value.
const DEFAULTS: [(&str, &str); 5] = [
  ("data.location", "~/.checklet"),
  ("default.command", "list"),
  ("default.priority", "medium"),
  ("default.filter", "all"),
  ("color", "on")
];

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

/// One meaningful line of a checkletrc.
#[derive(Debug, PartialEq, Eq)]
enum RcLine<'a> {
  Include(&'a str),
  Setting(&'a str, &'a str)
}

impl Config {
  pub fn defaults() -> Self {
    Config {
      map: DEFAULTS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
      loaded_files: vec![]
    }
  }

  /// Defaults, then the rc file named by `rc_override`, `$CHECKLETRC` or
  /// `~/.checkletrc`, whichever comes first.
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::defaults();
    match rc_path(rc_override) {
      | Some(path) => {
        info!(rc = %path.display(), "loading checkletrc");
        cfg.read_rc(&path)?;
      }
      | None => {
        debug!("no checkletrc; built-in settings only")
      }
    }
    Ok(cfg)
  }

  /// `rc.` prefixes are optional on override keys.
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .map(str::to_string)
        .unwrap_or(k);
      self.set(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  /// Parses `key` into `T`, falling back to `fallback` when the key is
  /// missing or does not parse.
  pub fn get_parsed_or<T>(
    &self,
    key: &str,
    fallback: T
  ) -> T
  where
    T: FromStr
  {
    match self.map.get(key) {
      | Some(raw) => {
        raw.parse().unwrap_or_else(|_| {
          warn!(key, value = %raw, "invalid config value; using default");
          fallback
        })
      }
      | None => fallback
    }
  }

  /// Whether `color` asks for ANSI output. Anything other than an on/off
  /// word is an error.
  pub fn color(
    &self
  ) -> anyhow::Result<bool> {
    let raw = self
      .get("color")
      .unwrap_or_default();
    match raw
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "on" | "yes" | "true" | "1" => {
        Ok(true)
      }
      | "off" | "no" | "false" | "0" => {
        Ok(false)
      }
      | other => {
        bail!(
          "invalid color setting: {other}"
        )
      }
    }
  }

  /// The data directory, created if missing. `override_dir` (from
  /// `--data`) wins over `data.location`.
  #[tracing::instrument(skip(self))]
  pub fn data_dir(
    &self,
    override_dir: Option<&Path>
  ) -> anyhow::Result<PathBuf> {
    let dir = match override_dir {
      | Some(path) => path.to_path_buf(),
      | None => {
        let location = self
          .get("data.location")
          .ok_or_else(|| {
            anyhow!(
              "data.location is not set"
            )
          })?;
        expand_tilde(Path::new(
          &location
        ))
      }
    };

    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
    Ok(dir)
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  fn set(
    &mut self,
    key: String,
    value: String
  ) {
    if !DEFAULTS
      .iter()
      .any(|(known, _)| *known == key)
    {
      warn!(key = %key, "unrecognised setting; keeping it anyway");
    }
    trace!(key = %key, value = %value, "setting");
    self.map.insert(key, value);
  }

  #[tracing::instrument(skip(self))]
  fn read_rc(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;
    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .unwrap_or(Path::new("."))
      .to_path_buf();

    for (idx, raw_line) in
      text.lines().enumerate()
    {
      let parsed = parse_rc_line(
        raw_line
      )
      .with_context(|| {
        format!(
          "{}:{}",
          path.display(),
          idx + 1
        )
      })?;

      match parsed {
        | None => {}
        | Some(RcLine::Setting(
          k,
          v
        )) => {
          self.set(
            k.to_string(),
            v.to_string()
          )
        }
        | Some(RcLine::Include(
          target
        )) => {
          let target = expand_tilde(
            Path::new(target)
          );
          let target =
            base_dir.join(target);
          if self
            .loaded_files
            .contains(&target)
          {
            warn!(include = %target.display(), "include cycle; skipping");
          } else if target.exists() {
            self.read_rc(&target)?;
          } else {
            warn!(include = %target.display(), "include file does not exist; skipping");
          }
        }
      }
    }

    Ok(())
  }
}

/// Blank lines and comments yield `None`.
fn parse_rc_line(
  raw: &str
) -> anyhow::Result<Option<RcLine<'_>>> {
  let line = raw
    .split_once('#')
    .map_or(raw, |(before, _)| before)
    .trim();
  if line.is_empty() {
    return Ok(None);
  }

  if let Some(target) =
    line.strip_prefix("include ")
  {
    let target = target.trim();
    if target.is_empty() {
      bail!("include needs a path");
    }
    return Ok(Some(RcLine::Include(
      target
    )));
  }

  let (k, v) = line
    .split_once('=')
    .ok_or_else(|| {
      anyhow!(
        "expected KEY = VALUE, got: {raw}"
      )
    })?;
  let key = k.trim();
  if key.is_empty() {
    bail!("missing key before '='");
  }
  Ok(Some(RcLine::Setting(
    key,
    v.trim()
  )))
}

fn rc_path(
  override_path: Option<&Path>
) -> Option<PathBuf> {
  if let Some(path) = override_path {
    return Some(path.to_path_buf());
  }
  match std::env::var(RC_ENV_VAR) {
    | Ok(env) if env == "/dev/null" => {
      None
    }
    | Ok(env) => {
      Some(PathBuf::from(env))
    }
    | Err(_) => {
      dirs::home_dir()
        .map(|home| {
          home.join(RC_FILE_NAME)
        })
        .filter(|p| p.exists())
    }
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::task::Priority;
  use crate::view::FilterMode;
  use tempfile::tempdir;

  #[test]
  fn rc_file_with_include_and_comments() {
    let temp =
      tempdir().expect("tempdir");
    fs::write(
      temp.path().join("extra.rc"),
      "default.filter = active\ninclude main.rc\n"
    )
    .expect("write include");
    let rc = temp.path().join("main.rc");
    fs::write(
      &rc,
      "# settings\ndefault.priority=high # inline\ninclude extra.rc\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(rc.as_path()))
      .expect("load config");
    assert_eq!(
      cfg.get_parsed_or(
        "default.priority",
        Priority::Medium
      ),
      Priority::High
    );
    assert_eq!(
      cfg.get_parsed_or(
        "default.filter",
        FilterMode::All
      ),
      FilterMode::Active
    );
    assert_eq!(cfg.loaded_files.len(), 2);
  }

  #[test]
  fn overrides_strip_rc_prefix() {
    let mut cfg = Config::defaults();
    assert!(cfg.color().expect("default color"));
    cfg.apply_overrides([
      ("rc.color".to_string(), "off".to_string()),
      ("default.priority".to_string(), "urgent".to_string())
    ]);
    assert!(!cfg.color().expect("color"));
    assert_eq!(
      cfg.get_parsed_or(
        "default.priority",
        Priority::Low
      ),
      Priority::Low
    );

    cfg.apply_overrides([(
      "color".to_string(),
      "sometimes".to_string()
    )]);
    assert!(cfg.color().is_err());
  }

  #[test]
  fn rc_line_shapes() {
    assert_eq!(
      parse_rc_line("  # only a comment")
        .expect("comment"),
      None
    );
    assert_eq!(
      parse_rc_line("color = off # no ansi")
        .expect("setting"),
      Some(RcLine::Setting("color", "off"))
    );
    assert_eq!(
      parse_rc_line("include ~/shared.rc")
        .expect("include"),
      Some(RcLine::Include("~/shared.rc"))
    );
    assert!(parse_rc_line("include   ").is_err());
    assert!(parse_rc_line("= value").is_err());
  }

  #[test]
  fn malformed_line_is_an_error() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("bad.rc");
    fs::write(&rc, "no equals here\n")
      .expect("write rc");
    assert!(
      Config::load(Some(rc.as_path())).is_err()
    );
  }

  #[test]
  fn data_dir_prefers_override_and_creates_it() {
    let temp =
      tempdir().expect("tempdir");
    let mut cfg = Config::defaults();
    let configured =
      temp.path().join("configured");
    cfg.apply_overrides([(
      "data.location".to_string(),
      configured.display().to_string()
    )]);
    assert_eq!(
      cfg.data_dir(None).expect("dir"),
      configured
    );
    assert!(configured.is_dir());

    let explicit =
      temp.path().join("explicit");
    assert_eq!(
      cfg
        .data_dir(Some(explicit.as_path()))
        .expect("dir"),
      explicit
    );
  }
}
