use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use reqwest::Url;
use tracing::{
  debug,
  info,
  trace,
  warn
};

pub const DEFAULT_BASE_URL: &str =
  "http://localhost:8080/api/v1/tasks";
pub const RC_ENV_VAR: &str =
  "TASKLANERC";
pub const BASE_URL_ENV_VAR: &str =
  "TASKLANE_BASE_URL";

pub const KEY_BASE_URL: &str =
  "api.base_url";
pub const KEY_PAGE_SIZE: &str =
  "page.size";
pub const KEY_TIMEOUT: &str =
  "request.timeout";
pub const KEY_COLOR: &str = "color";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    map.insert(
      KEY_BASE_URL.to_string(),
      DEFAULT_BASE_URL.to_string()
    );
    map.insert(
      KEY_PAGE_SIZE.to_string(),
      "5".to_string()
    );
    map.insert(
      KEY_TIMEOUT.to_string(),
      "10".to_string()
    );
    map.insert(
      KEY_COLOR.to_string(),
      "on".to_string()
    );
    map.insert(
      "default.command".to_string(),
      "shell".to_string()
    );

    Config {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  /// Defaults, then the rc file, then
  /// `TASKLANE_BASE_URL`.
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading rc file");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no rc file found; using \
         defaults"
      );
    }

    if let Ok(url) =
      std::env::var(BASE_URL_ENV_VAR)
      && !url.trim().is_empty()
    {
      debug!(url = %url, "base url from environment");
      cfg.map.insert(
        KEY_BASE_URL.to_string(),
        url.trim().to_string()
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
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
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  pub fn base_url(
    &self
  ) -> anyhow::Result<String> {
    let raw = self
      .get(KEY_BASE_URL)
      .unwrap_or_default();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
      return Err(anyhow!(
        "{KEY_BASE_URL} cannot be empty"
      ));
    }
    let url = Url::parse(trimmed)
      .with_context(|| {
        format!(
          "{KEY_BASE_URL} is not a valid \
           URL: '{trimmed}'"
        )
      })?;
    if url.cannot_be_a_base() {
      return Err(anyhow!(
        "{KEY_BASE_URL} cannot carry a \
         path: '{trimmed}'"
      ));
    }
    Ok(trimmed.to_string())
  }

  pub fn page_size(
    &self
  ) -> anyhow::Result<u64> {
    let size = self.positive(
      KEY_PAGE_SIZE
    )?;
    Ok(size)
  }

  pub fn request_timeout(
    &self
  ) -> anyhow::Result<Duration> {
    let secs =
      self.positive(KEY_TIMEOUT)?;
    Ok(Duration::from_secs(secs))
  }

  pub fn color(
    &self
  ) -> anyhow::Result<bool> {
    let raw = self
      .get(KEY_COLOR)
      .unwrap_or_else(|| {
        "on".to_string()
      });
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
      | other => Err(anyhow!(
        "invalid color setting: {other}"
      ))
    }
  }

  fn positive(
    &self,
    key: &str
  ) -> anyhow::Result<u64> {
    let raw =
      self.get(key).ok_or_else(|| {
        anyhow!("{key} is not set")
      })?;
    let value = raw
      .trim()
      .parse::<u64>()
      .with_context(|| {
        format!(
          "{key} must be a whole \
           number, got '{raw}'"
        )
      })?;
    if value == 0 {
      return Err(anyhow!(
        "{key} must be at least 1"
      ));
    }
    Ok(value)
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
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
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if self
          .loaded_files
          .contains(&include_path)
        {
          warn!(include = %include_path.display(), "include cycle; skipping");
        } else if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping rc lookup"
    );
    return Ok(None);
  };
  let candidate =
    home.join(".tasklanerc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
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
