use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::{
  DateTime,
  NaiveDateTime,
  Utc
};
use chrono_tz::Tz;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "tasklane-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "TASKLANE_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "TASKLANE_TIME_CONFIG";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// Zone used for "Created:" stamps.
pub fn display_timezone() -> &'static Tz
{
  static DISPLAY_TZ: OnceLock<Tz> =
    OnceLock::new();
  DISPLAY_TZ.get_or_init(
    resolve_display_timezone
  )
}

/// Parses a backend `createdAt` value.
///
/// Offsets are honored when present. A
/// bare local date-time (what the backend
/// emits by default) is taken as UTC.
pub fn parse_created_at(
  raw: &str
) -> Result<DateTime<Utc>, String> {
  let trimmed = raw.trim();
  if let Ok(dt) =
    DateTime::parse_from_rfc3339(trimmed)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  NaiveDateTime::parse_from_str(
    trimmed,
    "%Y-%m-%dT%H:%M:%S%.f"
  )
  .map(|ndt| {
    DateTime::<Utc>::from_naive_utc_and_offset(
      ndt, Utc
    )
  })
  .map_err(|err| {
    format!(
      "invalid createdAt '{trimmed}': \
       {err}"
    )
  })
}

#[must_use]
pub fn format_created(
  dt: DateTime<Utc>
) -> String {
  format_created_in(
    dt,
    display_timezone()
  )
}

/// `May 01, 2024, 09:30 AM UTC`
#[must_use]
pub fn format_created_in(
  dt: DateTime<Utc>,
  tz: &Tz
) -> String {
  dt.with_timezone(tz)
    .format("%b %d, %Y, %I:%M %p %Z")
    .to_string()
}

fn resolve_display_timezone() -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
  {
    if let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    ) {
      return tz;
    }
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  tracing::debug!(
    "no display timezone configured; \
     using UTC"
  );
  chrono_tz::UTC
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  timezone_from_toml(
    &raw,
    &format!("file:{}", path.display())
  )
}

fn timezone_from_toml(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let parsed = match toml::from_str::<
    TimezoneConfig
  >(raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        source,
        error = %err,
        "failed parsing timezone config"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      source,
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    source
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "resolved display timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::warn!(
        source,
        timezone = %trimmed,
        error = %err,
        "invalid timezone"
      );
      None
    }
  }
}
