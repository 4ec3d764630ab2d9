use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScryError};

/// Short window used when sampling raw rows.
pub const SAMPLE_WINDOW: (&str, &str) = ("15m", "0m");
/// Window used when browsing services, operations, traces and logs.
pub const BROWSE_WINDOW: (&str, &str) = ("1h", "0m");
/// Window used for single-entity lookups such as one trace or a monitor's history.
pub const HISTORY_WINDOW: (&str, &str) = ("7d", "0m");

/// One edge of a time window as supplied by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeBound {
    /// Duration before `now`, kept with the token the user typed.
    Relative { token: String, ago: Duration },
    Absolute(DateTime<Utc>),
}

impl TimeBound {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
            return Ok(Self::Absolute(ts.with_timezone(&Utc)));
        }
        if input.eq_ignore_ascii_case("now") {
            return Ok(Self::Relative {
                token: input.to_string(),
                ago: Duration::ZERO,
            });
        }
        let ago = parse_duration_str(input)?;
        Ok(Self::Relative {
            token: input.to_string(),
            ago,
        })
    }

    pub fn at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self {
            Self::Absolute(ts) => Ok(*ts),
            Self::Relative { ago, token } => {
                let ago = chrono::Duration::from_std(*ago)
                    .map_err(|e| ScryError::Parse(format!("duration {token} out of range: {e}")))?;
                Ok(now - ago)
            }
        }
    }

    /// The bound `width` before this one, of the same kind.
    fn earlier_by(&self, width: Duration) -> Result<Self> {
        Ok(match self {
            Self::Absolute(ts) => {
                let width = chrono::Duration::from_std(width)
                    .map_err(|e| ScryError::Parse(format!("window width out of range: {e}")))?;
                Self::Absolute(*ts - width)
            }
            Self::Relative { ago, .. } => {
                let ago = *ago + width;
                Self::Relative {
                    token: humantime::format_duration(ago).to_string(),
                    ago,
                }
            }
        })
    }
}

impl fmt::Display for TimeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relative { token, .. } => f.write_str(token),
            Self::Absolute(ts) => f.write_str(&ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeFlags {
    pub since: Option<String>,
    pub until: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: TimeBound,
    pub end: TimeBound,
}

impl TimeRange {
    pub fn bounds(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        Ok((self.start.at(now)?, self.end.at(now)?))
    }
}

/// Absolute `start`/`end` beat relative `since`/`until` on the same edge;
/// missing edges fall back to the caller's defaults. When only the end is
/// given and the default start does not precede it, the start keeps the
/// default window's width measured back from that end.
pub fn resolve(
    flags: &TimeFlags,
    now: DateTime<Utc>,
    default_since: &str,
    default_until: &str,
) -> Result<TimeRange> {
    let explicit_start = flags.start.as_deref().or(flags.since.as_deref());
    let end = flags
        .end
        .as_deref()
        .or(flags.until.as_deref())
        .unwrap_or(default_until);

    let mut range = TimeRange {
        start: TimeBound::parse(explicit_start.unwrap_or(default_since))?,
        end: TimeBound::parse(end)?,
    };
    let (mut from, to) = range.bounds(now)?;
    if explicit_start.is_none() && from >= to {
        let defaults = TimeRange {
            start: TimeBound::parse(default_since)?,
            end: TimeBound::parse(default_until)?,
        };
        let (default_from, default_to) = defaults.bounds(now)?;
        let width = (default_to - default_from).to_std().unwrap_or_default();
        range.start = range.end.earlier_by(width)?;
        from = range.start.at(now)?;
    }
    if from > to {
        return Err(ScryError::InvalidArgument(format!(
            "time window starts after it ends ({} > {})",
            range.start, range.end
        )));
    }
    Ok(range)
}

pub fn parse_duration_str(input: &str) -> Result<Duration> {
    humantime::parse_duration(input)
        .map_err(|e| ScryError::Parse(format!("expected RFC3339 time or duration, got {input}: {e}")))
}
