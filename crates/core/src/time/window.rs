use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Observation period signals are computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeWindow {
    #[serde(rename = "30d")]
    Days30,
    #[serde(rename = "180d")]
    Days180,
}

impl TimeWindow {
    pub const ALL: [TimeWindow; 2] = [TimeWindow::Days30, TimeWindow::Days180];

    pub fn days(self) -> i64 {
        match self {
            TimeWindow::Days30 => 30,
            TimeWindow::Days180 => 180,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeWindow::Days30 => "30d",
            TimeWindow::Days180 => "180d",
        }
    }

    /// Number of 30-day months the window spans; used to normalize totals to monthly figures.
    pub fn months(self) -> f64 {
        self.days() as f64 / 30.0
    }

    /// Inclusive bounds `(reference - days, reference]` expressed as a closed range.
    pub fn bounds(self, reference_date: NaiveDate) -> (NaiveDate, NaiveDate) {
        let start = reference_date - Duration::days(self.days() - 1);
        (start, reference_date)
    }

    pub fn contains(self, reference_date: NaiveDate, date: NaiveDate) -> bool {
        let (start, end) = self.bounds(reference_date);
        date >= start && date <= end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeWindow {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "30d" | "30" => Ok(TimeWindow::Days30),
            "180d" | "180" => Ok(TimeWindow::Days180),
            other => anyhow::bail!("unsupported time window: {other} (expected 30d or 180d)"),
        }
    }
}

/// Resolve the reference date for a run.
///
/// An explicit `YYYY-MM-DD` wins. Otherwise the previous UTC day is used because the current day
/// is still accruing transactions.
pub fn resolve_reference_date(
    reference_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = reference_date_arg {
        return NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid reference date: {s}"));
    }

    now_utc
        .date_naive()
        .pred_opt()
        .context("reference date underflow")
}
