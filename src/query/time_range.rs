use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use regex::Regex;

use super::TimeRange;
use crate::error::{MailsageError, Result};

/// Recognised relative time expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeExpression {
    Yesterday,
    Today,
    LastWeek,
    LastMonth,
    LastNDays,
    ThisWeek,
    ThisMonth,
}

/// Ordered expression table, matched against lowercase text
pub const TIME_EXPRESSIONS: &[(TimeExpression, &str)] = &[
    (TimeExpression::Yesterday, r"\byesterday\b"),
    (TimeExpression::Today, r"\btoday\b"),
    (TimeExpression::LastWeek, r"\blast\s+week\b"),
    (TimeExpression::LastMonth, r"\blast\s+month\b"),
    (TimeExpression::LastNDays, r"\blast\s+(\d+)\s+days?\b"),
    (TimeExpression::ThisWeek, r"\bthis\s+week\b"),
    (TimeExpression::ThisMonth, r"\bthis\s+month\b"),
];

fn midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())
}

fn week_start(now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let days_since_monday = i64::from(now.weekday().num_days_from_monday());
    midnight(now.date_naive() - Duration::days(days_since_monday))
}

fn month_start(now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    midnight(now.date_naive().with_day(1)?)
}

fn previous_month_start(now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let date = now.date_naive();
    let (year, month) = if date.month() == 1 {
        (date.year() - 1, 12)
    } else {
        (date.year(), date.month() - 1)
    };
    midnight(NaiveDate::from_ymd_opt(year, month, 1)?)
}

impl TimeExpression {
    /// Whole calendar periods end at the next period's midnight
    pub fn end_exclusive(self) -> bool {
        matches!(
            self,
            TimeExpression::Yesterday | TimeExpression::LastWeek | TimeExpression::LastMonth
        )
    }

    /// Concrete `(start, end)` relative to `now`
    ///
    /// `days` is only read by [`TimeExpression::LastNDays`].
    pub fn resolve(
        self,
        now: DateTime<Utc>,
        days: Option<u32>,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let today = midnight(now.date_naive())?;

        match self {
            TimeExpression::Yesterday => Some((today - Duration::days(1), today)),
            TimeExpression::Today => Some((today, now)),
            TimeExpression::LastWeek => {
                let this_monday = week_start(now)?;
                Some((this_monday - Duration::days(7), this_monday))
            }
            TimeExpression::LastMonth => Some((previous_month_start(now)?, month_start(now)?)),
            TimeExpression::LastNDays => {
                let start = now.checked_sub_signed(Duration::days(i64::from(days?)))?;
                Some((start, now))
            }
            TimeExpression::ThisWeek => Some((week_start(now)?, now)),
            TimeExpression::ThisMonth => Some((month_start(now)?, now)),
        }
    }
}

/// Compiled form of [`TIME_EXPRESSIONS`]
pub struct TimeRangeExtractor {
    table: Vec<(TimeExpression, Regex)>,
}

impl TimeRangeExtractor {
    pub fn new() -> Result<Self> {
        let table = TIME_EXPRESSIONS
            .iter()
            .map(|(expr, pattern)| {
                Regex::new(pattern)
                    .map(|regex| (*expr, regex))
                    .map_err(|e| {
                        MailsageError::Config(format!("Invalid time pattern '{}': {}", pattern, e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { table })
    }

    /// First matching expression resolved against `now`
    pub fn extract(&self, text: &str, now: DateTime<Utc>) -> Option<TimeRange> {
        let lowered = text.to_lowercase();

        for (expr, regex) in &self.table {
            let Some(captures) = regex.captures(&lowered) else {
                continue;
            };
            let days = captures.get(1).and_then(|m| m.as_str().parse::<u32>().ok());

            if let Some((start, end)) = expr.resolve(now, days) {
                return Some(TimeRange {
                    start,
                    end,
                    description: captures
                        .get(0)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                    end_exclusive: expr.end_exclusive(),
                });
            }
        }

        None
    }
}

/// One-shot convenience over [`TimeRangeExtractor`]
pub fn resolve_time_range(text: &str, now: DateTime<Utc>) -> Result<Option<TimeRange>> {
    Ok(TimeRangeExtractor::new()?.extract(text, now))
}
