//! Cron expression parsing and next-fire computation.
//!
//! Accepts the standard 5-field form (`minute hour day-of-month month
//! day-of-week`) and a 6-field variant with a leading seconds column. Field
//! syntax: `*`, `*/step`, `a`, `a-b`, `a-b/step`, and comma lists. Times
//! are UTC. Day-of-month and day-of-week combine with the conventional OR
//! rule when both are restricted.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronError {
    WrongFieldCount(usize),
    InvalidField { field: &'static str, value: String },
}

impl std::fmt::Display for CronError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CronError::WrongFieldCount(n) => {
                write!(f, "cron expression must have 5 or 6 fields, got {n}")
            }
            CronError::InvalidField { field, value } => {
                write!(f, "invalid cron {field} field: {value:?}")
            }
        }
    }
}

impl std::error::Error for CronError {}

// ---------------------------------------------------------------------------
// FieldSet
// ---------------------------------------------------------------------------

/// Allowed values of one cron field as a bitmask, remembering whether the
/// field was written `*` (relevant for the day-of-month/day-of-week rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet {
    bits: u64,
    wildcard: bool,
}

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        self.bits & (1u64 << value) != 0
    }

    fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..64).filter(|v| self.contains(*v))
    }
}

fn parse_field(
    raw: &str,
    min: u32,
    max: u32,
    field: &'static str,
) -> Result<FieldSet, CronError> {
    let invalid = || CronError::InvalidField {
        field,
        value: raw.to_string(),
    };

    let mut bits = 0u64;
    let mut wildcard = false;

    for part in raw.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s.parse().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(invalid());
                }
                (r, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range_part == "*" {
            if part == "*" {
                wildcard = true;
            }
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let lo: u32 = a.parse().map_err(|_| invalid())?;
            let hi: u32 = b.parse().map_err(|_| invalid())?;
            (lo, hi)
        } else {
            let v: u32 = range_part.parse().map_err(|_| invalid())?;
            (v, v)
        };

        if lo < min || hi > max || lo > hi {
            return Err(invalid());
        }
        let mut v = lo;
        while v <= hi {
            bits |= 1u64 << v;
            v += step;
        }
    }

    if bits == 0 {
        return Err(invalid());
    }
    Ok(FieldSet { bits, wildcard })
}

// ---------------------------------------------------------------------------
// CronSchedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    seconds: FieldSet,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    expression: String,
}

// Far enough to cover any satisfiable dom/month combination (leap years
// included); beyond this the expression is treated as unsatisfiable.
const SEARCH_HORIZON_DAYS: i64 = 4 * 366;

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let (sec_raw, rest) = match fields.len() {
            5 => ("0", &fields[..]),
            6 => (fields[0], &fields[1..]),
            n => return Err(CronError::WrongFieldCount(n)),
        };

        let seconds = parse_field(sec_raw, 0, 59, "second")?;
        let minutes = parse_field(rest[0], 0, 59, "minute")?;
        let hours = parse_field(rest[1], 0, 23, "hour")?;
        let days_of_month = parse_field(rest[2], 1, 31, "day-of-month")?;
        let months = parse_field(rest[3], 1, 12, "month")?;
        // Accept 7 as an alias for Sunday (0).
        let mut days_of_week = parse_field(rest[4], 0, 7, "day-of-week")?;
        if days_of_week.contains(7) {
            days_of_week.bits &= !(1u64 << 7);
            days_of_week.bits |= 1;
        }

        Ok(Self {
            seconds,
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            expression: expression.to_string(),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`, or `None` if nothing matches
    /// within the search horizon.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = (after + Duration::seconds(1))
            .with_nanosecond(0)
            .expect("zero nanoseconds is valid");

        for day_offset in 0..SEARCH_HORIZON_DAYS {
            let date = start.date_naive() + Duration::days(day_offset);
            if !self.months.contains(date.month()) {
                continue;
            }
            if !self.day_matches(date.day(), date.weekday().num_days_from_sunday()) {
                continue;
            }
            for hour in self.hours.iter() {
                for minute in self.minutes.iter() {
                    for second in self.seconds.iter() {
                        let time = NaiveTime::from_hms_opt(hour, minute, second)
                            .expect("field ranges are validated");
                        let candidate = date.and_time(time).and_utc();
                        if candidate >= start {
                            return Some(candidate);
                        }
                    }
                }
            }
        }
        None
    }

    // Standard cron rule: when both day fields are restricted, either may
    // match; a wildcard defers to the other field.
    fn day_matches(&self, day_of_month: u32, day_of_week: u32) -> bool {
        match (self.days_of_month.wildcard, self.days_of_week.wildcard) {
            (true, true) => true,
            (true, false) => self.days_of_week.contains(day_of_week),
            (false, true) => self.days_of_month.contains(day_of_month),
            (false, false) => {
                self.days_of_month.contains(day_of_month)
                    || self.days_of_week.contains(day_of_week)
            }
        }
    }
}
