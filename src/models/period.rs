//! Summary periods and the keys summary rows are stored under

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::zone::BiddingZone;

/// period_start used for every `Total` row (1970-01-01)
pub fn total_period_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Monthly,
    Yearly,
    Total,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Monthly => "monthly",
            Granularity::Yearly => "yearly",
            Granularity::Total => "total",
        }
    }

    /// First day of the period containing `date`
    pub fn period_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Daily => date,
            Granularity::Monthly => date.with_day(1).unwrap_or(date),
            Granularity::Yearly => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
            Granularity::Total => total_period_start(),
        }
    }

    /// Periods are assigned by the UTC calendar date of the interval start
    pub fn period_start_of(&self, timestamp: DateTime<Utc>) -> NaiveDate {
        self.period_start(timestamp.date_naive())
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(Granularity::Daily),
            "monthly" | "month" => Ok(Granularity::Monthly),
            "yearly" | "year" => Ok(Granularity::Yearly),
            "total" => Ok(Granularity::Total),
            other => Err(format!(
                "Invalid granularity: '{}'. Must be one of: daily, monthly, yearly, total",
                other
            )),
        }
    }
}

/// Identifies exactly one summary row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeriodKey {
    pub zone: BiddingZone,
    pub granularity: Granularity,
    pub period_start: NaiveDate,
}

impl PeriodKey {
    pub fn new(zone: BiddingZone, granularity: Granularity, date: NaiveDate) -> Self {
        Self {
            zone,
            granularity,
            period_start: granularity.period_start(date),
        }
    }

    pub fn total(zone: BiddingZone) -> Self {
        Self::new(zone, Granularity::Total, total_period_start())
    }
}

/// Inclusive bounds on `period_start`; open ends are unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl PeriodRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains(&self, period_start: NaiveDate) -> bool {
        self.from.is_none_or(|from| period_start >= from)
            && self.to.is_none_or(|to| period_start <= to)
    }

    pub fn is_bounded(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }
}

/// A calendar month, used for daily drill-down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(total_period_start())
    }

    pub fn next(&self) -> YearMonth {
        if self.month == 12 {
            YearMonth {
                year: self.year + 1,
                month: 1,
            }
        } else {
            YearMonth {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Half-open UTC window `[first day 00:00, first day of next month 00:00)`
    pub fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            self.first_day().and_time(chrono::NaiveTime::MIN).and_utc(),
            self.next().first_day().and_time(chrono::NaiveTime::MIN).and_utc(),
        )
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = String;

    /// `YYYY-MM`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("Invalid month: '{}'. Expected YYYY-MM", s);
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        YearMonth::new(year, month).ok_or_else(invalid)
    }
}
