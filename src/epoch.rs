//! Epoch model: conversions between the date representations found in
//! `.tse` files and a single continuous epoch (modified Julian day).
//!
//! ## Representations
//!
//! | tag | fields | columns |
//! |---|---|---|
//! | `mjd` | modified Julian day | 1 |
//! | `decimalYear` | year + doy/365.25 | 1 |
//! | `yearANDdoy` | year, day of year | 2 |
//! | `gweekANDdow` | GPS week, day of week (Sunday = 0) | 2 |
//! | `yyyymmdd` | year, month, day | 3 |
//!
//! Leap years follow the plain "divisible by 4" rule, which matches the
//! Gregorian calendar for 1901–2099. Calendar inputs outside that range are
//! rejected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{GctsError, Result};
use crate::helpers::DAYS_PER_YEAR;

/// Offset between Julian date and modified Julian day.
pub const MJD_OFFSET: f64 = 2_400_000.5;

/// MJD of the GPS week origin (1980-01-06).
pub const GPS_EPOCH_MJD: f64 = 44_244.0;

/// First and last calendar years handled exactly.
pub const SUPPORTED_YEARS: (i32, i32) = (1901, 2099);

// Cumulative days before each month, common and leap years.
const MONTH_DAYS: [[u32; 13]; 2] = [
    [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334, 365],
    [0, 31, 60, 91, 121, 152, 182, 213, 244, 274, 305, 335, 366],
];

/// Tag naming how dates are written in a series file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DateFormat {
    Mjd,
    DecimalYear,
    YearDoy,
    GpsWeekDow,
    Ymd,
}

impl DateFormat {
    /// File-header tag for this format.
    pub fn tag(self) -> &'static str {
        match self {
            DateFormat::Mjd => "mjd",
            DateFormat::DecimalYear => "decimalYear",
            DateFormat::YearDoy => "yearANDdoy",
            DateFormat::GpsWeekDow => "gweekANDdow",
            DateFormat::Ymd => "yyyymmdd",
        }
    }

    /// Number of date columns one row occupies.
    pub fn column_count(self) -> usize {
        match self {
            DateFormat::Mjd | DateFormat::DecimalYear => 1,
            DateFormat::YearDoy | DateFormat::GpsWeekDow => 2,
            DateFormat::Ymd => 3,
        }
    }

    /// True for the single-column continuous formats.
    pub fn is_scalar(self) -> bool {
        self.column_count() == 1
    }
}

impl FromStr for DateFormat {
    type Err = GctsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "mjd" => Ok(DateFormat::Mjd),
            "decimalYear" => Ok(DateFormat::DecimalYear),
            "yearANDdoy" => Ok(DateFormat::YearDoy),
            "gweekANDdow" => Ok(DateFormat::GpsWeekDow),
            "yyyymmdd" => Ok(DateFormat::Ymd),
            other => Err(GctsError::config(format!(
                "unsupported date format '{other}' (expected mjd, decimalYear, yearANDdoy, gweekANDdow or yyyymmdd)"
            ))),
        }
    }
}

impl fmt::Display for DateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A date as written in one of the supported representations.
///
/// Each variant carries only the fields its format provides.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum DateRepr {
    Mjd(f64),
    DecimalYear(f64),
    YearDoy { year: i32, doy: u32 },
    GpsWeekDow { week: i32, dow: u32 },
    Ymd { year: i32, month: u32, day: u32 },
}

impl DateRepr {
    /// Format tag of this date.
    pub fn format(&self) -> DateFormat {
        match self {
            DateRepr::Mjd(_) => DateFormat::Mjd,
            DateRepr::DecimalYear(_) => DateFormat::DecimalYear,
            DateRepr::YearDoy { .. } => DateFormat::YearDoy,
            DateRepr::GpsWeekDow { .. } => DateFormat::GpsWeekDow,
            DateRepr::Ymd { .. } => DateFormat::Ymd,
        }
    }

    /// Convert to the continuous epoch scale.
    pub fn to_epoch(&self) -> Result<Epoch> {
        to_epoch(self)
    }

    /// Numeric columns as they appear in a data row.
    pub fn columns(&self) -> Vec<f64> {
        match *self {
            DateRepr::Mjd(v) | DateRepr::DecimalYear(v) => vec![v],
            DateRepr::YearDoy { year, doy } => vec![year as f64, doy as f64],
            DateRepr::GpsWeekDow { week, dow } => vec![week as f64, dow as f64],
            DateRepr::Ymd { year, month, day } => vec![year as f64, month as f64, day as f64],
        }
    }

    /// Build a date from the numeric columns of a data row.
    pub fn from_columns(format: DateFormat, cols: &[f64]) -> Result<Self> {
        if cols.len() != format.column_count() {
            return Err(GctsError::config(format!(
                "{} dates need {} columns, got {}",
                format,
                format.column_count(),
                cols.len()
            )));
        }
        let int = |v: f64| -> Result<i64> {
            if v.is_finite() && v.fract() == 0.0 {
                Ok(v as i64)
            } else {
                Err(GctsError::data(format!(
                    "expected an integer date field, got {v}"
                )))
            }
        };
        let unsigned = |v: f64| -> Result<u32> {
            let i = int(v)?;
            u32::try_from(i)
                .map_err(|_| GctsError::data(format!("date field {i} must be non-negative")))
        };
        let date = match format {
            DateFormat::Mjd => DateRepr::Mjd(cols[0]),
            DateFormat::DecimalYear => DateRepr::DecimalYear(cols[0]),
            DateFormat::YearDoy => DateRepr::YearDoy {
                year: int(cols[0])? as i32,
                doy: unsigned(cols[1])?,
            },
            DateFormat::GpsWeekDow => DateRepr::GpsWeekDow {
                week: int(cols[0])? as i32,
                dow: unsigned(cols[1])?,
            },
            DateFormat::Ymd => DateRepr::Ymd {
                year: int(cols[0])? as i32,
                month: unsigned(cols[1])?,
                day: unsigned(cols[2])?,
            },
        };
        Ok(date)
    }

    /// Parse a whitespace-separated date string such as `"2014 1 1"` or `"56658"`.
    pub fn parse(format: DateFormat, text: &str) -> Result<Self> {
        let cols = text
            .split_whitespace()
            .map(|tok| {
                tok.parse::<f64>()
                    .map_err(|_| GctsError::data(format!("invalid date field '{tok}' in '{text}'")))
            })
            .collect::<Result<Vec<f64>>>()?;
        Self::from_columns(format, &cols)
    }
}

impl fmt::Display for DateRepr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DateRepr::Mjd(v) | DateRepr::DecimalYear(v) => write!(f, "{v}"),
            DateRepr::YearDoy { year, doy } => write!(f, "{year} {doy}"),
            DateRepr::GpsWeekDow { week, dow } => write!(f, "{week} {dow}"),
            DateRepr::Ymd { year, month, day } => write!(f, "{year} {month} {day}"),
        }
    }
}

/// A calendar date (year, month, day).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CalendarDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.year, self.month, self.day)
    }
}

/// Continuous epoch in modified Julian days.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Epoch {
    mjd: f64,
}

impl Epoch {
    pub fn from_mjd(mjd: f64) -> Self {
        Self { mjd }
    }

    #[inline]
    pub fn mjd(&self) -> f64 {
        self.mjd
    }

    /// Calendar date of the day containing this epoch.
    pub fn calendar(&self) -> CalendarDate {
        mjd_to_calendar(self.mjd.floor())
    }

    /// Day of year (1-based).
    pub fn day_of_year(&self) -> u32 {
        let c = self.calendar();
        day_of_year(c.year, c.month, c.day)
    }

    /// GPS week and day of week (Sunday = 0).
    pub fn gps_week(&self) -> (i32, u32) {
        let days = self.mjd.floor() - GPS_EPOCH_MJD;
        let week = (days / 7.0).floor() as i32;
        let dow = (days as i64).rem_euclid(7) as u32;
        (week, dow)
    }

    /// Decimal year, `year + doy / 365.25`.
    pub fn decimal_year(&self) -> f64 {
        let c = self.calendar();
        c.year as f64 + day_of_year(c.year, c.month, c.day) as f64 / DAYS_PER_YEAR
    }

    /// Express this epoch in the requested representation.
    pub fn to_repr(&self, format: DateFormat) -> DateRepr {
        from_epoch(*self, format)
    }
}

/// Convert any date representation to an epoch.
///
/// Fails if a calendar field is out of range or the year is outside
/// [`SUPPORTED_YEARS`].
pub fn to_epoch(date: &DateRepr) -> Result<Epoch> {
    let mjd = match *date {
        DateRepr::Mjd(mjd) => {
            if !mjd.is_finite() {
                return Err(GctsError::data("non-finite MJD"));
            }
            mjd
        }
        DateRepr::DecimalYear(dy) => {
            if !dy.is_finite() {
                return Err(GctsError::data("non-finite decimal year"));
            }
            let floor = dy.floor() as i32;
            // Tolerance absorbs rounding in year + doy/365.25.
            let days = (dy - floor as f64) * DAYS_PER_YEAR - 1e-6;
            // Day 366 of a leap year encodes 0.75 days past the next integer
            // year, below the 1.0 of that year's January 1.
            let (year, doy) = if (0.5..0.875).contains(&days) && is_leap(floor - 1) {
                (floor - 1, 366)
            } else {
                (floor, (days.ceil() as u32).clamp(1, days_in_year(floor)))
            };
            check_year(year)?;
            let (month, day) = doy_to_month_day(year, doy)?;
            calendar_to_mjd(year, month, day)
        }
        DateRepr::YearDoy { year, doy } => {
            check_year(year)?;
            let (month, day) = doy_to_month_day(year, doy)?;
            calendar_to_mjd(year, month, day)
        }
        DateRepr::GpsWeekDow { week, dow } => {
            if dow > 6 {
                return Err(GctsError::data(format!("day of week {dow} outside 0..=6")));
            }
            week as f64 * 7.0 + dow as f64 + GPS_EPOCH_MJD
        }
        DateRepr::Ymd { year, month, day } => {
            check_year(year)?;
            if !(1..=12).contains(&month) {
                return Err(GctsError::data(format!("month {month} outside 1..=12")));
            }
            let leap = is_leap(year) as usize;
            let month_len = MONTH_DAYS[leap][month as usize] - MONTH_DAYS[leap][month as usize - 1];
            if day == 0 || day > month_len {
                return Err(GctsError::data(format!(
                    "day {day} outside 1..={month_len} for {year}/{month}"
                )));
            }
            calendar_to_mjd(year, month, day)
        }
    };
    Ok(Epoch::from_mjd(mjd))
}

/// Express an epoch in the requested representation.
pub fn from_epoch(epoch: Epoch, format: DateFormat) -> DateRepr {
    match format {
        DateFormat::Mjd => DateRepr::Mjd(epoch.mjd()),
        DateFormat::DecimalYear => DateRepr::DecimalYear(epoch.decimal_year()),
        DateFormat::YearDoy => DateRepr::YearDoy {
            year: epoch.calendar().year,
            doy: epoch.day_of_year(),
        },
        DateFormat::GpsWeekDow => {
            let (week, dow) = epoch.gps_week();
            DateRepr::GpsWeekDow { week, dow }
        }
        DateFormat::Ymd => {
            let c = epoch.calendar();
            DateRepr::Ymd {
                year: c.year,
                month: c.month,
                day: c.day,
            }
        }
    }
}

/// Convert a whole column of dates, failing on the first invalid entry.
pub fn epochs_mjd(dates: &[DateRepr]) -> Result<Vec<f64>> {
    dates.iter().map(|d| to_epoch(d).map(|e| e.mjd())).collect()
}

fn check_year(year: i32) -> Result<()> {
    let (lo, hi) = SUPPORTED_YEARS;
    if year < lo || year > hi {
        return Err(GctsError::data(format!(
            "year {year} outside supported range {lo}..={hi}"
        )));
    }
    Ok(())
}

#[inline]
fn is_leap(year: i32) -> bool {
    year.rem_euclid(4) == 0
}

fn days_in_year(year: i32) -> u32 {
    if is_leap(year) {
        366
    } else {
        365
    }
}

fn day_of_year(year: i32, month: u32, day: u32) -> u32 {
    MONTH_DAYS[is_leap(year) as usize][month as usize - 1] + day
}

fn doy_to_month_day(year: i32, doy: u32) -> Result<(u32, u32)> {
    if doy == 0 || doy > days_in_year(year) {
        return Err(GctsError::data(format!(
            "day of year {doy} outside 1..={} for {year}",
            days_in_year(year)
        )));
    }
    let table = &MONTH_DAYS[is_leap(year) as usize];
    let month = (1..=12).find(|&m| doy <= table[m]).unwrap_or(12);
    Ok((month as u32, doy - table[month - 1]))
}

/// Julian-date formula without the Gregorian century term; exact for 1901–2099.
fn calendar_to_mjd(year: i32, month: u32, day: u32) -> f64 {
    let (y, m) = if month <= 2 {
        (year as f64 - 1.0, month as f64 + 12.0)
    } else {
        (year as f64, month as f64)
    };
    let jd = (365.25 * y).floor() + (30.6001 * (m + 1.0)).floor() + day as f64 + 1_720_981.5;
    jd - MJD_OFFSET
}

fn mjd_to_calendar(mjd: f64) -> CalendarDate {
    let jd = mjd + MJD_OFFSET;
    let a = (jd + 0.5).floor();
    let b = a + 1537.0;
    let c = ((b - 122.1) / 365.25).floor();
    let d = (365.25 * c).floor();
    let e = ((b - d) / 30.6001).floor();

    let day = b - d - (30.6001 * e).floor();
    let month = e - 1.0 - 12.0 * (e / 14.0).floor();
    let year = c - 4715.0 - ((7.0 + month) / 10.0).floor();

    CalendarDate {
        year: year as i32,
        month: month as u32,
        day: day as u32,
    }
}
