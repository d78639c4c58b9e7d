//! Observation series: one or three coordinate components sharing a date column.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::epoch::{epochs_mjd, CalendarDate, DateFormat, DateRepr, Epoch};
use crate::error::{GctsError, Result};
use crate::helpers::DAYS_PER_YEAR;

/// A topocentric coordinate component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    East,
    North,
    Up,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::East, Component::North, Component::Up];

    pub fn tag(self) -> &'static str {
        match self {
            Component::East => "east",
            Component::North => "north",
            Component::Up => "up",
        }
    }

    /// Single-letter column label (`E`, `N`, `U`).
    pub fn letter(self) -> &'static str {
        match self {
            Component::East => "E",
            Component::North => "N",
            Component::Up => "U",
        }
    }
}

impl FromStr for Component {
    type Err = GctsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "east" => Ok(Component::East),
            "north" => Ok(Component::North),
            "up" => Ok(Component::Up),
            other => Err(GctsError::config(format!(
                "unknown component '{other}' (expected east, north or up)"
            ))),
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Components stored in a series file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentSet {
    Single(Component),
    All,
}

impl ComponentSet {
    pub fn tag(self) -> &'static str {
        match self {
            ComponentSet::Single(c) => c.tag(),
            ComponentSet::All => "all",
        }
    }

    pub fn components(self) -> Vec<Component> {
        match self {
            ComponentSet::Single(c) => vec![c],
            ComponentSet::All => Component::ALL.to_vec(),
        }
    }

    /// Observation columns per row (value and sigma for each component).
    pub fn column_count(self) -> usize {
        2 * self.components().len()
    }

    /// Default `DATA ORDER` header text.
    pub fn default_data_order(self) -> String {
        let comps = self.components();
        let values: Vec<&str> = comps.iter().map(|c| c.letter()).collect();
        let sigmas: Vec<String> = comps.iter().map(|c| format!("s{}", c.letter())).collect();
        format!("{} {} date", values.join(" "), sigmas.join(" "))
    }
}

impl FromStr for ComponentSet {
    type Err = GctsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "all" => Ok(ComponentSet::All),
            other => other.parse().map(ComponentSet::Single),
        }
    }
}

impl fmt::Display for ComponentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Series metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesHeader {
    pub site: String,
    pub components: ComponentSet,
    pub unit: String,
    pub date_format: DateFormat,
    /// Declared offsets in the series' date representation.
    pub offsets: Vec<DateRepr>,
    pub data_order: String,
    pub comments: Vec<String>,
}

impl SeriesHeader {
    pub fn new(
        site: impl Into<String>,
        components: ComponentSet,
        unit: impl Into<String>,
        date_format: DateFormat,
    ) -> Self {
        Self {
            site: site.into(),
            components,
            unit: unit.into(),
            date_format,
            offsets: Vec::new(),
            data_order: components.default_data_order(),
            comments: Vec::new(),
        }
    }

    /// Offset epochs (MJD) in declaration order.
    pub fn offset_epochs(&self) -> Result<Vec<f64>> {
        epochs_mjd(&self.offsets)
    }
}

/// Values and formal sigmas of one component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentSeries {
    pub component: Component,
    pub values: Vec<f64>,
    pub sigmas: Vec<f64>,
}

/// An observation series with a shared date column.
///
/// Dates are strictly increasing and every component has one value and one
/// sigma per date.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    header: SeriesHeader,
    components: Vec<ComponentSeries>,
    dates: Vec<DateRepr>,
    epochs: Vec<f64>,
}

impl TimeSeries {
    pub fn new(
        header: SeriesHeader,
        components: Vec<ComponentSeries>,
        dates: Vec<DateRepr>,
    ) -> Result<Self> {
        let expected = header.components.components();
        let found: Vec<Component> = components.iter().map(|c| c.component).collect();
        if found != expected {
            return Err(GctsError::data(format!(
                "header declares components {:?} but series holds {:?}",
                expected, found
            )));
        }
        if let Some(bad) = dates.iter().find(|d| d.format() != header.date_format) {
            return Err(GctsError::data(format!(
                "date {bad} does not match header format {}",
                header.date_format
            )));
        }
        for c in &components {
            if c.values.len() != dates.len() || c.sigmas.len() != dates.len() {
                return Err(GctsError::data(format!(
                    "{} has {} values and {} sigmas for {} dates",
                    c.component,
                    c.values.len(),
                    c.sigmas.len(),
                    dates.len()
                )));
            }
        }
        let epochs = epochs_mjd(&dates)?;
        if let Some(i) = epochs.windows(2).position(|w| !(w[1] > w[0])) {
            return Err(GctsError::data(format!(
                "dates must be strictly increasing ({} then {})",
                dates[i],
                dates[i + 1]
            )));
        }
        Ok(Self {
            header,
            components,
            dates,
            epochs,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn header(&self) -> &SeriesHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut SeriesHeader {
        &mut self.header
    }

    pub fn dates(&self) -> &[DateRepr] {
        &self.dates
    }

    /// Epochs (MJD) of the dates.
    pub fn epochs(&self) -> &[f64] {
        &self.epochs
    }

    pub fn components(&self) -> &[ComponentSeries] {
        &self.components
    }

    pub fn component(&self, component: Component) -> Result<&ComponentSeries> {
        self.components
            .iter()
            .find(|c| c.component == component)
            .ok_or_else(|| {
                GctsError::config(format!(
                    "series {} has no {component} component",
                    self.header.site
                ))
            })
    }

    /// Summary statistics of the date column.
    pub fn stats(&self) -> Result<SeriesStats> {
        let (first, last) = match (self.epochs.first(), self.epochs.last()) {
            (Some(&f), Some(&l)) => (f, l),
            _ => return Err(GctsError::data("series has no observations")),
        };
        let span_days = last - first + 1.0;
        Ok(SeriesStats {
            first: Epoch::from_mjd(first).calendar(),
            last: Epoch::from_mjd(last).calendar(),
            span_days,
            span_years: span_days / DAYS_PER_YEAR,
            observations: self.len(),
            gap_percent: (1.0 - self.len() as f64 / span_days) * 100.0,
            offsets: self.header.offsets.len(),
        })
    }
}

/// Coverage summary of a series.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub first: CalendarDate,
    pub last: CalendarDate,
    /// Days from first to last observation, inclusive.
    pub span_days: f64,
    pub span_years: f64,
    pub observations: usize,
    /// Share of missing days within the span.
    pub gap_percent: f64,
    pub offsets: usize,
}

impl fmt::Display for SeriesStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "First and Last Obs.   [yyyy/mm/dd] : from {} to {}", self.first, self.last)?;
        writeln!(
            f,
            "Length of Series         (in Days) : {} ({:.2} years)",
            self.span_days, self.span_years
        )?;
        writeln!(f, "Number of Observations   (in Days) : {}", self.observations)?;
        writeln!(f, "Percentage of Gaps                 : {:.2}", self.gap_percent)?;
        write!(f, "Number of Offset                   : {}", self.offsets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn east_series(days: &[f64]) -> TimeSeries {
        let header = SeriesHeader::new(
            "TEST",
            ComponentSet::Single(Component::East),
            "mm",
            DateFormat::Mjd,
        );
        let dates = days.iter().map(|d| DateRepr::Mjd(56604.0 + d)).collect();
        let comp = ComponentSeries {
            component: Component::East,
            values: days.iter().map(|d| d * 0.01).collect(),
            sigmas: vec![1.0; days.len()],
        };
        TimeSeries::new(header, vec![comp], dates).unwrap()
    }

    #[test]
    fn test_component_tags() {
        assert_eq!("up".parse::<Component>().unwrap(), Component::Up);
        assert_eq!("all".parse::<ComponentSet>().unwrap(), ComponentSet::All);
        assert_eq!(
            "north".parse::<ComponentSet>().unwrap(),
            ComponentSet::Single(Component::North)
        );
        assert!("vertical".parse::<ComponentSet>().is_err());
        assert_eq!(ComponentSet::All.column_count(), 6);
        assert_eq!(ComponentSet::All.default_data_order(), "E N U sE sN sU date");
        assert_eq!(
            ComponentSet::Single(Component::East).default_data_order(),
            "E sE date"
        );
    }

    #[test]
    fn test_stats_match_reference_campaign() {
        let days = [
            0.0, 2.0, 7.0, 8.0, 69.0, 112.0, 252.0, 326.0, 334.0, 492.0, 650.0, 689.0, 730.0,
            824.0, 1163.0,
        ];
        let stats = east_series(&days).stats().unwrap();
        assert_eq!(stats.first, CalendarDate { year: 2013, month: 11, day: 8 });
        assert_eq!(stats.last, CalendarDate { year: 2017, month: 1, day: 14 });
        assert_eq!(stats.span_days, 1164.0);
        assert_eq!(stats.observations, 15);
        assert!((stats.gap_percent - 98.71).abs() < 0.005);
        assert!(stats.to_string().contains("from 2013/11/8 to 2017/1/14"));
    }

    #[test]
    fn test_rejects_unsorted_dates() {
        let header = SeriesHeader::new(
            "TEST",
            ComponentSet::Single(Component::Up),
            "mm",
            DateFormat::Mjd,
        );
        let comp = ComponentSeries {
            component: Component::Up,
            values: vec![0.0; 3],
            sigmas: vec![1.0; 3],
        };
        let dates = vec![DateRepr::Mjd(3.0), DateRepr::Mjd(2.0), DateRepr::Mjd(4.0)];
        assert!(matches!(TimeSeries::new(header, vec![comp], dates), Err(GctsError::Data(_))));
    }

    #[test]
    fn test_daily_decimal_years_over_leap_year_end() {
        let header = SeriesHeader::new(
            "TEST",
            ComponentSet::Single(Component::Up),
            "mm",
            DateFormat::DecimalYear,
        );
        let dates: Vec<DateRepr> = (360..=366)
            .map(|doy| DateRepr::DecimalYear(2016.0 + doy as f64 / 365.25))
            .chain((1..=3).map(|doy| DateRepr::DecimalYear(2017.0 + doy as f64 / 365.25)))
            .collect();
        let comp = ComponentSeries {
            component: Component::Up,
            values: vec![0.0; dates.len()],
            sigmas: vec![1.0; dates.len()],
        };
        let series = TimeSeries::new(header, vec![comp], dates).unwrap();
        assert!(series.epochs().windows(2).all(|w| w[1] - w[0] == 1.0));
    }

    #[test]
    fn test_rejects_missing_component() {
        let header = SeriesHeader::new("TEST", ComponentSet::All, "mm", DateFormat::Mjd);
        let comp = ComponentSeries {
            component: Component::East,
            values: vec![0.0],
            sigmas: vec![1.0],
        };
        assert!(TimeSeries::new(header, vec![comp], vec![DateRepr::Mjd(1.0)]).is_err());
        let series = east_series(&[0.0, 1.0]);
        assert!(series.component(Component::Up).is_err());
        assert!(series.component(Component::East).is_ok());
    }
}
