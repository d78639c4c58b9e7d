//! Reader and writer for `.tse` series files.
//!
//! A file opens with `*`-prefixed header lines terminated by `* ENDOFHEADER`,
//! followed by whitespace-separated data rows: the observation columns
//! (`value sigma` for one component, `E N U sE sN sU` for all three) and then
//! the date columns of the declared date format.
//!
//! ```text
//! * SITE         : WTZR
//! * COMPONENT    : east
//! * UNIT         : mm
//! * DATE FORMAT  : mjd
//! * OFFSET       : 56700
//! * DATA ORDER   : E sE date
//! * ENDOFHEADER
//!       1.250000      0.800000  56604.000000
//! ```

use std::fs;
use std::path::Path;

use crate::epoch::{DateFormat, DateRepr};
use crate::error::{GctsError, Result};
use crate::series::{ComponentSet, ComponentSeries, SeriesHeader, TimeSeries};

const END_OF_HEADER: &str = "ENDOFHEADER";

const KEY_SITE: &str = "SITE";
const KEY_COMPONENT: &str = "COMPONENT";
const KEY_UNIT: &str = "UNIT";
const KEY_DATE_FORMAT: &str = "DATE FORMAT";
const KEY_OFFSET: &str = "OFFSET";
const KEY_DATA_ORDER: &str = "DATA ORDER";
const KEY_COMMENT: &str = "COMMENT";

/// Width of the key field in header lines.
const KEY_WIDTH: usize = 13;

#[derive(Default)]
struct HeaderFields {
    site: Option<String>,
    component: Option<ComponentSet>,
    unit: Option<String>,
    date_format: Option<DateFormat>,
    offsets: Vec<(usize, String)>,
    data_order: Option<String>,
    comments: Vec<String>,
}

/// Read a series from `path`.
pub fn read(path: impl AsRef<Path>) -> Result<TimeSeries> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| GctsError::io(path, e))?;
    let series = parse(&text, path)?;
    log::debug!(
        "read {} rows of {} from {}",
        series.len(),
        series.header().components,
        path.display()
    );
    Ok(series)
}

/// Parse series text. `path` is only used in error messages.
pub fn parse(text: &str, path: &Path) -> Result<TimeSeries> {
    let mut fields = HeaderFields::default();
    let mut in_header = true;
    let mut rows: Vec<(usize, Vec<f64>)> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix('*') {
            if in_header {
                in_header = !parse_header_line(rest, line_no, path, &mut fields)?;
            }
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|tok| {
                tok.parse::<f64>().map_err(|_| {
                    GctsError::parse(path, line_no, format!("invalid number '{tok}'"))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push((line_no, row));
    }

    let components = fields
        .component
        .ok_or_else(|| GctsError::parse(path, 0, "missing COMPONENT header"))?;
    let date_format = fields
        .date_format
        .ok_or_else(|| GctsError::parse(path, 0, "missing DATE FORMAT header"))?;

    let offsets = fields
        .offsets
        .iter()
        .map(|(line_no, text)| {
            DateRepr::parse(date_format, text)
                .map_err(|e| GctsError::parse(path, *line_no, e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    let n_obs = components.column_count();
    let n_date = date_format.column_count();
    let n_comp = n_obs / 2;
    let mut values = vec![Vec::with_capacity(rows.len()); n_comp];
    let mut sigmas = vec![Vec::with_capacity(rows.len()); n_comp];
    let mut dates = Vec::with_capacity(rows.len());
    for (line_no, row) in &rows {
        if row.len() != n_obs + n_date {
            return Err(GctsError::parse(
                path,
                *line_no,
                format!(
                    "expected {} columns ({} observation, {} date), found {}",
                    n_obs + n_date,
                    n_obs,
                    n_date,
                    row.len()
                ),
            ));
        }
        for c in 0..n_comp {
            values[c].push(row[c]);
            sigmas[c].push(row[n_comp + c]);
        }
        let date = DateRepr::from_columns(date_format, &row[n_obs..])
            .map_err(|e| GctsError::parse(path, *line_no, e.to_string()))?;
        dates.push(date);
    }

    let header = SeriesHeader {
        site: fields.site.unwrap_or_default(),
        components,
        unit: fields.unit.unwrap_or_default(),
        date_format,
        offsets,
        data_order: fields
            .data_order
            .unwrap_or_else(|| components.default_data_order()),
        comments: fields.comments,
    };
    let series = components
        .components()
        .into_iter()
        .zip(values.into_iter().zip(sigmas))
        .map(|(component, (values, sigmas))| ComponentSeries {
            component,
            values,
            sigmas,
        })
        .collect();
    TimeSeries::new(header, series, dates)
}

/// Returns `true` once the end-of-header marker is reached.
fn parse_header_line(
    rest: &str,
    line_no: usize,
    path: &Path,
    fields: &mut HeaderFields,
) -> Result<bool> {
    let rest = rest.trim();
    if rest == END_OF_HEADER {
        return Ok(true);
    }
    let Some((key, value)) = rest.split_once(':') else {
        log::debug!("{}:{line_no}: skipping header line without key", path.display());
        return Ok(false);
    };
    let value = value.trim().to_string();
    let bad = |e: GctsError| GctsError::parse(path, line_no, e.to_string());
    match key.trim() {
        KEY_SITE => fields.site = Some(value),
        KEY_COMPONENT => fields.component = Some(value.parse().map_err(bad)?),
        KEY_UNIT => fields.unit = Some(value),
        KEY_DATE_FORMAT => fields.date_format = Some(value.parse().map_err(bad)?),
        KEY_OFFSET => fields.offsets.push((line_no, value)),
        KEY_DATA_ORDER => fields.data_order = Some(value),
        KEY_COMMENT => fields.comments.push(value),
        other => log::debug!("{}:{line_no}: ignoring header key '{other}'", path.display()),
    }
    Ok(false)
}

fn header_line(out: &mut String, key: &str, value: &str) {
    out.push_str(&format!("* {key:<KEY_WIDTH$}: {value}\n"));
}

/// Render a series in `.tse` layout.
pub fn render(series: &TimeSeries) -> String {
    let header = series.header();
    let mut out = String::new();
    header_line(&mut out, KEY_SITE, &header.site);
    header_line(&mut out, KEY_COMPONENT, header.components.tag());
    header_line(&mut out, KEY_UNIT, &header.unit);
    header_line(&mut out, KEY_DATE_FORMAT, header.date_format.tag());
    for offset in &header.offsets {
        header_line(&mut out, KEY_OFFSET, &offset.to_string());
    }
    header_line(&mut out, KEY_DATA_ORDER, &header.data_order);
    for comment in &header.comments {
        header_line(&mut out, KEY_COMMENT, comment);
    }
    out.push_str(&format!("* {END_OF_HEADER}\n"));

    let comps = series.components();
    for (i, date) in series.dates().iter().enumerate() {
        for c in comps {
            out.push_str(&format!("{:14.6}", c.values[i]));
        }
        for c in comps {
            out.push_str(&format!("{:14.6}", c.sigmas[i]));
        }
        for col in date.columns() {
            if date.format().is_scalar() {
                out.push_str(&format!("{col:14.6}"));
            } else {
                out.push_str(&format!("{:8}", col as i64));
            }
        }
        out.push('\n');
    }
    out
}

/// Write a series to `path`, replacing any existing file.
pub fn write(path: impl AsRef<Path>, series: &TimeSeries) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, render(series)).map_err(|e| GctsError::io(path, e))?;
    log::info!("file written: {} ({} rows)", path.display(), series.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Component;
    use std::path::PathBuf;

    const ALL_YMD: &str = "\
* SITE         : WTZR
* COMPONENT    : all
* UNIT         : mm
* DATE FORMAT  : yyyymmdd
* OFFSET       : 2014 1 3
* DATA ORDER   : E N U sE sN sU date
* COMMENT      : campaign data
* ENDOFHEADER
      1.000000      2.000000      3.000000      0.100000      0.200000      0.300000    2014       1       1
* a stray comment row
      1.500000      2.500000      3.500000      0.100000      0.200000      0.300000    2014       1       2
      2.000000      3.000000      4.000000      0.100000      0.200000      0.300000    2014       1       5
";

    fn dummy_path() -> PathBuf {
        PathBuf::from("test.tse")
    }

    #[test]
    fn test_parse_all_components() {
        let series = parse(ALL_YMD, &dummy_path()).unwrap();
        let header = series.header();
        assert_eq!(header.site, "WTZR");
        assert_eq!(header.components, ComponentSet::All);
        assert_eq!(header.date_format, DateFormat::Ymd);
        assert_eq!(
            header.offsets,
            vec![DateRepr::Ymd {
                year: 2014,
                month: 1,
                day: 3
            }]
        );
        assert_eq!(header.comments, vec!["campaign data".to_string()]);
        assert_eq!(series.len(), 3);
        let up = series.component(Component::Up).unwrap();
        assert_eq!(up.values, vec![3.0, 3.5, 4.0]);
        assert_eq!(up.sigmas, vec![0.3, 0.3, 0.3]);
        let north = series.component(Component::North).unwrap();
        assert_eq!(north.values, vec![2.0, 2.5, 3.0]);
    }

    #[test]
    fn test_render_reproduces_input() {
        let series = parse(ALL_YMD, &dummy_path()).unwrap();
        let rendered = render(&series);
        let expected: String = ALL_YMD
            .lines()
            .filter(|l| !l.starts_with("* a stray"))
            .map(|l| format!("{l}\n"))
            .collect();
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_scalar_dates_use_fixed_point() {
        let mut header = SeriesHeader::new(
            "TEST",
            ComponentSet::Single(Component::East),
            "mm",
            DateFormat::Mjd,
        );
        header.offsets.push(DateRepr::Mjd(56610.0));
        let series = TimeSeries::new(
            header,
            vec![ComponentSeries {
                component: Component::East,
                values: vec![1.25, -0.5],
                sigmas: vec![0.8, 0.8],
            }],
            vec![DateRepr::Mjd(56604.0), DateRepr::Mjd(56611.5)],
        )
        .unwrap();
        let text = render(&series);
        assert!(text.contains("* OFFSET       : 56610\n"));
        assert!(text.contains("      1.250000      0.800000  56604.000000\n"));
        assert!(text.contains("     -0.500000      0.800000  56611.500000\n"));
        let back = parse(&text, &dummy_path()).unwrap();
        assert_eq!(back, series);
    }

    #[test]
    fn test_parse_errors_carry_line_numbers() {
        let text = "\
* COMPONENT    : up
* DATE FORMAT  : mjd
* ENDOFHEADER
  1.0  0.1  56604
  1.0  0.1
";
        match parse(text, &dummy_path()) {
            Err(GctsError::Parse { line, .. }) => assert_eq!(line, 5),
            other => panic!("expected parse error, got {other:?}"),
        }

        let bad_format = "* COMPONENT    : up\n* DATE FORMAT  : julian\n* ENDOFHEADER\n";
        match parse(bad_format, &dummy_path()) {
            Err(GctsError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }

        let missing = "* SITE         : X\n* ENDOFHEADER\n";
        assert!(matches!(
            parse(missing, &dummy_path()),
            Err(GctsError::Parse { .. })
        ));
    }

    #[test]
    fn test_write_and_read_file() {
        let dir = std::env::temp_dir().join(format!("gcts_tse_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("roundtrip.tse");
        let series = parse(ALL_YMD, &dummy_path()).unwrap();
        write(&path, &series).unwrap();
        let back = read(&path).unwrap();
        assert_eq!(back, series);
        fs::remove_dir_all(&dir).unwrap();
    }
}
