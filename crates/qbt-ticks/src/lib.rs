//! CSV tick source: the only concrete implementation of "an iterator of
//! validated, timestamp-sorted `Market` records" the core is written
//! against.
//!
//! Required columns: `date, symbol, mid`. Optional: `bid, ask, spread_bps,
//! volume`. Dates are parsed and the full row set is sorted (stable) by
//! timestamp before the remaining fields are validated row by row — the
//! validation failure for a bad `mid`/`bid`/`ask`/etc. therefore carries the
//! row's position in the sorted sequence, same as a row enumerated mid-stream
//! from an already-sorted reader.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use qbt_types::Market;

/// Errors the tick source can raise. All are fatal to the run.
#[derive(Clone, Debug, PartialEq)]
pub enum TickSourceError {
    MissingColumns(Vec<String>),
    UnparseableDate { row: usize, raw: String },
    Invalid { row: usize, field: &'static str, reason: String },
    Csv(String),
}

impl fmt::Display for TickSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickSourceError::MissingColumns(cols) => {
                write!(f, "CSV missing columns: {cols:?}")
            }
            TickSourceError::UnparseableDate { row, raw } => {
                write!(f, "invalid date at row {row}: {raw:?}")
            }
            TickSourceError::Invalid { row, field, reason } => {
                write!(f, "invalid {field} at row {row}: {reason}")
            }
            TickSourceError::Csv(msg) => write!(f, "CSV error: {msg}"),
        }
    }
}

impl std::error::Error for TickSourceError {}

impl From<csv::Error> for TickSourceError {
    fn from(e: csv::Error) -> Self {
        TickSourceError::Csv(e.to_string())
    }
}

const REQUIRED_COLUMNS: [&str; 3] = ["date", "symbol", "mid"];
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%:z", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d"];

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in DATE_FORMATS {
        if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc));
        }
        if let Ok(nd) = chrono::NaiveDate::parse_from_str(raw, fmt) {
            return Some(DateTime::<Utc>::from_naive_utc_and_offset(
                nd.and_hms_opt(0, 0, 0).unwrap(),
                Utc,
            ));
        }
    }
    None
}

fn parse_required_f64(raw: &str, row: usize, field: &'static str) -> Result<f64, TickSourceError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| TickSourceError::Invalid { row, field, reason: format!("{raw:?} is not a number") })?;
    if !value.is_finite() {
        return Err(TickSourceError::Invalid {
            row,
            field,
            reason: format!("must be finite, got {value}"),
        });
    }
    Ok(value)
}

fn parse_optional_f64(raw: &str, row: usize, field: &'static str) -> Result<Option<f64>, TickSourceError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(parse_required_f64(trimmed, row, field)?))
}

struct RawRow {
    timestamp: DateTime<Utc>,
    symbol: String,
    mid: String,
    bid: Option<String>,
    ask: Option<String>,
    spread_bps: Option<String>,
    volume: Option<String>,
}

/// Read, validate and sort a CSV tick file into a `Vec<Market>`.
pub fn read_sorted_ticks(path: &Path) -> Result<Vec<Market>, TickSourceError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| TickSourceError::Csv(e.to_string()))?;

    let headers = rdr.headers()?.clone();
    let col_idx: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.to_string(), i))
        .collect();

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !col_idx.contains_key(**c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(TickSourceError::MissingColumns(missing));
    }

    let i_date = col_idx["date"];
    let i_symbol = col_idx["symbol"];
    let i_mid = col_idx["mid"];
    let i_bid = col_idx.get("bid").copied();
    let i_ask = col_idx.get("ask").copied();
    let i_spread_bps = col_idx.get("spread_bps").copied();
    let i_volume = col_idx.get("volume").copied();

    let mut rows = Vec::new();
    for (file_row, record) in rdr.records().enumerate() {
        let record = record?;
        let raw_date = record.get(i_date).unwrap_or("").to_string();
        let timestamp = parse_timestamp(&raw_date).ok_or_else(|| TickSourceError::UnparseableDate {
            row: file_row + 1,
            raw: raw_date.clone(),
        })?;
        rows.push(RawRow {
            timestamp,
            symbol: record.get(i_symbol).unwrap_or("").to_string(),
            mid: record.get(i_mid).unwrap_or("").to_string(),
            bid: i_bid.and_then(|i| record.get(i)).map(|s| s.to_string()),
            ask: i_ask.and_then(|i| record.get(i)).map(|s| s.to_string()),
            spread_bps: i_spread_bps.and_then(|i| record.get(i)).map(|s| s.to_string()),
            volume: i_volume.and_then(|i| record.get(i)).map(|s| s.to_string()),
        });
    }

    rows.sort_by_key(|r| r.timestamp);

    let mut ticks = Vec::with_capacity(rows.len());
    for (i, row) in rows.into_iter().enumerate() {
        let row_num = i + 1;
        let mid = parse_required_f64(&row.mid, row_num, "mid")?;
        if mid <= 0.0 {
            return Err(TickSourceError::Invalid {
                row: row_num,
                field: "mid",
                reason: format!("must be > 0, got {mid}"),
            });
        }
        let bid = row.bid.as_deref().map(|s| parse_optional_f64(s, row_num, "bid")).transpose()?.flatten();
        let ask = row.ask.as_deref().map(|s| parse_optional_f64(s, row_num, "ask")).transpose()?.flatten();
        let spread_bps = row
            .spread_bps
            .as_deref()
            .map(|s| parse_optional_f64(s, row_num, "spread_bps"))
            .transpose()?
            .flatten();
        let volume = row.volume.as_deref().map(|s| parse_optional_f64(s, row_num, "volume")).transpose()?.flatten();

        if let Some(b) = bid {
            if b <= 0.0 {
                return Err(TickSourceError::Invalid { row: row_num, field: "bid", reason: format!("must be > 0, got {b}") });
            }
        }
        if let Some(a) = ask {
            if a <= 0.0 {
                return Err(TickSourceError::Invalid { row: row_num, field: "ask", reason: format!("must be > 0, got {a}") });
            }
        }
        if let (Some(b), Some(a)) = (bid, ask) {
            if a < b {
                return Err(TickSourceError::Invalid {
                    row: row_num,
                    field: "ask",
                    reason: format!("ask ({a}) must be >= bid ({b})"),
                });
            }
        }
        if let Some(s) = spread_bps {
            if s < 0.0 {
                return Err(TickSourceError::Invalid { row: row_num, field: "spread_bps", reason: format!("must be >= 0, got {s}") });
            }
        }
        if let Some(v) = volume {
            if v < 0.0 {
                return Err(TickSourceError::Invalid { row: row_num, field: "volume", reason: format!("must be >= 0, got {v}") });
            }
        }

        let market = Market::new(row.timestamp, row.symbol, mid, bid, ask, spread_bps, volume)
            .map_err(|e| TickSourceError::Invalid { row: row_num, field: "market", reason: e.to_string() })?;
        ticks.push(market);
    }

    Ok(ticks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn reads_and_sorts_by_date() {
        let f = write_csv("date,symbol,mid\n2024-01-02,AAPL,101\n2024-01-01,AAPL,100\n");
        let ticks = read_sorted_ticks(f.path()).unwrap();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].mid, 100.0);
        assert_eq!(ticks[1].mid, 101.0);
    }

    #[test]
    fn rejects_missing_required_column() {
        let f = write_csv("date,mid\n2024-01-01,100\n");
        let err = read_sorted_ticks(f.path()).unwrap_err();
        assert!(matches!(err, TickSourceError::MissingColumns(_)));
    }

    #[test]
    fn rejects_unparseable_date() {
        let f = write_csv("date,symbol,mid\nnot-a-date,AAPL,100\n");
        let err = read_sorted_ticks(f.path()).unwrap_err();
        assert!(matches!(err, TickSourceError::UnparseableDate { .. }));
    }

    #[test]
    fn rejects_non_positive_mid() {
        let f = write_csv("date,symbol,mid\n2024-01-01,AAPL,0\n");
        let err = read_sorted_ticks(f.path()).unwrap_err();
        assert!(matches!(err, TickSourceError::Invalid { field: "mid", .. }));
    }

    #[test]
    fn rejects_ask_below_bid() {
        let f = write_csv("date,symbol,mid,bid,ask\n2024-01-01,AAPL,100,101,100\n");
        let err = read_sorted_ticks(f.path()).unwrap_err();
        assert!(matches!(err, TickSourceError::Invalid { field: "ask", .. }));
    }

    #[test]
    fn optional_columns_default_to_none() {
        let f = write_csv("date,symbol,mid\n2024-01-01,AAPL,100\n");
        let ticks = read_sorted_ticks(f.path()).unwrap();
        assert_eq!(ticks[0].bid, None);
        assert_eq!(ticks[0].volume, None);
    }
}
