use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use riv_csv::read_csv_rows;
use riv_schemas::InventoryRecord;
use rust_decimal::Decimal;

pub const REQUIRED_COLUMNS: [&str; 2] = ["sku", "quantity_available"];

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub row_number: usize,
    pub reason: String,
    pub row_data: BTreeMap<String, String>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row_number, self.reason)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq)]
pub struct MissingRequiredColumnsError {
    pub missing: Vec<String>,
}

impl fmt::Display for MissingRequiredColumnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing required columns: {}", self.missing.join(", "))
    }
}

impl std::error::Error for MissingRequiredColumnsError {}

/// Parses vendor CSV text into canonical records plus any per-row
/// failures. Failing rows do not abort the parse: every row is attempted,
/// and failures are accumulated so the caller can apply an error-rate
/// threshold policy.
pub fn parse_csv(
    text: &str,
    vendor_id: &str,
    column_map: Option<&HashMap<String, String>>,
) -> Result<(Vec<InventoryRecord>, Vec<ParseError>), MissingRequiredColumnsError> {
    let rows = read_csv_rows(text).map_err(|_| MissingRequiredColumnsError {
        missing: REQUIRED_COLUMNS.iter().map(|s| s.to_string()).collect(),
    })?;

    let header: Vec<String> = rows
        .first()
        .map(|r| r.keys().cloned().collect())
        .unwrap_or_default();
    let mapped_header: Vec<String> = header
        .iter()
        .map(|h| map_column(h, column_map))
        .collect();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !mapped_header.iter().any(|h| h == *c))
        .map(|c| c.to_string())
        .collect();
    if !rows.is_empty() && !missing.is_empty() {
        return Err(MissingRequiredColumnsError { missing });
    }

    let mut records = Vec::new();
    let mut errors = Vec::new();

    for (idx, raw_row) in rows.into_iter().enumerate() {
        let row_number = idx + 2; // header is row 1
        let mapped: BTreeMap<String, String> = raw_row
            .iter()
            .map(|(k, v)| (map_column(k, column_map), v.clone()))
            .collect();
        match parse_row(&mapped, vendor_id) {
            Ok(rec) => records.push(rec),
            Err(reason) => errors.push(ParseError {
                row_number,
                reason,
                row_data: raw_row,
            }),
        }
    }

    Ok((records, errors))
}

/// `column_map` is canonical -> source, e.g. `{"sku": "item_sku"}` means
/// the vendor's source header `item_sku` carries the canonical `sku`
/// field. Given a raw source header, finds the canonical name it maps
/// from; headers with no entry pass through unchanged.
fn map_column(raw_header: &str, column_map: Option<&HashMap<String, String>>) -> String {
    column_map
        .and_then(|m| m.iter().find(|(_, source)| source.as_str() == raw_header))
        .map(|(canonical, _)| canonical.clone())
        .unwrap_or_else(|| raw_header.to_string())
}

fn parse_row(row: &BTreeMap<String, String>, vendor_id: &str) -> Result<InventoryRecord, String> {
    let sku = row.get("sku").cloned().unwrap_or_default();
    let vendor_sku = row
        .get("vendor_sku")
        .cloned()
        .unwrap_or_else(|| sku.clone());
    let quantity_available = parse_int(row.get("quantity_available"))
        .ok_or_else(|| "quantity_available is required and must be an integer".to_string())?;
    let lead_time_days = opt_parse_int(row.get("lead_time_days"))?;
    let cost = opt_parse_decimal(row.get("cost"))?;
    let map_price = opt_parse_decimal(row.get("map_price"))?;
    let price = opt_parse_decimal(row.get("price"))?;
    let msrp = opt_parse_decimal(row.get("msrp"))?;
    let condition = row
        .get("condition")
        .map(|s| s.as_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("new");
    let brand = row.get("brand").filter(|s| !s.is_empty()).cloned();
    let title = row.get("title").filter(|s| !s.is_empty()).cloned();
    let updated_at = opt_parse_datetime(row.get("updated_at"))?;

    InventoryRecord::new(
        sku,
        vendor_sku,
        vendor_id,
        quantity_available,
        lead_time_days,
        cost,
        map_price,
        price,
        msrp,
        condition,
        brand,
        title,
        updated_at,
    )
    .map_err(|e| e.to_string())
}

fn parse_int(raw: Option<&String>) -> Option<i64> {
    raw.and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            t.parse::<i64>().ok()
        }
    })
}

fn opt_parse_int(raw: Option<&String>) -> Result<Option<i64>, String> {
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| format!("invalid integer: {s:?}")),
    }
}

fn opt_parse_decimal(raw: Option<&String>) -> Result<Option<Decimal>, String> {
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => s
            .trim()
            .parse::<Decimal>()
            .map(Some)
            .map_err(|_| format!("invalid decimal: {s:?}")),
    }
}

fn opt_parse_datetime(raw: Option<&String>) -> Result<Option<DateTime<Utc>>, String> {
    let s = match raw {
        None => return Ok(None),
        Some(s) if s.trim().is_empty() => return Ok(None),
        Some(s) => s.trim(),
    };
    for fmt in DATETIME_FORMATS {
        if fmt == "%Y-%m-%d" {
            if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
                let dt = d.and_hms_opt(0, 0, 0).unwrap();
                return Ok(Some(Utc.from_utc_datetime(&dt)));
            }
        } else if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Some(Utc.from_utc_datetime(&dt)));
        }
    }
    Err(format!("unparseable datetime: {s:?}"))
}
