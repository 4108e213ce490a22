use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;

/// A single canonical CSV cell. Typed so the encoder knows which
/// normalization rule applies without sniffing the string.
#[derive(Debug, Clone, PartialEq)]
pub enum CsvValue {
    Text(String),
    Decimal(Decimal),
    Instant(DateTime<Utc>),
    Empty,
}

impl CsvValue {
    fn to_field(&self) -> String {
        match self {
            CsvValue::Text(s) => s.clone(),
            CsvValue::Decimal(d) => d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero).to_string(),
            CsvValue::Instant(dt) => dt.with_timezone(&Utc).format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            CsvValue::Empty => String::new(),
        }
    }
}

pub type CsvRow = BTreeMap<String, CsvValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraAction {
    Raise,
    Ignore,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CsvError {
    UnknownField(String),
    MissingField(String),
    Write(String),
    Read(String),
}

impl fmt::Display for CsvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CsvError::UnknownField(name) => write!(f, "unexpected field not in fieldnames: {name}"),
            CsvError::MissingField(name) => write!(f, "missing required field: {name}"),
            CsvError::Write(msg) => write!(f, "csv write error: {msg}"),
            CsvError::Read(msg) => write!(f, "csv read error: {msg}"),
        }
    }
}

impl std::error::Error for CsvError {}

/// Writes rows as RFC 4180 CSV bytes: minimal quoting, `\n` line
/// terminator, rows sorted by `(sku, vendor_id)` ascending when
/// `vendor_id` is one of `fieldnames`, else by `sku` alone. Decimal and
/// instant fields are normalized by `CsvValue::to_field` regardless of how
/// the caller produced them.
pub fn write_csv_bytes(
    rows: &[CsvRow],
    fieldnames: &[String],
    extrasaction: ExtraAction,
) -> Result<Vec<u8>, CsvError> {
    if extrasaction == ExtraAction::Raise {
        for row in rows {
            for key in row.keys() {
                if !fieldnames.iter().any(|f| f == key) {
                    return Err(CsvError::UnknownField(key.clone()));
                }
            }
        }
    }

    let sort_by_vendor = fieldnames.iter().any(|f| f == "vendor_id");
    let mut sorted: Vec<&CsvRow> = rows.iter().collect();
    sorted.sort_by(|a, b| {
        let sku_a = field_as_str(a, "sku");
        let sku_b = field_as_str(b, "sku");
        if sort_by_vendor {
            let vendor_a = field_as_str(a, "vendor_id");
            let vendor_b = field_as_str(b, "vendor_id");
            (sku_a, vendor_a).cmp(&(sku_b, vendor_b))
        } else {
            sku_a.cmp(&sku_b)
        }
    });

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .quote_style(csv::QuoteStyle::Necessary)
        .from_writer(Vec::new());

    writer
        .write_record(fieldnames)
        .map_err(|e| CsvError::Write(e.to_string()))?;

    for row in sorted {
        let record: Vec<String> = fieldnames
            .iter()
            .map(|f| row.get(f).map(CsvValue::to_field).unwrap_or_default())
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| CsvError::Write(e.to_string()))?;
    }

    writer.into_inner().map_err(|e| CsvError::Write(e.to_string()))
}

fn field_as_str(row: &CsvRow, key: &str) -> String {
    match row.get(key) {
        Some(v) => v.to_field(),
        None => String::new(),
    }
}

/// Reads CSV bytes into row maps of raw string cells, header-driven.
/// Decoding into text happens upstream in `decode_bytes`; this only
/// splits already-decoded text into records.
pub fn read_csv_rows(text: &str) -> Result<Vec<BTreeMap<String, String>>, CsvError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| CsvError::Read(e.to_string()))?
        .clone();
    let mut out = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| CsvError::Read(e.to_string()))?;
        let mut row = BTreeMap::new();
        for (idx, field) in record.iter().enumerate() {
            if let Some(name) = headers.get(idx) {
                row.insert(name.to_string(), field.to_string());
            }
        }
        out.push(row);
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError {
    pub encoding: String,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to decode bytes as {}", self.encoding)
    }
}

impl std::error::Error for DecodeError {}

/// Decodes raw vendor file bytes into text. `utf-8` is strict (invalid
/// sequences are an error, matching Python's default `errors="strict"`).
/// `latin-1`/`iso-8859-1` is total: every byte maps 1:1 to a Unicode
/// codepoint, so it never fails.
pub fn decode_bytes(bytes: &[u8], encoding: &str) -> Result<String, DecodeError> {
    match normalize_encoding(encoding).as_str() {
        "utf-8" => std::str::from_utf8(bytes)
            .map(|s| s.to_string())
            .map_err(|_| DecodeError {
                encoding: encoding.to_string(),
            }),
        "latin-1" => Ok(bytes.iter().map(|&b| b as char).collect()),
        other => Err(DecodeError {
            encoding: other.to_string(),
        }),
    }
}

fn normalize_encoding(encoding: &str) -> String {
    match encoding.trim().to_lowercase().as_str() {
        "utf-8" | "utf8" => "utf-8".to_string(),
        "latin-1" | "latin1" | "iso-8859-1" | "iso8859-1" => "latin-1".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(sku: &str, vendor_id: &str) -> CsvRow {
        let mut r = CsvRow::new();
        r.insert("sku".to_string(), CsvValue::Text(sku.to_string()));
        r.insert("vendor_id".to_string(), CsvValue::Text(vendor_id.to_string()));
        r
    }

    #[test]
    fn sorts_by_sku_then_vendor_id() {
        let fields = vec!["sku".to_string(), "vendor_id".to_string()];
        let rows = vec![row("b", "v2"), row("a", "v2"), row("a", "v1")];
        let bytes = write_csv_bytes(&rows, &fields, ExtraAction::Raise).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "a,v1");
        assert_eq!(lines[2], "a,v2");
        assert_eq!(lines[3], "b,v2");
    }

    #[test]
    fn decimal_normalizes_to_two_places_half_up() {
        let fields = vec!["sku".to_string(), "price".to_string()];
        let mut r = CsvRow::new();
        r.insert("sku".to_string(), CsvValue::Text("a".to_string()));
        r.insert("price".to_string(), CsvValue::Decimal(Decimal::new(1235, 3))); // 1.235
        let bytes = write_csv_bytes(&[r], &fields, ExtraAction::Raise).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("a,1.24"));
    }

    #[test]
    fn raise_rejects_unknown_field() {
        let fields = vec!["sku".to_string()];
        let rows = vec![row("a", "v1")];
        let err = write_csv_bytes(&rows, &fields, ExtraAction::Raise).unwrap_err();
        assert_eq!(err, CsvError::UnknownField("vendor_id".to_string()));
    }

    #[test]
    fn ignore_drops_unknown_field() {
        let fields = vec!["sku".to_string()];
        let rows = vec![row("a", "v1")];
        let bytes = write_csv_bytes(&rows, &fields, ExtraAction::Ignore).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "sku\na\n");
    }

    #[test]
    fn utf8_decode_is_strict() {
        let bytes = [0xff, 0xfe];
        assert!(decode_bytes(&bytes, "utf-8").is_err());
    }

    #[test]
    fn latin1_decode_never_fails() {
        let bytes = [0xff, 0x41];
        let text = decode_bytes(&bytes, "latin-1").unwrap();
        assert_eq!(text.chars().count(), 2);
    }
}
