use std::collections::HashMap;

use chrono::{DateTime, Utc};
use riv_csv::{write_csv_bytes, CsvRow, CsvValue, ExtraAction};
use riv_schemas::{InventoryRecord, TenantConfig, CANONICAL_COLUMNS};
use serde_json::json;
use uuid::Uuid;

pub fn record_to_csv_row(record: &InventoryRecord) -> CsvRow {
    let mut row = CsvRow::new();
    row.insert("sku".to_string(), CsvValue::Text(record.sku.clone()));
    row.insert("vendor_sku".to_string(), CsvValue::Text(record.vendor_sku.clone()));
    row.insert("vendor_id".to_string(), CsvValue::Text(record.vendor_id.clone()));
    row.insert(
        "quantity_available".to_string(),
        CsvValue::Text(record.quantity_available.to_string()),
    );
    row.insert(
        "lead_time_days".to_string(),
        match record.lead_time_days {
            Some(v) => CsvValue::Text(v.to_string()),
            None => CsvValue::Empty,
        },
    );
    row.insert("cost".to_string(), opt_decimal(record.cost));
    row.insert("map_price".to_string(), opt_decimal(record.map_price));
    row.insert("price".to_string(), CsvValue::Decimal(record.price));
    row.insert("msrp".to_string(), opt_decimal(record.msrp));
    row.insert("condition".to_string(), CsvValue::Text(record.condition.to_string()));
    row.insert(
        "brand".to_string(),
        record.brand.clone().map(CsvValue::Text).unwrap_or(CsvValue::Empty),
    );
    row.insert(
        "title".to_string(),
        record.title.clone().map(CsvValue::Text).unwrap_or(CsvValue::Empty),
    );
    row.insert(
        "updated_at".to_string(),
        match record.updated_at {
            Some(dt) => CsvValue::Instant(dt),
            None => CsvValue::Empty,
        },
    );
    row
}

fn opt_decimal(value: Option<rust_decimal::Decimal>) -> CsvValue {
    match value {
        Some(d) => CsvValue::Decimal(d),
        None => CsvValue::Empty,
    }
}

fn write_records_csv(records: &[InventoryRecord]) -> Result<Vec<u8>, riv_csv::CsvError> {
    let fieldnames: Vec<String> = CANONICAL_COLUMNS.iter().map(|s| s.to_string()).collect();
    let rows: Vec<CsvRow> = records.iter().map(record_to_csv_row).collect();
    write_csv_bytes(&rows, &fieldnames, ExtraAction::Raise)
}

pub fn write_merged_csv(records: &[InventoryRecord]) -> Result<Vec<u8>, riv_csv::CsvError> {
    write_records_csv(records)
}

/// A single vendor's post-parse, pre-merge records, as written to
/// `normalized/{vendor_id}/normalized.csv`.
pub fn write_normalized_csv(records: &[InventoryRecord]) -> Result<Vec<u8>, riv_csv::CsvError> {
    write_records_csv(records)
}

pub fn config_snapshot_json(tenant: &TenantConfig, config_hash: &str) -> Vec<u8> {
    let value = json!({
        "tenant_id": tenant.tenant_id,
        "schema_version": tenant.schema_version,
        "config_hash": config_hash,
        "vendor_count": tenant.vendors.len(),
        "config": tenant,
    });
    serde_json::to_vec_pretty(&value).expect("json serialization cannot fail")
}

pub const SELECTION_LATEST_BY_LAST_MODIFIED: &str = "latest_by_last_modified";

/// What happened when the worker looked for a vendor's input this run.
pub enum ManifestStatus {
    Found {
        etag: Option<String>,
        size: i64,
        last_modified: DateTime<Utc>,
        run_copy_key: String,
    },
    Missing,
}

pub struct ManifestEntry {
    pub vendor_id: String,
    pub status: ManifestStatus,
}

pub fn input_manifest_json(entries: &[ManifestEntry]) -> Vec<u8> {
    let rendered: Vec<_> = entries
        .iter()
        .map(|entry| match &entry.status {
            ManifestStatus::Found {
                etag,
                size,
                last_modified,
                run_copy_key,
            } => json!({
                "vendor_id": entry.vendor_id,
                "status": "found",
                "etag": etag,
                "size": size,
                "last_modified": last_modified,
                "run_copy_key": run_copy_key,
                "selection": SELECTION_LATEST_BY_LAST_MODIFIED,
            }),
            ManifestStatus::Missing => json!({
                "vendor_id": entry.vendor_id,
                "status": "missing",
            }),
        })
        .collect();
    serde_json::to_vec_pretty(&json!({ "inputs": rendered })).expect("json serialization cannot fail")
}

pub fn errors_json(errors: &[serde_json::Value]) -> Vec<u8> {
    serde_json::to_vec_pretty(&json!({ "errors": errors })).expect("json serialization cannot fail")
}

pub struct RunSummaryInput<'a> {
    pub run_id: Uuid,
    pub tenant_id: &'a str,
    pub config_version: i64,
    pub vendor_record_counts: &'a HashMap<String, usize>,
    pub invalid_rows: usize,
    pub total_rows: usize,
    pub warnings: &'a [String],
    pub duration_seconds: f64,
    pub stage_times: &'a HashMap<String, f64>,
    pub finished_at: DateTime<Utc>,
}

pub fn run_summary_json(input: RunSummaryInput<'_>) -> Vec<u8> {
    let value = json!({
        "run_id": input.run_id,
        "tenant_id": input.tenant_id,
        "config_version": input.config_version,
        "vendor_record_counts": input.vendor_record_counts,
        "invalid_rows": input.invalid_rows,
        "total_rows": input.total_rows,
        "warnings": input.warnings,
        "duration_seconds": input.duration_seconds,
        "stage_times": input.stage_times,
        "finished_at": input.finished_at,
        // preserved for external consumers that still read the legacy name
        "completed_at": input.finished_at,
    });
    serde_json::to_vec_pretty(&value).expect("json serialization cannot fail")
}
