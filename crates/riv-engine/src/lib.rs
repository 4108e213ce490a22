use std::collections::{BTreeMap, HashMap};
use std::fmt;

use riv_csv::decode_bytes;
use riv_parser::{parse_csv, ParseError};
use riv_schemas::{InventoryRecord, TenantConfig};
use riv_skumap::SkuMap;

/// Suffix used to derive a sku-map storage key from a vendor id, mirroring
/// the convention the ingestion side uses when it stages a sku remap file
/// alongside a vendor's inbound drop.
pub const SKU_MAP_SUFFIX: &str = "::sku_map";

pub fn sku_map_input_key(vendor_id: &str) -> String {
    format!("{vendor_id}{SKU_MAP_SUFFIX}")
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    DecodeError { vendor_id: String, encoding: String },
    MissingRequiredColumns { vendor_id: String, missing: Vec<String> },
    RequiredVendorMissing { vendor_id: String },
    NoRowsParsed,
    ValidationErrors { invalid_row_count: usize },
    Invalid(String),
}

impl EngineError {
    /// The run-record `error_code` this failure maps to.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::DecodeError { .. } => "DECODE_ERROR",
            EngineError::MissingRequiredColumns { .. } => "missing_required_columns",
            EngineError::RequiredVendorMissing { .. } => "REQUIRED_VENDOR_MISSING",
            EngineError::NoRowsParsed => "no_rows_parsed",
            EngineError::ValidationErrors { .. } => "validation_errors",
            EngineError::Invalid(_) => "invalid_input",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::DecodeError { vendor_id, encoding } => {
                write!(f, "failed to decode vendor {vendor_id} input as {encoding}")
            }
            EngineError::MissingRequiredColumns { vendor_id, missing } => {
                write!(f, "vendor {vendor_id} is missing required columns: {}", missing.join(", "))
            }
            EngineError::RequiredVendorMissing { vendor_id } => {
                write!(f, "required vendor {vendor_id} has no input file")
            }
            EngineError::NoRowsParsed => write!(f, "no rows were parsed from any vendor input"),
            EngineError::ValidationErrors { invalid_row_count } => {
                write!(f, "{invalid_row_count} invalid rows exceeded the configured threshold")
            }
            EngineError::Invalid(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[derive(Debug, Clone)]
pub struct VendorResult {
    pub vendor_id: String,
    pub records: Vec<InventoryRecord>,
    pub errors: Vec<ParseError>,
}

/// A vendor the tenant config lists but for which no input file was found
/// this run. Carried through so the worker can record an
/// `OPTIONAL_VENDOR_MISSING` error-report entry for it regardless of
/// whether the vendor itself is marked required.
#[derive(Debug, Clone)]
pub struct MissingVendor {
    pub vendor_id: String,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub struct NormalizeResult {
    pub vendor_results: Vec<VendorResult>,
    /// All vendors' parsed records, concatenated, not yet merged or priced.
    pub records: Vec<InventoryRecord>,
    pub warnings: Vec<String>,
    pub missing_vendors: Vec<MissingVendor>,
    pub invalid_row_count: usize,
    pub valid_row_count: usize,
}

/// Decodes and parses one vendor's raw input bytes, applying that vendor's
/// sku remap (if configured) to the parsed records. `sku_map_text` is the
/// already-fetched contents of the vendor's sku-map blob; `None` while
/// `sku_map_required` is `true` is recorded as a parse error rather than
/// aborting the vendor's whole input.
pub fn process_vendor(
    vendor_id: &str,
    encoding: &str,
    column_map: Option<&HashMap<String, String>>,
    raw_bytes: &[u8],
    sku_map_required: bool,
    sku_map_text: Option<&str>,
) -> Result<VendorResult, EngineError> {
    let text = decode_bytes(raw_bytes, encoding).map_err(|_| EngineError::DecodeError {
        vendor_id: vendor_id.to_string(),
        encoding: encoding.to_string(),
    })?;
    let (mut records, mut errors) = parse_csv(&text, vendor_id, column_map).map_err(|e| {
        EngineError::MissingRequiredColumns {
            vendor_id: vendor_id.to_string(),
            missing: e.missing,
        }
    })?;

    if sku_map_required {
        match sku_map_text {
            Some(raw) => {
                let sku_map = SkuMap::from_text(raw).map_err(|e| EngineError::Invalid(e.to_string()))?;
                sku_map.apply(&mut records);
            }
            None => errors.push(ParseError {
                row_number: 0,
                reason: format!("missing sku map for vendor {vendor_id}"),
                row_data: BTreeMap::new(),
            }),
        }
    }

    Ok(VendorResult {
        vendor_id: vendor_id.to_string(),
        records,
        errors,
    })
}

/// Fetch-already-done -> normalize step for every configured vendor.
/// Pure and side-effect free: returns the per-vendor parse results plus an
/// aggregated record set, without applying the error-rate threshold (the
/// worker evaluates that after writing the per-vendor normalized CSVs and
/// error report, per the documented pipeline ordering) and without
/// merging or pricing.
pub fn normalize_vendors(
    tenant: &TenantConfig,
    vendor_inputs: &HashMap<String, Vec<u8>>,
    sku_map_texts: &HashMap<String, String>,
) -> Result<NormalizeResult, EngineError> {
    let mut all_records = Vec::new();
    let mut vendor_results = Vec::new();
    let mut warnings = Vec::new();
    let mut missing_vendors = Vec::new();
    let mut invalid_row_count = 0usize;

    for vendor in &tenant.vendors {
        let raw = match vendor_inputs.get(&vendor.vendor_id) {
            Some(raw) => raw,
            None => {
                if vendor.required && tenant.error_policy.missing_required_vendor_policy != "warn_only" {
                    return Err(EngineError::RequiredVendorMissing {
                        vendor_id: vendor.vendor_id.clone(),
                    });
                }
                warnings.push(format!("vendor {} has no input file", vendor.vendor_id));
                missing_vendors.push(MissingVendor {
                    vendor_id: vendor.vendor_id.clone(),
                    required: vendor.required,
                });
                continue;
            }
        };

        let result = process_vendor(
            &vendor.vendor_id,
            &vendor.parser.encoding,
            vendor.parser.column_map.as_ref(),
            raw,
            vendor.sku_map.is_some(),
            sku_map_texts.get(&vendor.vendor_id).map(|s| s.as_str()),
        )?;
        invalid_row_count += result.errors.len();
        all_records.extend(result.records.clone());
        vendor_results.push(result);
    }

    let valid_row_count = all_records.len();
    Ok(NormalizeResult {
        vendor_results,
        records: all_records,
        warnings,
        missing_vendors,
        invalid_row_count,
        valid_row_count,
    })
}

/// The error-rate gate: zero parsed rows, or too many invalid rows by
/// count or by percentage. Evaluated by the worker once the per-vendor
/// normalized CSVs and error report have already been written, with
/// `stage=MERGE_PRICE` already recorded -- not called from
/// `normalize_vendors` itself.
pub fn check_error_thresholds(
    tenant: &TenantConfig,
    invalid_row_count: usize,
    valid_row_count: usize,
) -> Result<(), EngineError> {
    if valid_row_count == 0 {
        return Err(EngineError::NoRowsParsed);
    }
    if let Some(max_rows) = tenant.error_policy.max_invalid_rows {
        if invalid_row_count as i64 > max_rows {
            return Err(EngineError::ValidationErrors { invalid_row_count });
        }
    }
    if let Some(max_pct) = tenant.error_policy.max_invalid_row_pct {
        let total_rows = invalid_row_count + valid_row_count;
        if total_rows > 0 {
            let pct = invalid_row_count as f64 / total_rows as f64;
            if pct > max_pct {
                return Err(EngineError::ValidationErrors { invalid_row_count });
            }
        }
    }
    Ok(())
}

/// Merges same-sku records under the best-offer strategy and prices the
/// winners. Pure: no I/O, no threshold gate.
pub fn merge_and_price(tenant: &TenantConfig, records: &[InventoryRecord]) -> Vec<InventoryRecord> {
    let merged = riv_merge::merge_best_offer(records, &tenant.merge.best_offer, tenant.pricing.shipping_handling_flat);
    let mut priced = merged;
    riv_pricing::apply_pricing(&mut priced, &tenant.pricing);
    priced
}

#[cfg(test)]
mod tests {
    use super::*;
    use riv_schemas::{
        BestOfferConfig, ErrorPolicyConfig, InboundConfig, MapPolicyConfig, MergeConfig,
        OutputConfig, ParserConfig, PricingConfig, RoundingConfig, VendorConfig,
    };

    fn tenant_config(vendors: Vec<VendorConfig>) -> TenantConfig {
        TenantConfig {
            schema_version: 1,
            tenant_id: "tenant-a".to_string(),
            timezone: "UTC".to_string(),
            default_currency: "USD".to_string(),
            vendors,
            pricing: PricingConfig {
                base_margin_pct: "0.2".parse().unwrap(),
                min_price: None,
                shipping_handling_flat: "1.00".parse().unwrap(),
                map_policy: MapPolicyConfig {
                    enforce: true,
                    map_floor_behavior: "max(price, map_price)".to_string(),
                },
                rounding: RoundingConfig {
                    mode: "nearest".to_string(),
                    increment: "0.01".parse().unwrap(),
                },
            },
            merge: MergeConfig {
                strategy: "best_offer".to_string(),
                best_offer: BestOfferConfig::default(),
            },
            output: OutputConfig::default(),
            error_policy: ErrorPolicyConfig::default(),
        }
    }

    fn vendor_config(vendor_id: &str, required: bool) -> VendorConfig {
        VendorConfig {
            vendor_id: vendor_id.to_string(),
            inbound: InboundConfig {
                kind: "s3".to_string(),
                s3_prefix: format!("inbound/{vendor_id}/"),
            },
            parser: ParserConfig {
                format: "csv".to_string(),
                delimiter: ',',
                encoding: "utf-8".to_string(),
                column_map: None,
            },
            sku_map: None,
            required,
        }
    }

    fn no_sku_maps() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn happy_merge_picks_in_stock_vendor() {
        let tenant = tenant_config(vec![vendor_config("A", true), vendor_config("B", true)]);
        let mut inputs = HashMap::new();
        inputs.insert(
            "A".to_string(),
            b"sku,quantity_available,cost\nSKU1,0,10.00\n".to_vec(),
        );
        inputs.insert(
            "B".to_string(),
            b"sku,quantity_available,cost\nSKU1,5,12.00\n".to_vec(),
        );
        let normalized = normalize_vendors(&tenant, &inputs, &no_sku_maps()).unwrap();
        check_error_thresholds(&tenant, normalized.invalid_row_count, normalized.valid_row_count).unwrap();
        let priced = merge_and_price(&tenant, &normalized.records);
        assert_eq!(priced.len(), 1);
        assert_eq!(priced[0].vendor_id, "B");
        assert_eq!(priced[0].price, "15.60".parse().unwrap());
    }

    #[test]
    fn required_vendor_missing_fails_by_default() {
        let tenant = tenant_config(vec![vendor_config("A", true)]);
        let inputs = HashMap::new();
        let err = normalize_vendors(&tenant, &inputs, &no_sku_maps()).unwrap_err();
        assert_eq!(err.code(), "REQUIRED_VENDOR_MISSING");
    }

    #[test]
    fn required_vendor_missing_warns_under_warn_only_policy() {
        let mut tenant = tenant_config(vec![vendor_config("A", true), vendor_config("B", true)]);
        tenant.error_policy.missing_required_vendor_policy = "warn_only".to_string();
        let mut inputs = HashMap::new();
        inputs.insert(
            "B".to_string(),
            b"sku,quantity_available,cost\nSKU1,5,12.00\n".to_vec(),
        );
        let normalized = normalize_vendors(&tenant, &inputs, &no_sku_maps()).unwrap();
        assert_eq!(normalized.warnings.len(), 1);
        assert_eq!(normalized.missing_vendors.len(), 1);
        assert!(normalized.missing_vendors[0].required);
        assert_eq!(normalized.records.len(), 1);
    }

    #[test]
    fn optional_vendor_missing_is_recorded_not_silent() {
        let tenant = tenant_config(vec![vendor_config("A", true), vendor_config("B", false)]);
        let mut inputs = HashMap::new();
        inputs.insert(
            "A".to_string(),
            b"sku,quantity_available,cost\nSKU1,5,12.00\n".to_vec(),
        );
        let normalized = normalize_vendors(&tenant, &inputs, &no_sku_maps()).unwrap();
        assert_eq!(normalized.missing_vendors.len(), 1);
        assert_eq!(normalized.missing_vendors[0].vendor_id, "B");
        assert!(!normalized.missing_vendors[0].required);
        assert_eq!(normalized.warnings.len(), 1);
    }

    #[test]
    fn no_rows_parsed_is_an_error() {
        let tenant = tenant_config(vec![vendor_config("A", false)]);
        let normalized = normalize_vendors(&tenant, &HashMap::new(), &no_sku_maps()).unwrap();
        let err = check_error_thresholds(&tenant, normalized.invalid_row_count, normalized.valid_row_count).unwrap_err();
        assert_eq!(err.code(), "no_rows_parsed");
    }

    #[test]
    fn decode_error_surfaces_vendor_and_encoding() {
        let tenant = tenant_config(vec![vendor_config("A", true)]);
        let mut inputs = HashMap::new();
        inputs.insert("A".to_string(), vec![0xff, 0xfe]);
        let err = normalize_vendors(&tenant, &inputs, &no_sku_maps()).unwrap_err();
        assert_eq!(err.code(), "DECODE_ERROR");
    }

    #[test]
    fn sku_map_remaps_vendor_skus() {
        let mut vendor = vendor_config("A", true);
        vendor.sku_map = Some(riv_schemas::SkuMapConfig {
            kind: "s3".to_string(),
            s3_key: Some("skumap.csv".to_string()),
            local_path: None,
        });
        let tenant = tenant_config(vec![vendor]);
        let mut inputs = HashMap::new();
        inputs.insert(
            "A".to_string(),
            b"sku,quantity_available,cost\nOLD1,5,12.00\n".to_vec(),
        );
        let mut sku_maps = HashMap::new();
        sku_maps.insert("A".to_string(), "from_sku,to_sku\nOLD1,NEW1\n".to_string());
        let normalized = normalize_vendors(&tenant, &inputs, &sku_maps).unwrap();
        assert_eq!(normalized.records[0].sku, "NEW1");
    }

    #[test]
    fn missing_sku_map_is_a_parse_error_not_an_abort() {
        let mut vendor = vendor_config("A", true);
        vendor.sku_map = Some(riv_schemas::SkuMapConfig {
            kind: "s3".to_string(),
            s3_key: Some("skumap.csv".to_string()),
            local_path: None,
        });
        let tenant = tenant_config(vec![vendor]);
        let mut inputs = HashMap::new();
        inputs.insert(
            "A".to_string(),
            b"sku,quantity_available,cost\nOLD1,5,12.00\n".to_vec(),
        );
        let normalized = normalize_vendors(&tenant, &inputs, &no_sku_maps()).unwrap();
        assert_eq!(normalized.invalid_row_count, 1);
        assert_eq!(normalized.vendor_results[0].errors[0].reason, "missing sku map for vendor A");
    }
}
