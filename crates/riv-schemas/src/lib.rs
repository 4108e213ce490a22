use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Exact column order the canonical CSV codec writes and reads.
pub const CANONICAL_COLUMNS: [&str; 13] = [
    "sku",
    "vendor_sku",
    "vendor_id",
    "quantity_available",
    "lead_time_days",
    "cost",
    "map_price",
    "price",
    "msrp",
    "condition",
    "brand",
    "title",
    "updated_at",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    New,
    Used,
    Refurb,
}

impl Condition {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw.trim().to_lowercase().as_str() {
            "new" => Ok(Condition::New),
            "used" => Ok(Condition::Used),
            "refurb" => Ok(Condition::Refurb),
            other => Err(ValidationError::InvalidCondition(other.to_string())),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Condition::New => "new",
            Condition::Used => "used",
            Condition::Refurb => "refurb",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyField(&'static str),
    NegativeQuantity(i64),
    InvalidCondition(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyField(name) => write!(f, "{name} must not be empty"),
            ValidationError::NegativeQuantity(q) => {
                write!(f, "quantity_available must be >= 0, got {q}")
            }
            ValidationError::InvalidCondition(c) => {
                write!(f, "condition must be one of new/used/refurb, got {c:?}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Canonical inventory record. Field order here matches `CANONICAL_COLUMNS`
/// only by convention; the codec is what enforces it on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub sku: String,
    pub vendor_sku: String,
    pub vendor_id: String,
    pub quantity_available: i64,
    pub lead_time_days: Option<i64>,
    pub cost: Option<Decimal>,
    pub map_price: Option<Decimal>,
    /// Non-nullable per spec: defaults to zero when no price column value
    /// is supplied.
    pub price: Decimal,
    pub msrp: Option<Decimal>,
    pub condition: Condition,
    pub brand: Option<String>,
    pub title: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl InventoryRecord {
    /// Validates and normalizes the identity fields the same way the
    /// canonical model does: sku/vendor_id trimmed and non-empty,
    /// quantity_available non-negative, condition lowercased.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sku: impl Into<String>,
        vendor_sku: impl Into<String>,
        vendor_id: impl Into<String>,
        quantity_available: i64,
        lead_time_days: Option<i64>,
        cost: Option<Decimal>,
        map_price: Option<Decimal>,
        price: Option<Decimal>,
        msrp: Option<Decimal>,
        condition: &str,
        brand: Option<String>,
        title: Option<String>,
        updated_at: Option<DateTime<Utc>>,
    ) -> Result<Self, ValidationError> {
        let sku = sku.into().trim().to_string();
        if sku.is_empty() {
            return Err(ValidationError::EmptyField("sku"));
        }
        let vendor_id = vendor_id.into().trim().to_string();
        if vendor_id.is_empty() {
            return Err(ValidationError::EmptyField("vendor_id"));
        }
        if quantity_available < 0 {
            return Err(ValidationError::NegativeQuantity(quantity_available));
        }
        let condition = Condition::parse(condition)?;
        Ok(InventoryRecord {
            sku,
            vendor_sku: vendor_sku.into(),
            vendor_id,
            quantity_available,
            lead_time_days,
            cost,
            map_price,
            price: price.unwrap_or(Decimal::ZERO),
            msrp,
            condition,
            brand,
            title,
            updated_at,
        })
    }

    pub fn in_stock(&self) -> bool {
        self.quantity_available > 0
    }
}

// ---------------------------------------------------------------------
// Tenant configuration
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub s3_prefix: String,
}

fn default_delimiter() -> char {
    ','
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    pub format: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default)]
    pub column_map: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkuMapConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub s3_key: Option<String>,
    pub local_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorConfig {
    pub vendor_id: String,
    pub inbound: InboundConfig,
    pub parser: ParserConfig,
    #[serde(default)]
    pub sku_map: Option<SkuMapConfig>,
    #[serde(default)]
    pub required: bool,
}

fn default_map_floor_behavior() -> String {
    "max(price, map_price)".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapPolicyConfig {
    #[serde(default = "default_true")]
    pub enforce: bool,
    #[serde(default = "default_map_floor_behavior")]
    pub map_floor_behavior: String,
}

impl Default for MapPolicyConfig {
    fn default() -> Self {
        MapPolicyConfig {
            enforce: true,
            map_floor_behavior: default_map_floor_behavior(),
        }
    }
}

fn default_rounding_mode() -> String {
    "nearest".to_string()
}

fn default_rounding_increment() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundingConfig {
    #[serde(default = "default_rounding_mode")]
    pub mode: String,
    #[serde(default = "default_rounding_increment")]
    pub increment: Decimal,
}

impl Default for RoundingConfig {
    fn default() -> Self {
        RoundingConfig {
            mode: default_rounding_mode(),
            increment: default_rounding_increment(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    pub base_margin_pct: Decimal,
    #[serde(default)]
    pub min_price: Option<Decimal>,
    #[serde(default)]
    pub shipping_handling_flat: Decimal,
    #[serde(default)]
    pub map_policy: MapPolicyConfig,
    #[serde(default)]
    pub rounding: RoundingConfig,
}

fn default_include_shipping_handling() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestOfferLandedCost {
    #[serde(default = "default_include_shipping_handling")]
    pub include_shipping_handling: bool,
}

impl Default for BestOfferLandedCost {
    fn default() -> Self {
        BestOfferLandedCost {
            include_shipping_handling: true,
        }
    }
}

fn default_fallback_lead_time_days() -> i64 {
    7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestOfferConfig {
    #[serde(default)]
    pub sort_by: Vec<String>,
    #[serde(default)]
    pub landed_cost: BestOfferLandedCost,
    #[serde(default = "default_fallback_lead_time_days")]
    pub fallback_lead_time_days: i64,
}

impl Default for BestOfferConfig {
    fn default() -> Self {
        BestOfferConfig {
            sort_by: Vec::new(),
            landed_cost: BestOfferLandedCost::default(),
            fallback_lead_time_days: default_fallback_lead_time_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    pub strategy: String,
    #[serde(default)]
    pub best_offer: BestOfferConfig,
}

fn default_output_format() -> String {
    "csv".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_format")]
    pub format: String,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

fn default_missing_required_vendor_policy() -> String {
    "fail".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPolicyConfig {
    #[serde(default)]
    pub max_invalid_rows: Option<i64>,
    #[serde(default)]
    pub max_invalid_row_pct: Option<f64>,
    #[serde(default = "default_true")]
    pub fail_on_missing_required_columns: bool,
    #[serde(default = "default_missing_required_vendor_policy")]
    pub missing_required_vendor_policy: String,
}

impl Default for ErrorPolicyConfig {
    fn default() -> Self {
        ErrorPolicyConfig {
            max_invalid_rows: None,
            max_invalid_row_pct: None,
            fail_on_missing_required_columns: true,
            missing_required_vendor_policy: default_missing_required_vendor_policy(),
        }
    }
}

fn default_schema_version() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: i32,
    pub tenant_id: String,
    pub timezone: String,
    pub default_currency: String,
    pub vendors: Vec<VendorConfig>,
    pub pricing: PricingConfig,
    pub merge: MergeConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub error_policy: ErrorPolicyConfig,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            format: default_output_format(),
            columns: None,
        }
    }
}

// ---------------------------------------------------------------------
// Run lifecycle
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStage {
    Queue,
    FetchInputs,
    Normalize,
    MergePrice,
    WriteOutputs,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub tenant_id: String,
    pub config_version: i64,
    pub status: RunStatus,
    pub stage: RunStage,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failed_stage: Option<RunStage>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub errors_artifact_key: Option<String>,
    pub error_report_key: Option<String>,
    pub artifacts: Vec<String>,
}

impl RunRecord {
    pub fn new(run_id: Uuid, tenant_id: impl Into<String>, config_version: i64) -> Self {
        RunRecord {
            run_id,
            tenant_id: tenant_id.into(),
            config_version,
            status: RunStatus::Queued,
            stage: RunStage::Queue,
            requested_at: Utc::now(),
            started_at: None,
            finished_at: None,
            failed_stage: None,
            error_code: None,
            error_message: None,
            errors_artifact_key: None,
            error_report_key: None,
            artifacts: Vec::new(),
        }
    }

    /// Run-scoped prefix every artifact key produced for this run must
    /// begin with.
    pub fn run_prefix(&self) -> String {
        format!("{}/tenants/{}/", self.run_id, self.tenant_id)
    }

    /// Advances `stage`, clamping to the current value if the caller tries
    /// to move backwards (stage is monotonic non-decreasing).
    pub fn advance_stage(&mut self, stage: RunStage) {
        if stage > self.stage {
            self.stage = stage;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunJob {
    pub run_id: Uuid,
    pub tenant_id: String,
    pub vendors: Vec<String>,
    pub config_version: i64,
    #[serde(default = "default_run_type")]
    pub run_type: String,
}

fn default_run_type() -> String {
    "inventory_sync".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_parse_normalizes_case() {
        assert_eq!(Condition::parse("NEW").unwrap(), Condition::New);
        assert_eq!(Condition::parse(" used ").unwrap(), Condition::Used);
        assert!(Condition::parse("broken").is_err());
    }

    #[test]
    fn inventory_record_rejects_negative_quantity() {
        let err = InventoryRecord::new(
            "sku-1", "v-sku-1", "vendor-a", -1, None, None, None, None, None, "new", None, None,
            None,
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::NegativeQuantity(-1));
    }

    #[test]
    fn stage_advance_is_monotonic() {
        let mut rec = RunRecord::new(Uuid::nil(), "tenant-a", 1);
        rec.advance_stage(RunStage::MergePrice);
        rec.advance_stage(RunStage::FetchInputs);
        assert_eq!(rec.stage, RunStage::MergePrice);
        rec.advance_stage(RunStage::Complete);
        assert_eq!(rec.stage, RunStage::Complete);
    }

    #[test]
    fn run_prefix_is_run_scoped() {
        let run_id = Uuid::nil();
        let rec = RunRecord::new(run_id, "tenant-a", 1);
        assert_eq!(rec.run_prefix(), format!("{run_id}/tenants/tenant-a/"));
    }
}
