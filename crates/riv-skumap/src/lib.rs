use std::collections::HashMap;
use std::fmt;

use riv_schemas::InventoryRecord;

#[derive(Debug, Clone, Default)]
pub struct SkuMap {
    mapping: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkuMapError(pub String);

impl fmt::Display for SkuMapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid sku map: {}", self.0)
    }
}

impl std::error::Error for SkuMapError {}

impl SkuMap {
    pub fn from_text(text: &str) -> Result<Self, SkuMapError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(text.as_bytes());
        let headers = reader
            .headers()
            .map_err(|e| SkuMapError(e.to_string()))?
            .clone();
        let from_idx = headers
            .iter()
            .position(|h| h == "from_sku")
            .ok_or_else(|| SkuMapError("missing from_sku column".to_string()))?;
        let to_idx = headers
            .iter()
            .position(|h| h == "to_sku")
            .ok_or_else(|| SkuMapError("missing to_sku column".to_string()))?;

        let mut mapping = HashMap::new();
        for result in reader.records() {
            let record = result.map_err(|e| SkuMapError(e.to_string()))?;
            let from = record.get(from_idx).unwrap_or("").trim();
            let to = record.get(to_idx).unwrap_or("").trim();
            if from.is_empty() || to.is_empty() {
                continue;
            }
            mapping.insert(from.to_string(), to.to_string());
        }
        Ok(SkuMap { mapping })
    }

    /// Rewrites `record.sku` in place where the current sku has an entry
    /// in the map. `vendor_sku` is left untouched -- it's the vendor's own
    /// identifier, not something this tenant-level remap owns.
    pub fn apply(&self, records: &mut [InventoryRecord]) {
        for record in records.iter_mut() {
            if let Some(mapped) = self.mapping.get(&record.sku) {
                record.sku = mapped.clone();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaps_matching_skus() {
        let map = SkuMap::from_text("from_sku,to_sku\nOLD1,NEW1\n").unwrap();
        let mut records = vec![InventoryRecord::new(
            "OLD1", "vsku", "vendor-a", 1, None, None, None, None, None, "new", None, None, None,
        )
        .unwrap()];
        map.apply(&mut records);
        assert_eq!(records[0].sku, "NEW1");
    }

    #[test]
    fn leaves_unmapped_skus_untouched() {
        let map = SkuMap::from_text("from_sku,to_sku\nOLD1,NEW1\n").unwrap();
        let mut records = vec![InventoryRecord::new(
            "OTHER", "vsku", "vendor-a", 1, None, None, None, None, None, "new", None, None, None,
        )
        .unwrap()];
        map.apply(&mut records);
        assert_eq!(records[0].sku, "OTHER");
    }
}
