use riv_schemas::{BestOfferConfig, InventoryRecord};
use rust_decimal::Decimal;

fn landed_cost(record: &InventoryRecord, include_shipping_handling: bool, shipping_handling_flat: Decimal) -> Decimal {
    match record.cost {
        Some(cost) if include_shipping_handling => cost + shipping_handling_flat,
        Some(cost) => cost,
        None => Decimal::ZERO,
    }
}

/// Groups records by sku (preserving first-seen group order, the same way
/// a Python dict does when used as a grouping accumulator), then within
/// each group stably sorts by `(in_stock desc, landed_cost asc)` and keeps
/// the first. The winning record's `lead_time_days` is backfilled from
/// `fallback_lead_time_days` when absent.
pub fn merge_best_offer(
    records: &[InventoryRecord],
    config: &BestOfferConfig,
    shipping_handling_flat: Decimal,
) -> Vec<InventoryRecord> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: Vec<(String, Vec<InventoryRecord>)> = Vec::new();

    for record in records {
        match order.iter().position(|s| s == &record.sku) {
            Some(idx) => groups[idx].1.push(record.clone()),
            None => {
                order.push(record.sku.clone());
                groups.push((record.sku.clone(), vec![record.clone()]));
            }
        }
    }

    let mut winners = Vec::with_capacity(groups.len());
    for (_, mut group) in groups {
        group.sort_by(|a, b| {
            let stock_cmp = b.in_stock().cmp(&a.in_stock());
            if stock_cmp != std::cmp::Ordering::Equal {
                return stock_cmp;
            }
            let la = landed_cost(a, config.landed_cost.include_shipping_handling, shipping_handling_flat);
            let lb = landed_cost(b, config.landed_cost.include_shipping_handling, shipping_handling_flat);
            la.cmp(&lb)
        });
        let mut winner = group.into_iter().next().expect("group is never empty");
        if winner.lead_time_days.is_none() {
            winner.lead_time_days = Some(config.fallback_lead_time_days);
        }
        winners.push(winner);
    }
    winners
}
