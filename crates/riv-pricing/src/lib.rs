use riv_schemas::{InventoryRecord, PricingConfig};
use rust_decimal::{Decimal, RoundingStrategy};

/// Rounds `value` to the nearest multiple of `increment`, ties rounding
/// away from zero (`ROUND_HALF_UP`), matching `(value / increment)
/// .quantize(1, ROUND_HALF_UP) * increment`.
fn round_price(value: Decimal, increment: Decimal) -> Decimal {
    if increment.is_zero() {
        return value;
    }
    let units = (value / increment).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    units * increment
}

/// Computes the sell price for one cost value: landed cost, margin,
/// min-price clamp, rounding, then MAP floor applied *after* rounding.
pub fn compute_price(cost: Decimal, map_price: Option<Decimal>, rules: &PricingConfig) -> Decimal {
    let landed = cost + rules.shipping_handling_flat;
    let mut candidate = landed * (Decimal::ONE + rules.base_margin_pct);
    if let Some(min_price) = rules.min_price {
        if candidate < min_price {
            candidate = min_price;
        }
    }
    let mut rounded = round_price(candidate, rules.rounding.increment);
    if rules.map_policy.enforce {
        if let Some(map_price) = map_price {
            if rounded < map_price {
                rounded = map_price;
            }
        }
    }
    rounded
}

/// Applies `compute_price` to every record that has a cost. Records with
/// no cost are left at `price = 0` -- there's nothing to price off of.
pub fn apply_pricing(records: &mut [InventoryRecord], rules: &PricingConfig) {
    for record in records.iter_mut() {
        if let Some(cost) = record.cost {
            record.price = compute_price(cost, record.map_price, rules);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riv_schemas::{MapPolicyConfig, RoundingConfig};

    fn rules(margin: &str, min_price: Option<&str>, shipping: &str, map_enforce: bool) -> PricingConfig {
        PricingConfig {
            base_margin_pct: margin.parse().unwrap(),
            min_price: min_price.map(|s| s.parse().unwrap()),
            shipping_handling_flat: shipping.parse().unwrap(),
            map_policy: MapPolicyConfig {
                enforce: map_enforce,
                map_floor_behavior: "max(price, map_price)".to_string(),
            },
            rounding: RoundingConfig {
                mode: "nearest".to_string(),
                increment: "0.01".parse().unwrap(),
            },
        }
    }

    #[test]
    fn happy_merge_pricing_example() {
        // vendor B selected: cost=12, shipping=1 -> landed=13, margin 0.2 -> 15.60
        let r = rules("0.2", None, "1.00", true);
        let price = compute_price("12".parse().unwrap(), None, &r);
        assert_eq!(price, "15.60".parse::<Decimal>().unwrap());
    }

    #[test]
    fn map_floor_applies_after_rounding() {
        // cost=20 map_price=40 margin=0.1 min_price=10 -> candidate 22.00, MAP raises to 40.00
        let r = rules("0.1", Some("10"), "0.00", true);
        let price = compute_price("20".parse().unwrap(), Some("40".parse().unwrap()), &r);
        assert_eq!(price, "40.00".parse::<Decimal>().unwrap());
    }

    #[test]
    fn map_floor_skipped_when_not_enforced() {
        let r = rules("0.1", Some("10"), "0.00", false);
        let price = compute_price("20".parse().unwrap(), Some("40".parse().unwrap()), &r);
        assert_eq!(price, "22.00".parse::<Decimal>().unwrap());
    }

    #[test]
    fn rounding_is_half_up_not_bankers() {
        // 1.005 rounded to nearest 0.01 should go to 1.01, not 1.00
        let rounded = round_price("1.005".parse().unwrap(), "0.01".parse().unwrap());
        assert_eq!(rounded, "1.01".parse::<Decimal>().unwrap());
    }

    #[test]
    fn records_without_cost_default_price_to_zero() {
        let mut records = vec![InventoryRecord::new(
            "SKU1", "SKU1", "vendor-a", 1, None, None, None, None, None, "new", None, None, None,
        )
        .unwrap()];
        apply_pricing(&mut records, &rules("0.1", None, "0.00", true));
        assert_eq!(records[0].price, Decimal::ZERO);
    }
}
