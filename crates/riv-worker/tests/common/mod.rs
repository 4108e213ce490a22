use std::sync::Arc;

use riv_config::WorkerSettings;
use riv_schemas::{
    BestOfferConfig, ErrorPolicyConfig, InboundConfig, MapPolicyConfig, MergeConfig,
    OutputConfig, ParserConfig, PricingConfig, RoundingConfig, TenantConfig, VendorConfig,
};
use riv_testkit::{InMemoryBlobStore, InMemoryJobQueue, InMemoryMetricsSink, InMemoryRunStore, InMemoryTenantStore};
use riv_worker::Worker;

pub fn test_tenant(vendor_ids: &[&str]) -> TenantConfig {
    TenantConfig {
        schema_version: 1,
        tenant_id: "tenant-a".to_string(),
        timezone: "UTC".to_string(),
        default_currency: "USD".to_string(),
        vendors: vendor_ids
            .iter()
            .map(|id| VendorConfig {
                vendor_id: id.to_string(),
                inbound: InboundConfig {
                    kind: "s3".to_string(),
                    s3_prefix: format!("inbound/{id}/"),
                },
                parser: ParserConfig {
                    format: "csv".to_string(),
                    delimiter: ',',
                    encoding: "utf-8".to_string(),
                    column_map: None,
                },
                sku_map: None,
                required: true,
            })
            .collect(),
        pricing: PricingConfig {
            base_margin_pct: "0.2".parse().unwrap(),
            min_price: None,
            shipping_handling_flat: "1.00".parse().unwrap(),
            map_policy: MapPolicyConfig { enforce: true, map_floor_behavior: "max(price, map_price)".to_string() },
            rounding: RoundingConfig { mode: "nearest".to_string(), increment: "0.01".parse().unwrap() },
        },
        merge: MergeConfig { strategy: "best_offer".to_string(), best_offer: BestOfferConfig::default() },
        output: OutputConfig::default(),
        error_policy: ErrorPolicyConfig::default(),
    }
}

type TestWorker = Worker<InMemoryBlobStore, InMemoryJobQueue, InMemoryRunStore, InMemoryTenantStore, InMemoryMetricsSink>;

pub fn test_worker() -> (
    Arc<TestWorker>,
    Arc<InMemoryBlobStore>,
    Arc<InMemoryJobQueue>,
    Arc<InMemoryRunStore>,
    Arc<InMemoryTenantStore>,
    Arc<InMemoryMetricsSink>,
) {
    let blob = Arc::new(InMemoryBlobStore::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    let runs = Arc::new(InMemoryRunStore::new());
    let tenants = Arc::new(InMemoryTenantStore::new());
    let metrics = Arc::new(InMemoryMetricsSink::new());
    let settings = WorkerSettings {
        concurrency: 1,
        visibility_timeout: std::time::Duration::from_secs(300),
        visibility_heartbeat: std::time::Duration::from_secs(3600),
        tenant_backoff: std::time::Duration::from_secs(30),
        poison_max_receives: 5,
        database_url: None,
        s3_bucket: None,
        sqs_queue_url: None,
        cloudwatch_metrics_enabled: false,
        cloudwatch_metrics_namespace: "Test".to_string(),
    };
    let worker = Arc::new(Worker::new(blob.clone(), queue.clone(), runs.clone(), tenants.clone(), metrics.clone(), settings));
    (worker, blob, queue, runs, tenants, metrics)
}
