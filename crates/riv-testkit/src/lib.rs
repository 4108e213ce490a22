use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use riv_schemas::{RunRecord, RunStage, TenantConfig};
use riv_store::{BlobLocation, BlobStore, JobQueue, MetricsSink, QueueMessage, RunStore, TenantConfigRecord, TenantStore};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: Mutex<HashMap<String, (Vec<u8>, chrono::DateTime<chrono::Utc>)>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn list_latest(&self, prefix: &str) -> anyhow::Result<Option<BlobLocation>> {
        let objects = self.objects.lock().await;
        let best = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .max_by(|(key_a, (_, ts_a)), (key_b, (_, ts_b))| ts_a.cmp(ts_b).then_with(|| key_a.cmp(key_b)));
        Ok(best.map(|(key, (bytes, ts))| {
            let mut hasher = DefaultHasher::new();
            bytes.hash(&mut hasher);
            BlobLocation {
                key: key.clone(),
                last_modified: *ts,
                size: bytes.len() as i64,
                etag: Some(format!("{:x}", hasher.finish())),
            }
        }))
    }

    async fn download_bytes(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        let objects = self.objects.lock().await;
        objects
            .get(key)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| anyhow::anyhow!("no such key: {key}"))
    }

    async fn upload_bytes(&self, key: &str, bytes: Vec<u8>) -> anyhow::Result<()> {
        let mut objects = self.objects.lock().await;
        objects.insert(key.to_string(), (bytes, chrono::Utc::now()));
        Ok(())
    }

    async fn presign(&self, key: &str, expires_in_secs: u64) -> anyhow::Result<String> {
        Ok(format!("https://example.invalid/{key}?expires_in={expires_in_secs}"))
    }
}

struct QueueEntry {
    body: String,
    receive_count: u32,
}

#[derive(Default)]
pub struct InMemoryJobQueue {
    available: Mutex<VecDeque<QueueEntry>>,
    in_flight: Mutex<HashMap<String, QueueEntry>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn send(&self, body: String) -> anyhow::Result<()> {
        self.available.lock().await.push_back(QueueEntry { body, receive_count: 0 });
        Ok(())
    }

    async fn receive(&self) -> anyhow::Result<Option<QueueMessage>> {
        let mut available = self.available.lock().await;
        let Some(mut entry) = available.pop_front() else {
            return Ok(None);
        };
        entry.receive_count += 1;
        let receipt_handle = Uuid::new_v4().to_string();
        let message = QueueMessage {
            receipt_handle: receipt_handle.clone(),
            body: entry.body.clone(),
            receive_count: entry.receive_count,
        };
        self.in_flight.lock().await.insert(receipt_handle, entry);
        Ok(Some(message))
    }

    async fn delete(&self, receipt_handle: &str) -> anyhow::Result<()> {
        self.in_flight.lock().await.remove(receipt_handle);
        Ok(())
    }

    async fn change_visibility(&self, receipt_handle: &str, _visibility_timeout_secs: u64) -> anyhow::Result<()> {
        // No real clock in the testkit: changing visibility just returns
        // the message to the queue immediately, ready for redelivery on
        // the next `receive`.
        let mut in_flight = self.in_flight.lock().await;
        if let Some(entry) = in_flight.remove(receipt_handle) {
            self.available.lock().await.push_back(entry);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRunStore {
    runs: Mutex<HashMap<Uuid, RunRecord>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn insert(&self, run: &RunRecord) -> anyhow::Result<()> {
        self.runs.lock().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> anyhow::Result<Option<RunRecord>> {
        Ok(self.runs.lock().await.get(&run_id).cloned())
    }

    async fn update(&self, run: &RunRecord) -> anyhow::Result<()> {
        let mut runs = self.runs.lock().await;
        let mut next = run.clone();
        if let Some(existing) = runs.get(&run.run_id) {
            if existing.stage > next.stage {
                next.stage = existing.stage;
            }
        }
        runs.insert(next.run_id, next);
        Ok(())
    }

    async fn find_running_by_tenant(
        &self,
        tenant_id: &str,
        exclude_run_id: Uuid,
    ) -> anyhow::Result<Option<RunRecord>> {
        let runs = self.runs.lock().await;
        Ok(runs
            .values()
            .find(|r| {
                r.tenant_id == tenant_id
                    && r.run_id != exclude_run_id
                    && r.status == riv_schemas::RunStatus::Running
            })
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryTenantStore {
    configs: Mutex<HashMap<(String, i64), TenantConfig>>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn put(&self, record: &TenantConfigRecord) -> anyhow::Result<()> {
        self.configs.lock().await.insert(
            (record.tenant_id.clone(), record.config_version),
            record.config.clone(),
        );
        Ok(())
    }

    async fn get(&self, tenant_id: &str, config_version: i64) -> anyhow::Result<Option<TenantConfigRecord>> {
        let configs = self.configs.lock().await;
        Ok(configs
            .get(&(tenant_id.to_string(), config_version))
            .cloned()
            .map(|config| TenantConfigRecord {
                tenant_id: tenant_id.to_string(),
                config_version,
                config,
            }))
    }

    async fn get_latest(&self, tenant_id: &str) -> anyhow::Result<Option<TenantConfigRecord>> {
        let configs = self.configs.lock().await;
        let latest = configs
            .iter()
            .filter(|((tid, _), _)| tid == tenant_id)
            .max_by_key(|((_, version), _)| *version);
        Ok(latest.map(|((tid, version), config)| TenantConfigRecord {
            tenant_id: tid.clone(),
            config_version: *version,
            config: config.clone(),
        }))
    }
}

#[derive(Default)]
pub struct InMemoryMetricsSink {
    pub run_failures: Mutex<Vec<(String, Option<RunStage>)>>,
    pub worker_errors: Mutex<Vec<String>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsSink {
    async fn record_run_failure(&self, tenant_id: &str, failed_stage: Option<RunStage>) {
        self.run_failures.lock().await.push((tenant_id.to_string(), failed_stage));
    }

    async fn record_worker_error(&self, error_type: &str) {
        self.worker_errors.lock().await.push(error_type.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blob_store_round_trips() {
        let store = InMemoryBlobStore::new();
        store.upload_text("run-1/tenants/t/a.txt", "hello".to_string()).await.unwrap();
        let text = store.download_text("run-1/tenants/t/a.txt").await.unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn queue_redelivery_increments_receive_count() {
        let queue = InMemoryJobQueue::new();
        queue.send("body".to_string()).await.unwrap();
        let first = queue.receive().await.unwrap().unwrap();
        assert_eq!(first.receive_count, 1);
        queue.change_visibility(&first.receipt_handle, 0).await.unwrap();
        let second = queue.receive().await.unwrap().unwrap();
        assert_eq!(second.receive_count, 2);
    }

    #[tokio::test]
    async fn run_store_update_clamps_stage() {
        let store = InMemoryRunStore::new();
        let mut run = RunRecord::new(Uuid::new_v4(), "tenant-a", 1);
        run.advance_stage(riv_schemas::RunStage::MergePrice);
        store.insert(&run).await.unwrap();

        let mut regressed = run.clone();
        regressed.stage = riv_schemas::RunStage::FetchInputs;
        store.update(&regressed).await.unwrap();

        let fetched = store.get(run.run_id).await.unwrap().unwrap();
        assert_eq!(fetched.stage, riv_schemas::RunStage::MergePrice);
    }
}
