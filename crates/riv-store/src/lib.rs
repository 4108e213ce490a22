use async_trait::async_trait;
use chrono::{DateTime, Utc};
use riv_schemas::{RunRecord, RunStage, TenantConfig};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BlobLocation {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: i64,
    pub etag: Option<String>,
}

/// Object-store boundary. Every key used by this workspace is run-scoped
/// (`{run_id}/tenants/{tenant_id}/...`); the store itself is agnostic to
/// that convention.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Finds the most recently modified object under `prefix`. Ties on
    /// `last_modified` are broken by the lexicographically largest key.
    async fn list_latest(&self, prefix: &str) -> anyhow::Result<Option<BlobLocation>>;
    async fn download_bytes(&self, key: &str) -> anyhow::Result<Vec<u8>>;
    async fn download_text(&self, key: &str) -> anyhow::Result<String> {
        let bytes = self.download_bytes(key).await?;
        Ok(String::from_utf8(bytes)?)
    }
    async fn upload_bytes(&self, key: &str, bytes: Vec<u8>) -> anyhow::Result<()>;
    async fn upload_text(&self, key: &str, text: String) -> anyhow::Result<()> {
        self.upload_bytes(key, text.into_bytes()).await
    }
    /// Not used by any internal pipeline stage today -- carried for
    /// external consumers (e.g. a future control-plane download link).
    async fn presign(&self, key: &str, expires_in_secs: u64) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub receipt_handle: String,
    pub body: String,
    pub receive_count: u32,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn send(&self, body: String) -> anyhow::Result<()>;
    async fn receive(&self) -> anyhow::Result<Option<QueueMessage>>;
    async fn delete(&self, receipt_handle: &str) -> anyhow::Result<()>;
    async fn change_visibility(&self, receipt_handle: &str, visibility_timeout_secs: u64) -> anyhow::Result<()>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert(&self, run: &RunRecord) -> anyhow::Result<()>;
    async fn get(&self, run_id: Uuid) -> anyhow::Result<Option<RunRecord>>;
    /// Replaces the stored record, except `stage` is clamped to never
    /// regress relative to the previously stored value.
    async fn update(&self, run: &RunRecord) -> anyhow::Result<()>;
    /// Best-effort, non-linearizable: returns a currently RUNNING run for
    /// `tenant_id` other than `exclude_run_id`, if one exists.
    async fn find_running_by_tenant(
        &self,
        tenant_id: &str,
        exclude_run_id: Uuid,
    ) -> anyhow::Result<Option<RunRecord>>;
}

#[derive(Debug, Clone)]
pub struct TenantConfigRecord {
    pub tenant_id: String,
    pub config_version: i64,
    pub config: TenantConfig,
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn put(&self, record: &TenantConfigRecord) -> anyhow::Result<()>;
    async fn get(&self, tenant_id: &str, config_version: i64) -> anyhow::Result<Option<TenantConfigRecord>>;
    async fn get_latest(&self, tenant_id: &str) -> anyhow::Result<Option<TenantConfigRecord>>;
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record_run_failure(&self, tenant_id: &str, failed_stage: Option<RunStage>);
    async fn record_worker_error(&self, error_type: &str);
}
