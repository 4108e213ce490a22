mod artifacts;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use riv_config::WorkerSettings;
use riv_engine::{check_error_thresholds, merge_and_price, normalize_vendors, EngineError};
use riv_schemas::{RunJob, RunRecord, RunStage, RunStatus};
use riv_store::{BlobStore, JobQueue, MetricsSink, QueueMessage, RunStore, TenantStore};
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info, warn};

const SUPPORTED_SCHEMA_VERSIONS: [i32; 1] = [1];

#[derive(Debug)]
pub enum JobError {
    Retryable(anyhow::Error),
    NonRetryable { code: String, message: String },
}

impl JobError {
    fn non_retryable(code: &str, message: impl Into<String>) -> Self {
        JobError::NonRetryable {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::Retryable(e) => write!(f, "retryable error: {e}"),
            JobError::NonRetryable { code, message } => write!(f, "{code}: {message}"),
        }
    }
}

impl From<anyhow::Error> for JobError {
    fn from(e: anyhow::Error) -> Self {
        JobError::Retryable(e)
    }
}

impl From<EngineError> for JobError {
    fn from(e: EngineError) -> Self {
        JobError::NonRetryable {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// What `process_message` decided to do with the underlying queue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    FailedNonRetryable,
    FailedRetryableNotDeleted,
    PoisonNotDeleted,
    TenantLockedNotDeleted,
    /// The run was already RUNNING or SUCCEEDED when this delivery arrived
    /// -- deleted without re-executing.
    DuplicateDeliverySkipped,
}

pub struct Worker<B, Q, R, T, M> {
    blob: Arc<B>,
    queue: Arc<Q>,
    runs: Arc<R>,
    tenants: Arc<T>,
    metrics: Arc<M>,
    settings: WorkerSettings,
}

impl<B, Q, R, T, M> Worker<B, Q, R, T, M>
where
    B: BlobStore + 'static,
    Q: JobQueue + 'static,
    R: RunStore + 'static,
    T: TenantStore + 'static,
    M: MetricsSink + 'static,
{
    pub fn new(blob: Arc<B>, queue: Arc<Q>, runs: Arc<R>, tenants: Arc<T>, metrics: Arc<M>, settings: WorkerSettings) -> Self {
        Worker { blob, queue, runs, tenants, metrics, settings }
    }

    /// Polls the queue forever, running up to `settings.concurrency` jobs
    /// concurrently.
    pub async fn run_forever(self: Arc<Self>) -> ! {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.settings.concurrency.max(1)));
        loop {
            match self.queue.receive().await {
                Ok(Some(message)) => {
                    let worker = Arc::clone(&self);
                    let permit = Arc::clone(&semaphore).acquire_owned().await.expect("semaphore not closed");
                    tokio::spawn(async move {
                        let _permit = permit;
                        worker.process_message(message).await;
                    });
                }
                Ok(None) => {
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
                Err(e) => {
                    error!(event = "queue_receive_failed", error = %e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Runs one queue message end to end, including the delete/no-delete
    /// decision. Exposed separately from `run_forever` so it's directly
    /// testable.
    pub async fn process_message(&self, message: QueueMessage) -> JobOutcome {
        let job: RunJob = match serde_json::from_str(&message.body) {
            Ok(job) => job,
            Err(e) => {
                error!(event = "malformed_job_body", error = %e);
                // Can't even identify the run; treat as a deterministic
                // fault so a broken message doesn't loop forever.
                let _ = self.queue.delete(&message.receipt_handle).await;
                return JobOutcome::FailedNonRetryable;
            }
        };

        // Claim check: decide what to do with a run we've already recorded
        // something about, before touching the blob store or tenant config.
        if let Ok(Some(existing)) = self.runs.get(job.run_id).await {
            if matches!(existing.status, RunStatus::Running | RunStatus::Succeeded) {
                info!(event = "duplicate_delivery_skipped", run_id = %job.run_id, status = ?existing.status);
                let _ = self.queue.delete(&message.receipt_handle).await;
                return JobOutcome::DuplicateDeliverySkipped;
            }
            if existing.status == RunStatus::Failed && existing.error_code.as_deref() == Some("POISON_JOB") {
                info!(event = "poison_job_redelivered", run_id = %job.run_id);
                return JobOutcome::PoisonNotDeleted;
            }
        }

        if message.receive_count >= self.settings.poison_max_receives {
            self.handle_poison(&job).await;
            return JobOutcome::PoisonNotDeleted;
        }

        if let Ok(Some(_other_run)) = self
            .runs
            .find_running_by_tenant(&job.tenant_id, job.run_id)
            .await
        {
            info!(event = "tenant_locked", tenant_id = %job.tenant_id, run_id = %job.run_id);
            let _ = self
                .queue
                .change_visibility(&message.receipt_handle, self.settings.tenant_backoff.as_secs())
                .await;
            return JobOutcome::TenantLockedNotDeleted;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let heartbeat = self.spawn_heartbeat(message.receipt_handle.clone(), stop_rx);

        let result = self.run_job(&job).await;
        let _ = stop_tx.send(true);
        let _ = heartbeat.await;

        match result {
            Ok(()) => {
                let _ = self.queue.delete(&message.receipt_handle).await;
                JobOutcome::Completed
            }
            Err(JobError::NonRetryable { code, message: msg }) => {
                self.fail_run(&job, &code, &msg, None).await;
                let _ = self.queue.delete(&message.receipt_handle).await;
                JobOutcome::FailedNonRetryable
            }
            Err(JobError::Retryable(e)) => {
                warn!(event = "retryable_job_error", run_id = %job.run_id, error = %e);
                self.metrics.record_worker_error("retryable").await;
                JobOutcome::FailedRetryableNotDeleted
            }
        }
    }

    async fn handle_poison(&self, job: &RunJob) {
        if let Ok(Some(existing)) = self.runs.get(job.run_id).await {
            if existing.error_code.as_deref() == Some("POISON_JOB") {
                return; // already recorded, redelivery after DLQ handoff is a no-op
            }
        }
        self.fail_run(job, "POISON_JOB", "receive count exceeded the configured maximum", Some(RunStage::Queue))
            .await;
        self.metrics.record_worker_error("poison").await;
    }

    fn spawn_heartbeat(&self, receipt_handle: String, mut stop_rx: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let interval = self.settings.visibility_heartbeat;
        let visibility_timeout_secs = self.settings.visibility_timeout.as_secs();
        tokio::spawn(async move {
            if let Err(e) = queue.change_visibility(&receipt_handle, visibility_timeout_secs).await {
                warn!(event = "heartbeat_extend_failed", error = %e);
            }
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = queue.change_visibility(&receipt_handle, visibility_timeout_secs).await {
                            warn!(event = "heartbeat_extend_failed", error = %e);
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn update_status(&self, run: &mut RunRecord, status: RunStatus, stage: RunStage) -> Result<(), JobError> {
        if status == RunStatus::Running && run.started_at.is_none() {
            run.started_at = Some(Utc::now());
        }
        run.status = status;
        run.advance_stage(stage);
        self.runs.update(run).await.map_err(JobError::from)
    }

    async fn fail_run(&self, job: &RunJob, code: &str, message: &str, failed_stage: Option<RunStage>) {
        let mut run = match self.runs.get(job.run_id).await {
            Ok(Some(run)) => run,
            _ => RunRecord::new(job.run_id, job.tenant_id.clone(), job.config_version),
        };
        run.status = RunStatus::Failed;
        run.error_code = Some(code.to_string());
        run.error_message = Some(message.to_string());
        run.finished_at = Some(Utc::now());
        if let Some(stage) = failed_stage {
            run.failed_stage = Some(stage);
        } else {
            run.failed_stage = Some(run.stage);
        }
        if let Err(e) = self.runs.update(&run).await {
            error!(event = "fail_run_update_failed", run_id = %job.run_id, error = %e);
        }
        self.metrics.record_run_failure(&job.tenant_id, run.failed_stage).await;
    }

    /// Fetches the text of every configured vendor sku-map that has an
    /// `s3_key`, best-effort: a vendor whose map fails to fetch is simply
    /// left out of the map, which the engine treats as "missing sku map"
    /// rather than aborting the whole run.
    async fn fetch_sku_maps(&self, tenant: &riv_schemas::TenantConfig) -> HashMap<String, String> {
        let mut sku_map_texts = HashMap::new();
        for vendor in &tenant.vendors {
            let Some(sku_map_cfg) = &vendor.sku_map else { continue };
            let Some(key) = &sku_map_cfg.s3_key else { continue };
            match self.blob.download_text(key).await {
                Ok(text) => {
                    sku_map_texts.insert(vendor.vendor_id.clone(), text);
                }
                Err(e) => {
                    warn!(event = "sku_map_fetch_failed", vendor_id = %vendor.vendor_id, error = %e);
                }
            }
        }
        sku_map_texts
    }

    fn elapsed_secs(since: chrono::DateTime<Utc>) -> f64 {
        (Utc::now() - since).num_milliseconds() as f64 / 1000.0
    }

    /// The fetch -> normalize -> merge-price -> write-outputs -> complete
    /// pipeline for one job. Returns before deciding whether to delete the
    /// queue message -- that's `process_message`'s job.
    async fn run_job(&self, job: &RunJob) -> Result<(), JobError> {
        let started_at = Utc::now();
        let mut stage_times: HashMap<String, f64> = HashMap::new();

        let mut run = match self.runs.get(job.run_id).await? {
            Some(run) => run,
            None => RunRecord::new(job.run_id, job.tenant_id.clone(), job.config_version),
        };

        // Transition before the tenant-config lookup so a lookup/schema
        // failure records failed_stage=FETCH_INPUTS, not the run's prior
        // stage.
        self.update_status(&mut run, RunStatus::Running, RunStage::FetchInputs).await?;

        let tenant_record = self
            .tenants
            .get(&job.tenant_id, job.config_version)
            .await?
            .ok_or_else(|| JobError::non_retryable("missing_tenant_config", "no tenant config for this version"))?;
        let tenant = tenant_record.config;

        if !SUPPORTED_SCHEMA_VERSIONS.contains(&tenant.schema_version) {
            return Err(JobError::non_retryable(
                "unsupported_schema_version",
                format!("schema_version {} is not supported", tenant.schema_version),
            ));
        }

        let run_prefix = run.run_prefix();
        let mut vendor_inputs = HashMap::new();
        let mut manifest_entries = Vec::new();
        for vendor in &tenant.vendors {
            if !job.vendors.is_empty() && !job.vendors.iter().any(|v| v == &vendor.vendor_id) {
                continue;
            }
            let latest = self.blob.list_latest(&vendor.inbound.s3_prefix).await?;
            let Some(location) = latest else {
                // absence is handled by the engine's required-vendor policy
                manifest_entries.push(artifacts::ManifestEntry {
                    vendor_id: vendor.vendor_id.clone(),
                    status: artifacts::ManifestStatus::Missing,
                });
                continue;
            };
            let bytes = self.blob.download_bytes(&location.key).await?;
            let filename = location.key.rsplit('/').next().unwrap_or("input.csv");
            let copy_key = format!("{run_prefix}inbound/{}/{filename}", vendor.vendor_id);
            self.blob.upload_bytes(&copy_key, bytes.clone()).await?;
            manifest_entries.push(artifacts::ManifestEntry {
                vendor_id: vendor.vendor_id.clone(),
                status: artifacts::ManifestStatus::Found {
                    etag: location.etag.clone(),
                    size: location.size,
                    last_modified: location.last_modified,
                    run_copy_key: copy_key.clone(),
                },
            });
            vendor_inputs.insert(vendor.vendor_id.clone(), bytes);
        }
        stage_times.insert("FETCH_INPUTS".to_string(), Self::elapsed_secs(started_at));

        let sku_map_texts = self.fetch_sku_maps(&tenant).await;

        self.update_status(&mut run, RunStatus::Running, RunStage::Normalize).await?;
        let normalize_started = Utc::now();

        let normalized = normalize_vendors(&tenant, &vendor_inputs, &sku_map_texts)?;

        let (config_json, config_hash) = riv_config::canonicalize_and_hash(
            &serde_json::to_value(&tenant).map_err(|e| anyhow::anyhow!(e))?,
        );
        let _ = config_json;

        let mut artifact_keys = Vec::new();

        let snapshot_key = format!("{run_prefix}reports/config_snapshot.json");
        self.blob
            .upload_bytes(&snapshot_key, artifacts::config_snapshot_json(&tenant, &config_hash))
            .await?;
        artifact_keys.push(snapshot_key);

        let manifest_key = format!("{run_prefix}reports/input_manifest.json");
        self.blob
            .upload_bytes(&manifest_key, artifacts::input_manifest_json(&manifest_entries))
            .await?;
        artifact_keys.push(manifest_key);

        let mut vendor_record_counts: HashMap<String, usize> = HashMap::new();
        for vendor_result in &normalized.vendor_results {
            vendor_record_counts.insert(vendor_result.vendor_id.clone(), vendor_result.records.len());
            let normalized_csv =
                artifacts::write_normalized_csv(&vendor_result.records).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            let normalized_key = format!("{run_prefix}normalized/{}/normalized.csv", vendor_result.vendor_id);
            self.blob.upload_bytes(&normalized_key, normalized_csv).await?;
            artifact_keys.push(normalized_key);
        }

        let all_errors: Vec<serde_json::Value> = normalized
            .vendor_results
            .iter()
            .flat_map(|v| {
                v.errors.iter().map(move |e| {
                    json!({
                        "vendor_id": v.vendor_id,
                        "row_number": e.row_number,
                        "reason": e.reason,
                    })
                })
            })
            .chain(normalized.warnings.iter().map(|w| json!({ "warning": w })))
            .chain(normalized.missing_vendors.iter().map(|m| {
                json!({
                    "vendor_id": m.vendor_id,
                    "code": "OPTIONAL_VENDOR_MISSING",
                    "required": m.required,
                })
            }))
            .collect();
        if !all_errors.is_empty() {
            let errors_key = format!("{run_prefix}reports/errors.json");
            self.blob.upload_bytes(&errors_key, artifacts::errors_json(&all_errors)).await?;
            run.errors_artifact_key = Some(errors_key.clone());
            run.error_report_key = Some(errors_key.clone());
            artifact_keys.push(errors_key);
        }
        stage_times.insert("NORMALIZE".to_string(), Self::elapsed_secs(normalize_started));

        self.update_status(&mut run, RunStatus::Running, RunStage::MergePrice).await?;
        let merge_started = Utc::now();

        // Evaluated here, after the per-vendor normalized CSVs and error
        // report are already written, with stage=MERGE_PRICE on record --
        // a threshold failure must not look like a NORMALIZE failure.
        check_error_thresholds(&tenant, normalized.invalid_row_count, normalized.valid_row_count)?;

        let priced = merge_and_price(&tenant, &normalized.records);

        let merged_csv = artifacts::write_merged_csv(&priced).map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let output_key = format!("{run_prefix}outputs/merged_inventory.csv");
        self.blob.upload_bytes(&output_key, merged_csv).await?;
        artifact_keys.push(output_key);
        stage_times.insert("MERGE_PRICE".to_string(), Self::elapsed_secs(merge_started));

        self.update_status(&mut run, RunStatus::Running, RunStage::WriteOutputs).await?;

        let finished_at = Utc::now();
        let duration_seconds = (finished_at - started_at).num_milliseconds() as f64 / 1000.0;
        let summary_key = format!("{run_prefix}reports/run_summary.json");
        self.blob
            .upload_bytes(
                &summary_key,
                artifacts::run_summary_json(artifacts::RunSummaryInput {
                    run_id: run.run_id,
                    tenant_id: &job.tenant_id,
                    config_version: job.config_version,
                    vendor_record_counts: &vendor_record_counts,
                    invalid_rows: normalized.invalid_row_count,
                    total_rows: normalized.invalid_row_count + normalized.valid_row_count,
                    warnings: &normalized.warnings,
                    duration_seconds,
                    stage_times: &stage_times,
                    finished_at,
                }),
            )
            .await?;
        artifact_keys.push(summary_key);

        run.artifacts = artifact_keys;
        run.finished_at = Some(finished_at);
        self.update_status(&mut run, RunStatus::Succeeded, RunStage::Complete).await?;

        Ok(())
    }
}
