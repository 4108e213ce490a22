use async_trait::async_trait;
use aws_sdk_cloudwatch::types::{Dimension, MetricDatum};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_sqs::types::MessageSystemAttributeName;
use chrono::{DateTime, Utc};
use riv_schemas::RunStage;
use riv_store::{BlobLocation, BlobStore, JobQueue, MetricsSink, QueueMessage};
use tracing::warn;

pub async fn load_aws_config() -> aws_config::SdkConfig {
    aws_config::load_from_env().await
}

pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: String) -> Self {
        S3BlobStore { client, bucket }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn list_latest(&self, prefix: &str) -> anyhow::Result<Option<BlobLocation>> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .send()
            .await?;
        let best = output
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?.to_string();
                let last_modified: DateTime<Utc> = obj
                    .last_modified()
                    .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
                    .unwrap_or_else(Utc::now);
                let etag = obj.e_tag().map(|s| s.trim_matches('"').to_string());
                Some((key, last_modified, obj.size().unwrap_or(0), etag))
            })
            // ties on last_modified broken by the lexicographically largest key
            .max_by(|(key_a, ts_a, _, _), (key_b, ts_b, _, _)| ts_a.cmp(ts_b).then_with(|| key_a.cmp(key_b)));
        Ok(best.map(|(key, last_modified, size, etag)| BlobLocation { key, last_modified, size, etag }))
    }

    async fn download_bytes(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        let output = self.client.get_object().bucket(&self.bucket).key(key).send().await?;
        let bytes = output.body.collect().await?.into_bytes();
        Ok(bytes.to_vec())
    }

    async fn upload_bytes(&self, key: &str, bytes: Vec<u8>) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .send()
            .await?;
        Ok(())
    }

    async fn presign(&self, key: &str, expires_in_secs: u64) -> anyhow::Result<String> {
        let presigning = PresigningConfig::expires_in(std::time::Duration::from_secs(expires_in_secs))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await?;
        Ok(request.uri().to_string())
    }
}

pub struct SqsJobQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsJobQueue {
    pub fn new(client: aws_sdk_sqs::Client, queue_url: String) -> Self {
        SqsJobQueue { client, queue_url }
    }
}

#[async_trait]
impl JobQueue for SqsJobQueue {
    async fn send(&self, body: String) -> anyhow::Result<()> {
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await?;
        Ok(())
    }

    async fn receive(&self) -> anyhow::Result<Option<QueueMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(5)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await?;
        let Some(message) = output.messages().first() else {
            return Ok(None);
        };
        let receive_count = message
            .attributes()
            .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(1);
        Ok(Some(QueueMessage {
            receipt_handle: message.receipt_handle().unwrap_or_default().to_string(),
            body: message.body().unwrap_or_default().to_string(),
            receive_count,
        }))
    }

    async fn delete(&self, receipt_handle: &str) -> anyhow::Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await?;
        Ok(())
    }

    async fn change_visibility(&self, receipt_handle: &str, visibility_timeout_secs: u64) -> anyhow::Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(visibility_timeout_secs as i32)
            .send()
            .await?;
        Ok(())
    }
}

pub struct CloudWatchMetrics {
    client: aws_sdk_cloudwatch::Client,
    namespace: String,
    enabled: bool,
}

impl CloudWatchMetrics {
    pub fn new(client: aws_sdk_cloudwatch::Client, namespace: String, enabled: bool) -> Self {
        CloudWatchMetrics { client, namespace, enabled }
    }

    async fn put(&self, name: &str, dimensions: Vec<Dimension>) {
        if !self.enabled {
            return;
        }
        let datum = MetricDatum::builder()
            .metric_name(name)
            .value(1.0)
            .set_dimensions(Some(dimensions))
            .build();
        if let Err(e) = self
            .client
            .put_metric_data()
            .namespace(&self.namespace)
            .metric_data(datum)
            .send()
            .await
        {
            warn!(event = "cloudwatch_put_metric_failed", error = %e);
        }
    }
}

#[async_trait]
impl MetricsSink for CloudWatchMetrics {
    async fn record_run_failure(&self, tenant_id: &str, failed_stage: Option<RunStage>) {
        let stage_label = failed_stage.map(|s| format!("{s:?}")).unwrap_or_else(|| "UNKNOWN".to_string());
        // Emitted once with the tenant dimension and once without, so a
        // per-tenant dashboard and a service-wide alarm can both query it.
        self.put(
            "RunFailed",
            vec![
                Dimension::builder().name("tenant_id").value(tenant_id).build(),
                Dimension::builder().name("failed_stage").value(&stage_label).build(),
            ],
        )
        .await;
        self.put(
            "RunFailed",
            vec![Dimension::builder().name("failed_stage").value(&stage_label).build()],
        )
        .await;
    }

    async fn record_worker_error(&self, error_type: &str) {
        self.put(
            "WorkerError",
            vec![Dimension::builder().name("error_type").value(error_type).build()],
        )
        .await;
    }
}
