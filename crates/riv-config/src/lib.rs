use std::env;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing_subscriber::EnvFilter;

/// Runtime settings for the worker loop, loaded from the process
/// environment with the defaults documented for this service.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub visibility_timeout: Duration,
    pub visibility_heartbeat: Duration,
    pub tenant_backoff: Duration,
    pub poison_max_receives: u32,
    pub database_url: Option<String>,
    pub s3_bucket: Option<String>,
    pub sqs_queue_url: Option<String>,
    pub cloudwatch_metrics_enabled: bool,
    pub cloudwatch_metrics_namespace: String,
}

impl WorkerSettings {
    pub fn from_env() -> Self {
        WorkerSettings {
            concurrency: env_usize("WORKER_CONCURRENCY", 1),
            visibility_timeout: Duration::from_secs(env_u64("WORKER_VISIBILITY_TIMEOUT_SECONDS", 300)),
            visibility_heartbeat: Duration::from_secs(env_u64("WORKER_VISIBILITY_HEARTBEAT_SECONDS", 60)),
            tenant_backoff: Duration::from_secs(env_u64("WORKER_TENANT_BACKOFF_SECONDS", 30)),
            poison_max_receives: env_u64("WORKER_POISON_MAX_RECEIVES", 5) as u32,
            database_url: env::var("RIV_DATABASE_URL").ok(),
            s3_bucket: env::var("RIV_S3_BUCKET").ok(),
            sqs_queue_url: env::var("RIV_SQS_QUEUE_URL").ok(),
            cloudwatch_metrics_enabled: env::var("CLOUDWATCH_METRICS_ENABLED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            cloudwatch_metrics_namespace: env::var("CLOUDWATCH_METRICS_NAMESPACE")
                .unwrap_or_else(|_| "RelayInventory".to_string()),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Loads `.env.local` if present; silently does nothing otherwise. Meant
/// to be called once at process startup, before `WorkerSettings::from_env`.
pub fn bootstrap_dotenv() {
    let _ = dotenvy::from_filename(".env.local");
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

/// Recursively sorts the keys of every JSON object so that two
/// semantically-identical configs always serialize to the same bytes.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(String, Value)> = map
                .iter()
                .map(|(k, v)| (k.clone(), sort_keys(v)))
                .collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Returns `(canonical_json, sha256_hex)` for `value`: keys sorted
/// recursively, then hashed so config drift between two runs is cheap to
/// detect from the `config_snapshot.json` artifact alone.
pub fn canonicalize_and_hash(value: &Value) -> (String, String) {
    let canonical = sort_keys(value);
    let canonical_json = serde_json::to_string(&canonical).expect("sorted JSON always serializes");
    let mut hasher = Sha256::new();
    hasher.update(canonical_json.as_bytes());
    let hash = hex::encode(hasher.finalize());
    (canonical_json, hash)
}
