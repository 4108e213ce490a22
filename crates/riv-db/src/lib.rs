use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use riv_schemas::{RunRecord, RunStage, RunStatus, TenantConfig};
use riv_store::{RunStore, TenantConfigRecord, TenantStore};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub const ENV_DB_URL: &str = "RIV_DATABASE_URL";

pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await.context("db migrate failed")?;
    Ok(())
}

fn stage_to_str(stage: RunStage) -> &'static str {
    match stage {
        RunStage::Queue => "QUEUE",
        RunStage::FetchInputs => "FETCH_INPUTS",
        RunStage::Normalize => "NORMALIZE",
        RunStage::MergePrice => "MERGE_PRICE",
        RunStage::WriteOutputs => "WRITE_OUTPUTS",
        RunStage::Complete => "COMPLETE",
    }
}

fn stage_from_str(s: &str) -> RunStage {
    match s {
        "FETCH_INPUTS" => RunStage::FetchInputs,
        "NORMALIZE" => RunStage::Normalize,
        "MERGE_PRICE" => RunStage::MergePrice,
        "WRITE_OUTPUTS" => RunStage::WriteOutputs,
        "COMPLETE" => RunStage::Complete,
        _ => RunStage::Queue,
    }
}

fn status_to_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Queued => "QUEUED",
        RunStatus::Running => "RUNNING",
        RunStatus::Succeeded => "SUCCEEDED",
        RunStatus::Failed => "FAILED",
    }
}

fn status_from_str(s: &str) -> RunStatus {
    match s {
        "RUNNING" => RunStatus::Running,
        "SUCCEEDED" => RunStatus::Succeeded,
        "FAILED" => RunStatus::Failed,
        _ => RunStatus::Queued,
    }
}

fn row_to_run(row: &sqlx::postgres::PgRow) -> Result<RunRecord> {
    let artifacts: serde_json::Value = row.try_get("artifacts")?;
    let artifacts: Vec<String> = serde_json::from_value(artifacts).unwrap_or_default();
    Ok(RunRecord {
        run_id: row.try_get("run_id")?,
        tenant_id: row.try_get("tenant_id")?,
        config_version: row.try_get("config_version")?,
        status: status_from_str(row.try_get::<String, _>("status")?.as_str()),
        stage: stage_from_str(row.try_get::<String, _>("stage")?.as_str()),
        requested_at: row.try_get("requested_at")?,
        started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at")?,
        finished_at: row.try_get::<Option<DateTime<Utc>>, _>("finished_at")?,
        failed_stage: row
            .try_get::<Option<String>, _>("failed_stage")?
            .map(|s| stage_from_str(&s)),
        error_code: row.try_get("error_code")?,
        error_message: row.try_get("error_message")?,
        errors_artifact_key: row.try_get("errors_artifact_key")?,
        error_report_key: row.try_get("error_report_key")?,
        artifacts,
    })
}

pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    pub fn new(pool: PgPool) -> Self {
        PostgresRunStore { pool }
    }
}

#[async_trait]
impl RunStore for PostgresRunStore {
    async fn insert(&self, run: &RunRecord) -> Result<()> {
        sqlx::query(
            r#"
            insert into runs (
                run_id, tenant_id, config_version, status, stage, requested_at,
                started_at, finished_at, failed_stage, error_code, error_message,
                errors_artifact_key, error_report_key, artifacts
            ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
            on conflict (run_id) do nothing
            "#,
        )
        .bind(run.run_id)
        .bind(&run.tenant_id)
        .bind(run.config_version)
        .bind(status_to_str(run.status))
        .bind(stage_to_str(run.stage))
        .bind(run.requested_at)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.failed_stage.map(stage_to_str))
        .bind(&run.error_code)
        .bind(&run.error_message)
        .bind(&run.errors_artifact_key)
        .bind(&run.error_report_key)
        .bind(serde_json::to_value(&run.artifacts)?)
        .execute(&self.pool)
        .await
        .context("insert_run failed")?;
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        let row = sqlx::query("select * from runs where run_id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .context("get run failed")?;
        row.map(|r| row_to_run(&r)).transpose()
    }

    async fn update(&self, run: &RunRecord) -> Result<()> {
        let current_stage = sqlx::query_scalar::<_, String>("select stage from runs where run_id = $1")
            .bind(run.run_id)
            .fetch_optional(&self.pool)
            .await
            .context("update: fetch current stage failed")?
            .map(|s| stage_from_str(&s));

        let stage = match current_stage {
            Some(existing) if existing > run.stage => existing,
            _ => run.stage,
        };

        sqlx::query(
            r#"
            update runs set
                status = $2, stage = $3, started_at = $4, finished_at = $5,
                failed_stage = $6, error_code = $7, error_message = $8,
                errors_artifact_key = $9, error_report_key = $10, artifacts = $11
            where run_id = $1
            "#,
        )
        .bind(run.run_id)
        .bind(status_to_str(run.status))
        .bind(stage_to_str(stage))
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.failed_stage.map(stage_to_str))
        .bind(&run.error_code)
        .bind(&run.error_message)
        .bind(&run.errors_artifact_key)
        .bind(&run.error_report_key)
        .bind(serde_json::to_value(&run.artifacts)?)
        .execute(&self.pool)
        .await
        .context("update run failed")?;
        Ok(())
    }

    async fn find_running_by_tenant(&self, tenant_id: &str, exclude_run_id: Uuid) -> Result<Option<RunRecord>> {
        let row = sqlx::query(
            "select * from runs where tenant_id = $1 and status = 'RUNNING' and run_id <> $2 limit 1",
        )
        .bind(tenant_id)
        .bind(exclude_run_id)
        .fetch_optional(&self.pool)
        .await
        .context("find_running_by_tenant failed")?;
        row.map(|r| row_to_run(&r)).transpose()
    }
}

pub struct PostgresTenantStore {
    pool: PgPool,
}

impl PostgresTenantStore {
    pub fn new(pool: PgPool) -> Self {
        PostgresTenantStore { pool }
    }
}

#[async_trait]
impl TenantStore for PostgresTenantStore {
    async fn put(&self, record: &TenantConfigRecord) -> Result<()> {
        sqlx::query(
            r#"
            insert into tenant_configs (tenant_id, config_version, config)
            values ($1, $2, $3)
            on conflict (tenant_id, config_version) do update set config = excluded.config
            "#,
        )
        .bind(&record.tenant_id)
        .bind(record.config_version)
        .bind(serde_json::to_value(&record.config)?)
        .execute(&self.pool)
        .await
        .context("put tenant config failed")?;
        Ok(())
    }

    async fn get(&self, tenant_id: &str, config_version: i64) -> Result<Option<TenantConfigRecord>> {
        let row = sqlx::query("select config from tenant_configs where tenant_id = $1 and config_version = $2")
            .bind(tenant_id)
            .bind(config_version)
            .fetch_optional(&self.pool)
            .await
            .context("get tenant config failed")?;
        match row {
            None => Ok(None),
            Some(row) => {
                let value: serde_json::Value = row.try_get("config")?;
                let config: TenantConfig = serde_json::from_value(value)?;
                Ok(Some(TenantConfigRecord {
                    tenant_id: tenant_id.to_string(),
                    config_version,
                    config,
                }))
            }
        }
    }

    async fn get_latest(&self, tenant_id: &str) -> Result<Option<TenantConfigRecord>> {
        let row = sqlx::query(
            "select config_version, config from tenant_configs where tenant_id = $1 order by config_version desc limit 1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .context("get_latest tenant config failed")?;
        match row {
            None => Ok(None),
            Some(row) => {
                let config_version: i64 = row.try_get("config_version")?;
                let value: serde_json::Value = row.try_get("config")?;
                let config: TenantConfig = serde_json::from_value(value)?;
                Ok(Some(TenantConfigRecord {
                    tenant_id: tenant_id.to_string(),
                    config_version,
                    config,
                }))
            }
        }
    }
}
