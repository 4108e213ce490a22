use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use riv_schemas::RunJob;
use riv_store::{JobQueue, RunStore, TenantConfigRecord, TenantStore};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "riv")]
#[command(about = "Relay inventory sync worker CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },
    /// Tenant config commands
    Tenant {
        #[command(subcommand)]
        cmd: TenantCmd,
    },
    /// Run lifecycle commands
    Run {
        #[command(subcommand)]
        cmd: RunCmd,
    },
    /// Worker commands
    Worker {
        #[command(subcommand)]
        cmd: WorkerCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Migrate,
}

#[derive(Subcommand)]
enum TenantCmd {
    /// Loads a TenantConfig JSON file and stores it under a config version.
    Put {
        #[arg(long)]
        tenant_id: String,
        #[arg(long)]
        config_version: i64,
        #[arg(long)]
        config_path: String,
    },
    Get {
        #[arg(long)]
        tenant_id: String,
        #[arg(long)]
        config_version: i64,
    },
}

#[derive(Subcommand)]
enum RunCmd {
    /// Enqueues a RunJob onto the queue and creates its QUEUED run record.
    Enqueue {
        #[arg(long)]
        tenant_id: String,
        #[arg(long)]
        config_version: i64,
        #[arg(long = "vendor")]
        vendors: Vec<String>,
    },
}

#[derive(Subcommand)]
enum WorkerCmd {
    /// Runs the queue-polling worker loop forever.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    riv_config::bootstrap_dotenv();
    riv_config::init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = riv_db::connect_from_env().await?;
            match cmd {
                DbCmd::Migrate => {
                    riv_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::Tenant { cmd } => {
            let pool = riv_db::connect_from_env().await?;
            let tenants = riv_db::PostgresTenantStore::new(pool);
            match cmd {
                TenantCmd::Put { tenant_id, config_version, config_path } => {
                    let raw = fs::read_to_string(&config_path)
                        .with_context(|| format!("failed to read {config_path}"))?;
                    let config: riv_schemas::TenantConfig = serde_json::from_str(&raw)
                        .with_context(|| format!("failed to parse {config_path} as TenantConfig"))?;
                    tenants
                        .put(&TenantConfigRecord { tenant_id: tenant_id.clone(), config_version, config })
                        .await?;
                    println!("tenant_id={tenant_id} config_version={config_version} stored=true");
                }
                TenantCmd::Get { tenant_id, config_version } => {
                    let record = tenants.get(&tenant_id, config_version).await?;
                    match record {
                        Some(record) => println!("{}", serde_json::to_string_pretty(&record.config)?),
                        None => println!("not found"),
                    }
                }
            }
        }

        Commands::Run { cmd } => match cmd {
            RunCmd::Enqueue { tenant_id, config_version, vendors } => {
                let pool = riv_db::connect_from_env().await?;
                let runs = riv_db::PostgresRunStore::new(pool);
                let queue = build_queue().await?;

                let run_id = Uuid::new_v4();
                let run = riv_schemas::RunRecord::new(run_id, tenant_id.clone(), config_version);
                runs.insert(&run).await?;

                let job = RunJob { run_id, tenant_id: tenant_id.clone(), vendors, config_version, run_type: "inventory_sync".to_string() };
                queue.send(serde_json::to_string(&job)?).await?;

                println!("run_id={run_id}");
                println!("tenant_id={tenant_id}");
                println!("config_version={config_version}");
            }
        },

        Commands::Worker { cmd } => match cmd {
            WorkerCmd::Run => {
                let settings = riv_config::WorkerSettings::from_env();
                let pool = riv_db::connect_from_env().await?;
                riv_db::migrate(&pool).await?;

                let runs = Arc::new(riv_db::PostgresRunStore::new(pool.clone()));
                let tenants = Arc::new(riv_db::PostgresTenantStore::new(pool));
                let blob = Arc::new(build_blob_store(&settings).await?);
                let queue = Arc::new(build_queue().await?);
                let metrics = Arc::new(build_metrics(&settings).await?);

                let worker = Arc::new(riv_worker::Worker::new(blob, queue, runs, tenants, metrics, settings));
                worker.run_forever().await;
            }
        },
    }

    Ok(())
}

async fn build_blob_store(settings: &riv_config::WorkerSettings) -> Result<riv_aws::S3BlobStore> {
    let bucket = settings.s3_bucket.clone().context("RIV_S3_BUCKET is required")?;
    let config = riv_aws::load_aws_config().await;
    let client = aws_sdk_s3::Client::new(&config);
    Ok(riv_aws::S3BlobStore::new(client, bucket))
}

async fn build_queue() -> Result<riv_aws::SqsJobQueue> {
    let queue_url = std::env::var("RIV_SQS_QUEUE_URL").context("RIV_SQS_QUEUE_URL is required")?;
    let config = riv_aws::load_aws_config().await;
    let client = aws_sdk_sqs::Client::new(&config);
    Ok(riv_aws::SqsJobQueue::new(client, queue_url))
}

async fn build_metrics(settings: &riv_config::WorkerSettings) -> Result<riv_aws::CloudWatchMetrics> {
    let config = riv_aws::load_aws_config().await;
    let client = aws_sdk_cloudwatch::Client::new(&config);
    Ok(riv_aws::CloudWatchMetrics::new(client, settings.cloudwatch_metrics_namespace.clone(), settings.cloudwatch_metrics_enabled))
}
