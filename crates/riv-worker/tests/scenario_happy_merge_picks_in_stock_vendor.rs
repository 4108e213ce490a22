mod common;

use riv_schemas::{RunJob, RunRecord, RunStage, RunStatus};
use riv_store::{BlobStore, JobQueue, RunStore, TenantConfigRecord, TenantStore};
use riv_worker::JobOutcome;
use uuid::Uuid;

#[tokio::test]
async fn happy_path_completes_run_and_writes_artifacts() {
    let (worker, blob, queue, runs, tenants, _metrics) = common::test_worker();
    let tenant = common::test_tenant(&["A"]);
    tenants
        .put(&TenantConfigRecord { tenant_id: "tenant-a".to_string(), config_version: 1, config: tenant })
        .await
        .unwrap();
    blob.upload_bytes("inbound/A/vendor.csv", b"sku,quantity_available,cost\nSKU1,5,10.00\n".to_vec())
        .await
        .unwrap();

    let run_id = Uuid::new_v4();
    let job = RunJob { run_id, tenant_id: "tenant-a".to_string(), vendors: vec![], config_version: 1, run_type: "inventory_sync".to_string() };
    runs.insert(&RunRecord::new(run_id, "tenant-a", 1)).await.unwrap();
    queue.send(serde_json::to_string(&job).unwrap()).await.unwrap();

    let message = queue.receive().await.unwrap().unwrap();
    let outcome = worker.process_message(message).await;
    assert_eq!(outcome, JobOutcome::Completed);

    let run = runs.get(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.stage, RunStage::Complete);
    assert!(!run.artifacts.is_empty());
    for key in &run.artifacts {
        assert!(key.starts_with(&run.run_prefix()));
    }
}
