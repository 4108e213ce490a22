mod common;

use riv_schemas::{RunJob, RunRecord, RunStatus};
use riv_store::{JobQueue, RunStore};
use riv_worker::JobOutcome;
use uuid::Uuid;

#[tokio::test]
async fn duplicate_delivery_of_a_succeeded_run_is_deleted_without_reexecuting() {
    let (worker, _blob, queue, runs, _tenants, _metrics) = common::test_worker();
    let run_id = Uuid::new_v4();

    let mut run = RunRecord::new(run_id, "tenant-a", 1);
    run.status = RunStatus::Succeeded;
    run.artifacts = vec!["already/written.csv".to_string()];
    runs.insert(&run).await.unwrap();

    let job = RunJob { run_id, tenant_id: "tenant-a".to_string(), vendors: vec![], config_version: 1, run_type: "inventory_sync".to_string() };
    queue.send(serde_json::to_string(&job).unwrap()).await.unwrap();

    let message = queue.receive().await.unwrap().unwrap();
    let outcome = worker.process_message(message).await;
    assert_eq!(outcome, JobOutcome::DuplicateDeliverySkipped);

    // no tenant config was ever registered; re-execution would have failed
    // non-retryably and overwritten the recorded run with a failure.
    let stored = runs.get(run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Succeeded);
    assert_eq!(stored.artifacts, vec!["already/written.csv".to_string()]);
}

#[tokio::test]
async fn redelivery_of_a_recorded_poison_job_is_left_untouched() {
    let (worker, _blob, queue, runs, _tenants, metrics) = common::test_worker();
    let run_id = Uuid::new_v4();

    let mut run = RunRecord::new(run_id, "tenant-a", 1);
    run.status = RunStatus::Failed;
    run.error_code = Some("POISON_JOB".to_string());
    runs.insert(&run).await.unwrap();

    let job = RunJob { run_id, tenant_id: "tenant-a".to_string(), vendors: vec![], config_version: 1, run_type: "inventory_sync".to_string() };
    queue.send(serde_json::to_string(&job).unwrap()).await.unwrap();

    let message = queue.receive().await.unwrap().unwrap();
    let outcome = worker.process_message(message).await;
    assert_eq!(outcome, JobOutcome::PoisonNotDeleted);

    // no new poison metric recorded: this is a no-op redelivery, not a
    // fresh poison detection.
    assert_eq!(metrics.worker_errors.lock().await.len(), 0);
}
