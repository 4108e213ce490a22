mod common;

use riv_schemas::{RunJob, RunRecord, RunStage};
use riv_store::{JobQueue, RunStore};
use riv_worker::JobOutcome;
use uuid::Uuid;

#[tokio::test]
async fn poison_job_does_not_delete_message() {
    let (worker, _blob, queue, runs, _tenants, metrics) = common::test_worker();
    let run_id = Uuid::new_v4();
    let job = RunJob { run_id, tenant_id: "tenant-a".to_string(), vendors: vec![], config_version: 1, run_type: "inventory_sync".to_string() };
    runs.insert(&RunRecord::new(run_id, "tenant-a", 1)).await.unwrap();
    queue.send(serde_json::to_string(&job).unwrap()).await.unwrap();

    let mut message = queue.receive().await.unwrap().unwrap();
    message.receive_count = 5;
    let outcome = worker.process_message(message).await;
    assert_eq!(outcome, JobOutcome::PoisonNotDeleted);

    let run = runs.get(run_id).await.unwrap().unwrap();
    assert_eq!(run.error_code.as_deref(), Some("POISON_JOB"));
    assert_eq!(run.stage, RunStage::Queue);
    assert_eq!(metrics.worker_errors.lock().await.len(), 1);
}
