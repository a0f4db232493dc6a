mod support;

use analyst_core::{callback, CallbackOutcome, JobError};
use analyst_protocol::JobStatus;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use support::{points, scenario_job, seed_results, Harness};
use tempfile::tempdir;

#[tokio::test]
async fn fan_out_submits_one_request_per_point() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path(), vec![points("blocks", 12)], 100);

    let job = h.orchestrator.submit(scenario_job("blocks")).await.unwrap();
    assert!(!job.id.is_empty());
    assert_eq!(job.total_points, Some(12));
    assert_eq!(job.complete_points, Some(0));
    assert_eq!(job.graph_id.as_deref(), Some("nyc"));

    let enqueued = h.broker.enqueued.lock().clone();
    assert_eq!(enqueued.len(), 12);
    let ids: HashSet<&str> = enqueued.iter().map(|r| r.unit_id.as_str()).collect();
    assert_eq!(ids.len(), 12);
    assert!(enqueued
        .iter()
        .all(|r| r.job_id.as_deref() == Some(job.id.as_str())));
    assert!(h.queue.registry().contains(&job.id));
}

#[tokio::test]
async fn completes_only_after_all_points_done() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path(), vec![points("blocks", 3)], 100);
    let job = h.orchestrator.submit(scenario_job("blocks")).await.unwrap();
    let unit_ids: Vec<String> = (0..3).map(|i| format!("pt-{i}")).collect();
    seed_results(&h.blobs, &job.id, &unit_ids);

    h.broker.set_status(&job.id, 3, 1);
    assert_eq!(h.poll().await, 1);
    let progress = h.orchestrator.progress(&job.id).await.unwrap();
    assert_eq!(progress.complete_points, Some(1));
    assert_eq!(progress.percent, 33);
    assert!(!progress.complete);
    assert_eq!(h.blobs.calls(), 0);

    h.broker.set_status(&job.id, 3, 3);
    h.poll().await;
    let progress = h.orchestrator.progress(&job.id).await.unwrap();
    assert!(progress.complete);
    assert_eq!(progress.percent, 100);
    assert!(!h.queue.registry().contains(&job.id));

    let stored: Vec<String> = h
        .orchestrator
        .results(&job.id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.unit_id)
        .collect();
    assert_eq!(stored, unit_ids);
}

#[tokio::test]
async fn empty_point_set_completes_on_first_delivery() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path(), vec![points("empty", 0)], 100);
    let job = h.orchestrator.submit(scenario_job("empty")).await.unwrap();
    assert_eq!(job.total_points, Some(0));

    h.broker.set_status(&job.id, 0, 0);
    h.poll().await;
    let progress = h.orchestrator.progress(&job.id).await.unwrap();
    assert!(progress.complete);
    assert_eq!(progress.percent, 0);
    assert!(h.orchestrator.results(&job.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_aggregation_is_retried_from_scratch() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path(), vec![points("blocks", 8)], 5);
    let job = h.orchestrator.submit(scenario_job("blocks")).await.unwrap();
    let unit_ids: Vec<String> = (0..8).map(|i| format!("pt-{i}")).collect();
    seed_results(&h.blobs, &job.id, &unit_ids);
    h.blobs.fail_lists.store(1, Ordering::SeqCst);

    h.broker.set_status(&job.id, 8, 8);
    h.poll().await;
    let progress = h.orchestrator.progress(&job.id).await.unwrap();
    assert!(!progress.complete);
    assert_eq!(progress.complete_points, Some(8));
    assert!(h.queue.registry().contains(&job.id));

    h.poll().await;
    let progress = h.orchestrator.progress(&job.id).await.unwrap();
    assert!(progress.complete);
    // two pages of 5 and 3 objects
    assert_eq!(h.orchestrator.results(&job.id).await.unwrap().len(), 8);
}

#[tokio::test]
async fn completed_job_does_no_further_io() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path(), vec![points("blocks", 2)], 100);
    let record = h.orchestrator.submit(scenario_job("blocks")).await.unwrap();
    seed_results(&h.blobs, &record.id, &["pt-0".into(), "pt-1".into()]);

    let job = analyst_core::Job::from_record(
        h.orchestrator.context().clone(),
        h.orchestrator.job(&record.id).await.unwrap(),
    );
    let done = JobStatus::new(record.id.clone(), 2, 2);
    assert_eq!(
        job.update_status(done.clone()).await,
        CallbackOutcome::Unregister
    );
    let calls = h.blobs.calls();
    assert!(calls > 0);

    for _ in 0..3 {
        assert_eq!(
            job.update_status(done.clone()).await,
            CallbackOutcome::Unregister
        );
    }
    assert_eq!(h.blobs.calls(), calls);
}

#[tokio::test]
async fn overlapping_final_deliveries_aggregate_once() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path(), vec![points("blocks", 2)], 100);
    let record = h.orchestrator.submit(scenario_job("blocks")).await.unwrap();
    seed_results(&h.blobs, &record.id, &["pt-0".into(), "pt-1".into()]);

    let job = analyst_core::Job::from_record(
        h.orchestrator.context().clone(),
        h.orchestrator.job(&record.id).await.unwrap(),
    );
    let done = JobStatus::new(record.id.clone(), 2, 2);
    let (first, second) = tokio::join!(
        job.update_status(done.clone()),
        job.update_status(done.clone())
    );
    assert_eq!(first, CallbackOutcome::Unregister);
    assert_eq!(second, CallbackOutcome::Unregister);

    // one listing page and one fetch per object
    assert_eq!(h.blobs.lists.load(Ordering::SeqCst), 1);
    assert_eq!(h.blobs.gets.load(Ordering::SeqCst), 2);
    assert!(h.orchestrator.progress(&record.id).await.unwrap().complete);
    assert_eq!(h.orchestrator.results(&record.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn unregistered_callback_is_never_invoked_again() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path(), vec![], 100);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    h.queue.add_callback(
        "job-x",
        callback(move |_status| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                CallbackOutcome::Unregister
            }
        }),
    );
    h.broker.set_status("job-x", 1, 0);

    assert_eq!(h.poll().await, 1);
    for _ in 0..3 {
        h.poll().await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(h.queue.registry().is_empty());
}

#[tokio::test]
async fn cancel_stops_delivery_and_notifies_broker() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path(), vec![points("blocks", 4)], 100);
    let job = h.orchestrator.submit(scenario_job("blocks")).await.unwrap();

    h.orchestrator.cancel(&job.id).await;
    assert!(!h.queue.registry().contains(&job.id));
    assert_eq!(
        h.broker.cancelled.lock().clone(),
        vec![("proj".to_string(), "nyc".to_string(), job.id.clone())]
    );

    h.broker.set_status(&job.id, 4, 4);
    assert_eq!(h.poll().await, 0);
    assert!(!h.orchestrator.progress(&job.id).await.unwrap().complete);

    // unknown jobs are a logged no-op
    h.orchestrator.cancel("missing").await;
    assert_eq!(h.broker.cancelled.lock().len(), 1);
}

#[tokio::test]
async fn enqueue_failure_is_surfaced() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path(), vec![points("blocks", 2)], 100);
    h.broker.fail_enqueue.store(true, Ordering::SeqCst);

    let err = h
        .orchestrator
        .submit(scenario_job("blocks"))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Broker(_)));
    assert!(h.queue.registry().is_empty());
}

#[tokio::test]
async fn unknown_point_set_is_rejected() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path(), vec![], 100);
    let err = h
        .orchestrator
        .submit(scenario_job("nowhere"))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::UnknownPointSet(id) if id == "nowhere"));
}
