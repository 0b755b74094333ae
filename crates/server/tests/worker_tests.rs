//! Worker pool, panic watchdog and reaper behavior against a real store.

mod common;

use common::{TestServer, insert_image, unique_path};
use skycat_core::AstrometryStatus;
use skycat_metadata::repos::{ImageRepo, TaskRepo};
use skycat_server::reaper;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use time::OffsetDateTime;

async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_spawned_pool_drives_images_to_completion() {
    let server = TestServer::with_config(|config| {
        config.workflow.workers = 2;
    })
    .await;
    let metadata = server.metadata();
    let ids = [
        insert_image(metadata.as_ref(), &unique_path("/lights/pool")).await,
        insert_image(metadata.as_ref(), &unique_path("/lights/pool")).await,
        insert_image(metadata.as_ref(), &unique_path("/lights/pool")).await,
    ];
    for id in ids {
        server.state.workflow.request_solve(id, false).await.unwrap();
    }

    let pool = Arc::new(server.worker_pool());
    let workers = pool.spawn();
    assert_eq!(workers.len(), 2);

    for id in ids {
        let metadata = metadata.clone();
        wait_for(|| {
            let metadata = metadata.clone();
            async move {
                let image = metadata.get_image(id).await.unwrap().unwrap();
                image.status().unwrap() == AstrometryStatus::Solved
            }
        })
        .await;
    }

    // Finished steps are dropped by the watchdog without side effects
    server.state.task_registry.check_tasks().await;
    assert_eq!(server.state.task_registry.tracked().await, 0);

    for worker in workers {
        worker.abort();
    }
}

#[tokio::test]
async fn test_panicking_step_is_failed_by_watchdog() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let image_id = insert_image(metadata.as_ref(), &unique_path("/lights/panic")).await;
    server.solver.panic_on_job_status();
    server.state.workflow.request_solve(image_id, false).await.unwrap();

    let pool = Arc::new(server.worker_pool());
    let workers = pool.spawn();

    let solver = server.solver.clone();
    wait_for(|| {
        let solver = solver.clone();
        async move { solver.job_polls.load(Ordering::SeqCst) > 0 }
    })
    .await;

    // Let the panicked step finish unwinding before the sweep
    let registry = server.state.task_registry.clone();
    let metadata_check = metadata.clone();
    wait_for(|| {
        let registry = registry.clone();
        let metadata = metadata_check.clone();
        async move {
            registry.check_tasks().await;
            let image = metadata.get_image(image_id).await.unwrap().unwrap();
            image.status().unwrap() == AstrometryStatus::Failed
        }
    })
    .await;

    let task = &metadata.list_tasks_for_image(image_id).await.unwrap()[0];
    assert_eq!(task.state, "failed");
    assert_eq!(task.last_error.as_deref(), Some("task step panicked"));

    for worker in workers {
        worker.abort();
    }
}

#[tokio::test]
async fn test_reaper_fails_abandoned_submissions() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let abandoned = insert_image(metadata.as_ref(), &unique_path("/lights/reap")).await;
    let idle = insert_image(metadata.as_ref(), &unique_path("/lights/reap")).await;
    server.state.workflow.request_solve(abandoned, false).await.unwrap();

    let reaped = reaper::reap_once(metadata.as_ref(), Duration::from_secs(300))
        .await
        .unwrap();
    assert!(reaped.is_empty());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let reaped = reaper::reap_once(metadata.as_ref(), Duration::ZERO).await.unwrap();
    assert_eq!(reaped, vec![abandoned]);
    let image = metadata.get_image(abandoned).await.unwrap().unwrap();
    assert_eq!(image.status().unwrap(), AstrometryStatus::Failed);
    assert_eq!(
        metadata.get_image(idle).await.unwrap().unwrap().status().unwrap(),
        AstrometryStatus::None
    );

    // The orphaned monitor notices the image left flight and stops
    assert!(server.worker_pool().run_next().await);
    let task = &metadata.list_tasks_for_image(abandoned).await.unwrap()[0];
    assert_eq!(task.state, "done");
    assert_eq!(server.solver.submission_polls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_restart_recovers_running_monitor() {
    let server = TestServer::new().await;
    let metadata = server.metadata();
    let image_id = insert_image(metadata.as_ref(), &unique_path("/lights/restart")).await;
    server.state.workflow.request_solve(image_id, false).await.unwrap();

    // Simulate a crash after the monitor was claimed
    let claimed = metadata
        .claim_due_task(OffsetDateTime::now_utc())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.state, "running");
    assert!(!server.worker_pool().run_next().await);

    let recovered = metadata
        .recover_orphaned_tasks(OffsetDateTime::now_utc())
        .await
        .unwrap();
    assert_eq!(recovered, 1);

    server.settle(image_id).await;
    assert_eq!(
        metadata.get_image(image_id).await.unwrap().unwrap().status().unwrap(),
        AstrometryStatus::Solved
    );
}
