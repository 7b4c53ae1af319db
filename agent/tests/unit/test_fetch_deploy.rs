//! Trigger handling: rejection, deferral, background runs and failures

use std::sync::Arc;
use std::time::Duration;

use scm_agent::deploy::auto_swap::AutoSwapHandler;
use scm_agent::deploy::fetch::FetchDeploymentRequestResult;
use scm_agent::deploy::status::DeploymentStatus;
use scm_agent::storage::settings::Settings;

use crate::support::{request, FakeFetcher, TestSite};

#[tokio::test]
async fn test_scm_disabled_is_forbidden() {
    let site = TestSite::new(Settings {
        scm_enabled: false,
        ..Settings::default()
    })
    .await;
    let fetcher = Arc::new(FakeFetcher::default());
    let manager = site.manager().await;

    let result = manager
        .fetch_deploy(request(&fetcher), false, "master")
        .await
        .unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::ForbiddenScmDisabled);
    assert_eq!(fetcher.count(), 0);

    site.repository.set_head("c1");
    let result = manager
        .fetch_deploy(request(&fetcher).allow_while_scm_disabled(true), false, "master")
        .await
        .unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::RanSynchronously);
}

#[tokio::test]
async fn test_remote_package_conflicts_unless_overridden() {
    let site = TestSite::new(Settings {
        run_from_package: Some("https://storage/site.zip".to_string()),
        ..Settings::default()
    })
    .await;
    let fetcher = Arc::new(FakeFetcher::default());
    let manager = site.manager().await;
    site.repository.set_head("c1");

    let result = manager
        .fetch_deploy(request(&fetcher), false, "master")
        .await
        .unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::ConflictRunFromRemoteZipConfigured);

    let result = manager
        .fetch_deploy(request(&fetcher).override_run_from_package(true), false, "master")
        .await
        .unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::RanSynchronously);
    assert_eq!(site.deployer.deployed(), vec!["c1"]);
}

#[tokio::test]
async fn test_held_lock_defers_or_rejects() {
    let site = TestSite::new(Settings::default()).await;
    let fetcher = Arc::new(FakeFetcher::default());
    let manager = site.manager().await;

    let holder = site.env.open_locks();
    assert!(holder.deployment().lock("another process"));

    let before = manager.marker().last_modified().await.unwrap();
    let result = manager
        .fetch_deploy(request(&fetcher), false, "master")
        .await
        .unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::ConflictDeploymentInProgress);
    assert_eq!(manager.marker().last_modified().await.unwrap(), before);

    let result = manager
        .fetch_deploy(request(&fetcher).allow_deferred(true), false, "master")
        .await
        .unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::Pending);
    assert_ne!(manager.marker().last_modified().await.unwrap(), before);
    assert_eq!(fetcher.count(), 0);

    holder.deployment().release();
}

#[tokio::test]
async fn test_continuous_redeploy_of_active_revision_is_skipped() {
    let site = TestSite::new(Settings::default()).await;
    let fetcher = Arc::new(FakeFetcher::default());
    let manager = site.manager().await;
    site.repository.set_head("abc123");

    let result = manager
        .fetch_deploy(request(&fetcher).continuous(true), false, "master")
        .await
        .unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::RunningAsynchronously);
    site.wait_background_idle().await;
    assert_eq!(site.deployer.deployed(), vec!["abc123"]);

    // Same webhook delivered again
    let result = manager
        .fetch_deploy(request(&fetcher).continuous(true), false, "master")
        .await
        .unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::RunningAsynchronously);
    site.wait_background_idle().await;

    assert_eq!(fetcher.count(), 2);
    assert_eq!(site.deployer.deployed(), vec!["abc123"]);
    let records = manager.status().list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "abc123");
}

#[tokio::test]
async fn test_background_run_against_held_lock() {
    let site = TestSite::new(Settings::default()).await;
    let fetcher = Arc::new(FakeFetcher::default());
    let manager = site.manager().await;
    let holder = site.env.open_locks();
    assert!(holder.deployment().lock("another process"));

    let result = manager
        .fetch_deploy(request(&fetcher), true, "master")
        .await
        .unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::ConflictDeploymentInProgress);
    site.wait_background_idle().await;
    assert!(manager.status().list().await.unwrap().is_empty());

    let before = manager.marker().last_modified().await.unwrap();
    let result = manager
        .fetch_deploy(request(&fetcher).allow_deferred(true), true, "master")
        .await
        .unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::RunningAsynchronously);
    let mut touched = false;
    for _ in 0..100 {
        if manager.marker().last_modified().await.unwrap() != before {
            touched = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(touched);
    site.wait_background_idle().await;

    assert_eq!(fetcher.count(), 0);
    assert!(manager.status().list().await.unwrap().is_empty());
    holder.deployment().release();
}

/// Replace the status record directory with a regular file
fn break_status_storage(site: &TestSite) {
    let deployments = site.env.layout.deployments_dir();
    std::fs::remove_dir_all(deployments.path()).unwrap();
    std::fs::write(deployments.path(), b"").unwrap();
}

#[tokio::test]
async fn test_background_failure_before_locking_is_an_error() {
    let site = TestSite::new(Settings::default()).await;
    let fetcher = Arc::new(FakeFetcher::default());
    let manager = site.manager().await;
    break_status_storage(&site);

    let result = manager.fetch_deploy(request(&fetcher), true, "master").await;
    assert!(result.is_err());
    site.wait_background_idle().await;

    assert_eq!(fetcher.count(), 0);
    assert!(!manager.locks().deployment().is_held());
}

#[tokio::test]
async fn test_wait_for_placeholder_returns_once_it_is_listed() {
    let site = TestSite::gated(Settings::default()).await;
    let fetcher = Arc::new(FakeFetcher::default());
    let manager = site.manager().await;
    site.repository.set_head("c1");

    let result = manager
        .fetch_deploy(
            request(&fetcher).allow_deferred(true).wait_for_temp_deployment(true),
            true,
            "master",
        )
        .await
        .unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::RunningAsynchronously);
    let records = manager.status().list().await.unwrap();
    assert!(records.iter().any(|record| record.is_temporary));

    site.deployer.gate.add_permits(1);
    site.wait_background_idle().await;
    assert_eq!(site.deployer.deployed(), vec!["c1"]);
    let records = manager.status().list().await.unwrap();
    assert!(records.iter().all(|record| !record.is_temporary));
}

#[tokio::test]
async fn test_wait_for_placeholder_ends_when_task_fails_first() {
    let site = TestSite::new(Settings::default()).await;
    let fetcher = Arc::new(FakeFetcher::default());
    let manager = site.manager().await;
    break_status_storage(&site);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        manager.fetch_deploy(
            request(&fetcher).allow_deferred(true).wait_for_temp_deployment(true),
            true,
            "master",
        ),
    )
    .await
    .unwrap();
    assert!(result.is_err());
    assert_eq!(fetcher.count(), 0);
}

#[tokio::test]
async fn test_failed_build_keeps_real_record() {
    let site = TestSite::failing(Settings::default()).await;
    let fetcher = Arc::new(FakeFetcher::default());
    let manager = site.manager().await;
    site.repository.set_head("c1");

    let result = manager.fetch_deploy(request(&fetcher), false, "master").await;
    assert!(result.is_err());

    let records = manager.status().list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "c1");
    assert_eq!(records[0].status, DeploymentStatus::Failed);
    assert!(!records[0].is_temporary);
    assert_eq!(manager.status().active_deployment_id().await.unwrap(), None);

    // The lock is free again
    assert!(!manager.locks().deployment().is_held());
}

#[tokio::test]
async fn test_failed_fetch_keeps_placeholder() {
    let site = TestSite::new(Settings::default()).await;
    let fetcher = Arc::new(FakeFetcher {
        fail: true,
        ..FakeFetcher::default()
    });
    let manager = site.manager().await;

    let result = manager.fetch_deploy(request(&fetcher), false, "master").await;
    assert!(result.is_err());

    let records = manager.status().list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].is_temporary);
    assert!(records[0].id.starts_with("temp-"));
    assert_eq!(records[0].status, DeploymentStatus::Failed);
}

#[tokio::test]
async fn test_missing_branch_deploys_nothing() {
    let site = TestSite::new(Settings::default()).await;
    let fetcher = Arc::new(FakeFetcher {
        no_changes: true,
        ..FakeFetcher::default()
    });
    let manager = site.manager().await;

    let result = manager
        .fetch_deploy(request(&fetcher), false, "master")
        .await
        .unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::RanSynchronously);
    assert!(site.deployer.deployed().is_empty());
    assert!(manager.status().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_auto_swap_blocks_foreground_and_follows_success() {
    let settings = Settings {
        auto_swap_slot: Some("staging".to_string()),
        ..Settings::default()
    };
    let site = TestSite::new(settings.clone()).await;
    let fetcher = Arc::new(FakeFetcher::default());
    let manager = site.manager().await;
    let handler = AutoSwapHandler::new(&site.env.layout, &settings, None);
    site.repository.set_head("c1");

    let result = manager
        .fetch_deploy(request(&fetcher), false, "master")
        .await
        .unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::RanSynchronously);
    assert!(handler.is_auto_swap_ongoing().await.unwrap());

    let result = manager
        .fetch_deploy(request(&fetcher), false, "master")
        .await
        .unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::ConflictAutoSwapOngoing);
    assert_eq!(fetcher.count(), 1);
}

#[tokio::test]
async fn test_queued_request_waits_for_lock() {
    let site = TestSite::new(Settings::default()).await;
    let fetcher = Arc::new(FakeFetcher::default());
    let manager = site.manager().await;
    site.repository.set_head("c1");

    let holder = site.env.open_locks();
    assert!(holder.deployment().lock("another process"));

    let queued = {
        let manager = manager.clone();
        let request = request(&fetcher);
        tokio::spawn(async move { manager.queue_deploy(request, "master").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!queued.is_finished());
    assert_eq!(fetcher.count(), 0);

    holder.deployment().release();
    let result = tokio::time::timeout(Duration::from_secs(5), queued)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::RanSynchronously);
    assert_eq!(site.deployer.deployed(), vec!["c1"]);
}
