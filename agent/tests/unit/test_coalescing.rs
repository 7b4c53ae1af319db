//! Redeploy behaviour: coalesced triggers and idempotent CI redeploys

use std::sync::Arc;

use scm_agent::deploy::fetch::FetchDeploymentRequestResult;
use scm_agent::deploy::status::DeploymentStatus;
use scm_agent::models::deployment::ChangeSet;
use scm_agent::storage::settings::Settings;

use crate::support::{request, FakeFetcher, TestSite};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deferred_triggers_coalesce_into_one_redeploy() {
    let mut site = TestSite::gated(Settings::default()).await;
    let fetcher = Arc::new(FakeFetcher::default());
    site.repository.set_head("c1");

    let first = site.manager().await;
    let running = {
        let first = first.clone();
        let request = request(&fetcher).reusable(true);
        tokio::spawn(async move { first.fetch_deploy(request, false, "master").await })
    };
    assert_eq!(site.next_started().await, "c1");

    // Two more pushes land while c1 is building
    let second = site.manager().await;
    site.repository.set_head("c2");
    let result = second
        .fetch_deploy(request(&fetcher).allow_deferred(true), false, "master")
        .await
        .unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::Pending);

    site.repository.set_head("c3");
    let result = second
        .fetch_deploy(request(&fetcher).allow_deferred(true), false, "master")
        .await
        .unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::Pending);

    site.deployer.gate.add_permits(1);
    assert_eq!(site.next_started().await, "c3");
    site.deployer.gate.add_permits(1);

    let result = running.await.unwrap().unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::RanSynchronously);
    assert_eq!(site.deployer.deployed(), vec!["c1", "c3"]);
    assert_eq!(fetcher.count(), 2);
    assert_eq!(
        first.status().active_deployment_id().await.unwrap().as_deref(),
        Some("c3")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_non_reusable_request_runs_once() {
    let mut site = TestSite::gated(Settings::default()).await;
    let fetcher = Arc::new(FakeFetcher::default());
    site.repository.set_head("c1");

    let first = site.manager().await;
    let running = {
        let first = first.clone();
        let request = request(&fetcher);
        tokio::spawn(async move { first.fetch_deploy(request, false, "master").await })
    };
    assert_eq!(site.next_started().await, "c1");

    let second = site.manager().await;
    site.repository.set_head("c2");
    let result = second
        .fetch_deploy(request(&fetcher).allow_deferred(true), false, "master")
        .await
        .unwrap();
    assert_eq!(result, FetchDeploymentRequestResult::Pending);

    site.deployer.gate.add_permits(1);
    running.await.unwrap().unwrap();
    assert_eq!(site.deployer.deployed(), vec!["c1"]);
    assert_eq!(fetcher.count(), 1);
}

#[tokio::test]
async fn test_repeated_continuous_trigger_is_a_no_op() {
    let site = TestSite::new(Settings::default()).await;
    let fetcher = Arc::new(FakeFetcher::default());
    let manager = site.manager().await;
    site.repository.set_head("c1");

    assert!(manager.locks().deployment().lock("tests"));

    manager
        .perform_deployment(request(&fetcher).continuous(true), "main", None)
        .await
        .unwrap();
    let record = manager.status().open("c1").await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Success);
    assert_eq!(
        manager.status().active_deployment_id().await.unwrap().as_deref(),
        Some("c1")
    );

    // Same trigger again: fetched, not rebuilt
    manager
        .perform_deployment(request(&fetcher).continuous(true), "main", None)
        .await
        .unwrap();
    assert_eq!(fetcher.count(), 2);
    assert_eq!(site.deployer.deployed(), vec!["c1"]);
    assert_eq!(manager.status().list().await.unwrap().len(), 1);

    let changeset = ChangeSet::new("C1");
    let again = request(&fetcher).continuous(true);
    assert!(!manager.should_deploy(&again, &changeset).await.unwrap());
    assert!(manager.should_deploy(&request(&fetcher), &changeset).await.unwrap());

    manager.locks().deployment().release();
}
