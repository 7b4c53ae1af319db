//! Deployment status records shared between managers

use std::sync::Arc;

use tokio_test::{assert_err, assert_ok};

use scm_agent::deploy::status::DeploymentStatus;
use scm_agent::models::deployment::ChangeSet;
use scm_agent::storage::settings::Settings;

use crate::support::{request, FakeFetcher, TestSite};

#[tokio::test]
async fn test_records_visible_across_managers() {
    let site = TestSite::new(Settings::default()).await;
    let writer = site.manager().await;
    let reader = site.manager().await;

    let changeset = ChangeSet::new("c1").with_author("dev", Some("dev@example.com".to_string()));
    writer.status().create(&changeset, "tests", "Received").await.unwrap();
    writer
        .status()
        .advance("c1", DeploymentStatus::Building, "Building")
        .await
        .unwrap();

    let record = reader.status().open("c1").await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Building);
    assert_eq!(record.author_email.as_deref(), Some("dev@example.com"));
}

#[tokio::test]
async fn test_finished_records_cannot_regress() {
    let site = TestSite::new(Settings::default()).await;
    let fetcher = Arc::new(FakeFetcher::default());
    let manager = site.manager().await;
    site.repository.set_head("c1");

    manager
        .fetch_deploy(request(&fetcher), false, "master")
        .await
        .unwrap();

    let status = manager.status();
    assert_err!(status.advance("c1", DeploymentStatus::Building, "again").await);
    let record = status.open("c1").await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Success);
    assert!(record.complete);
    assert!(record.end_time.is_some());
}

#[tokio::test]
async fn test_status_write_fails_fast_on_held_status_lock() {
    let site = TestSite::new(Settings {
        status_lock_timeout_secs: 0,
        ..Settings::default()
    })
    .await;
    let manager = site.manager().await;
    let holder = site.env.open_locks();
    assert!(holder.status().lock("another process"));

    let result = manager
        .status()
        .create(&ChangeSet::new("c1"), "tests", "Received")
        .await;
    assert!(result.is_err_and(|e| e.is_lock_contention()));

    holder.status().release();
    assert_ok!(
        manager
            .status()
            .create(&ChangeSet::new("c1"), "tests", "Received")
            .await
    );
}
