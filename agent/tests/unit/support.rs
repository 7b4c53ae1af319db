//! Shared fakes for pipeline tests

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};

use scm_agent::deploy::deployer::{DeployContext, Deployer};
use scm_agent::deploy::environment::DeploymentEnvironment;
use scm_agent::deploy::fetch::FetchDeploymentManager;
use scm_agent::deploy::notifier::PostDeploymentNotifier;
use scm_agent::deploy::repository::{Repository, RepositoryFactory};
use scm_agent::deploy::request::{DeploymentRequest, FetchOutcome, Fetcher};
use scm_agent::errors::AgentError;
use scm_agent::models::deployment::ChangeSet;
use scm_agent::storage::layout::SiteLayout;
use scm_agent::storage::settings::Settings;
use scm_agent::workers::liveness::{Options, PendingOperations};

const BRANCHES: [&str; 2] = ["master", "main"];

/// Repository whose branch head is set by the test
pub struct FakeRepository {
    path: PathBuf,
    head: Mutex<Option<String>>,
}

impl FakeRepository {
    pub fn set_head(&self, id: &str) {
        *self.head.lock().unwrap() = Some(id.to_string());
    }
}

#[async_trait]
impl Repository for FakeRepository {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn get_change_set(&self, reference: &str) -> Result<Option<ChangeSet>, AgentError> {
        let head = self.head.lock().unwrap().clone();
        Ok(match head {
            Some(id) if BRANCHES.contains(&reference) || reference.eq_ignore_ascii_case(&id) => {
                Some(ChangeSet::new(id).with_author("dev", None).with_message("change"))
            }
            _ => None,
        })
    }

    fn clear_lock(&self) -> Result<bool, AgentError> {
        Ok(false)
    }
}

pub struct FakeRepositoryFactory {
    pub repository: Arc<FakeRepository>,
}

#[async_trait]
impl RepositoryFactory for FakeRepositoryFactory {
    fn repository(&self) -> Option<Arc<dyn Repository>> {
        Some(self.repository.clone() as Arc<dyn Repository>)
    }

    async fn ensure_repository(&self) -> Result<Arc<dyn Repository>, AgentError> {
        Ok(self.repository.clone() as Arc<dyn Repository>)
    }
}

/// Counts fetches. Fails when `fail` is set.
#[derive(Default)]
pub struct FakeFetcher {
    pub fetches: AtomicUsize,
    pub fail: bool,
    pub no_changes: bool,
}

impl FakeFetcher {
    pub fn count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(
        &self,
        _repository: &dyn Repository,
        _request: &DeploymentRequest,
        _target_branch: &str,
    ) -> Result<FetchOutcome, AgentError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AgentError::FetchError("remote unreachable".to_string()));
        }
        if self.no_changes {
            return Ok(FetchOutcome::NoChanges {
                reason: "branch missing".to_string(),
            });
        }
        Ok(FetchOutcome::Fetched)
    }
}

/// Records deployed revisions. Each deploy waits for a permit from `gate`.
pub struct RecordingDeployer {
    pub deployed: Mutex<Vec<String>>,
    pub gate: Arc<Semaphore>,
    pub started: mpsc::UnboundedSender<String>,
    pub fail: bool,
}

impl RecordingDeployer {
    pub fn deployed(&self) -> Vec<String> {
        self.deployed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Deployer for RecordingDeployer {
    async fn deploy(&self, context: DeployContext) -> Result<(), AgentError> {
        let _ = self.started.send(context.changeset.id.clone());
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| AgentError::Internal(e.to_string()))?;
        permit.forget();
        if self.fail {
            return Err(AgentError::DeployError("build failed".to_string()));
        }
        self.deployed.lock().unwrap().push(context.changeset.id.clone());
        Ok(())
    }
}

/// One site on a temporary directory, wired with fakes
pub struct TestSite {
    _dir: tempfile::TempDir,
    pub env: Arc<DeploymentEnvironment>,
    pub repository: Arc<FakeRepository>,
    pub deployer: Arc<RecordingDeployer>,
    pub started: mpsc::UnboundedReceiver<String>,
}

impl TestSite {
    /// Deploys pass straight through the gate
    pub async fn new(settings: Settings) -> Self {
        Self::build(settings, false, Semaphore::MAX_PERMITS).await
    }

    /// Deploys block until the test adds permits to the gate
    pub async fn gated(settings: Settings) -> Self {
        Self::build(settings, false, 0).await
    }

    pub async fn failing(settings: Settings) -> Self {
        Self::build(settings, true, Semaphore::MAX_PERMITS).await
    }

    async fn build(settings: Settings, fail: bool, permits: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = SiteLayout::new(dir.path());
        layout.setup().await.unwrap();

        let repository = Arc::new(FakeRepository {
            path: dir.path().join("repository"),
            head: Mutex::new(None),
        });
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        let deployer = Arc::new(RecordingDeployer {
            deployed: Mutex::new(Vec::new()),
            gate: Arc::new(Semaphore::new(permits)),
            started: started_tx,
            fail,
        });
        let pending_operations = PendingOperations::new(
            layout.pending_operation_file(),
            Options {
                interval: Duration::from_millis(50),
                max_tracked: Duration::from_secs(60),
            },
        );

        let env = Arc::new(DeploymentEnvironment {
            layout,
            settings,
            repository_factory: Arc::new(FakeRepositoryFactory {
                repository: repository.clone(),
            }),
            deployer: deployer.clone(),
            notifier: Arc::new(PostDeploymentNotifier::disabled()),
            pending_operations,
        });

        Self {
            _dir: dir,
            env,
            repository,
            deployer,
            started: started_rx,
        }
    }

    pub async fn manager(&self) -> Arc<FetchDeploymentManager> {
        Arc::new(self.env.build_manager().await.unwrap())
    }

    /// Wait for the next deploy to reach the deployer
    pub async fn next_started(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.started.recv())
            .await
            .expect("deploy did not start")
            .expect("deployer gone")
    }

    pub async fn wait_background_idle(&self) {
        assert!(
            self.env
                .pending_operations
                .wait_idle(Duration::from_secs(5))
                .await,
            "background deployment did not finish"
        );
    }
}

pub fn request(fetcher: &Arc<FakeFetcher>) -> DeploymentRequest {
    DeploymentRequest::new("tests", fetcher.clone() as Arc<dyn Fetcher>)
}
