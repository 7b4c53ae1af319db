//! Git-backed repository and fetcher

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::{debug, info};

use crate::deploy::repository::{Repository, RepositoryFactory};
use crate::deploy::request::{DeploymentRequest, FetchOutcome, Fetcher};
use crate::errors::AgentError;
use crate::models::deployment::ChangeSet;

/// Lock git leaves behind when a command dies mid-write
const INDEX_LOCK: &str = ".git/index.lock";

/// Output of a finished git command
struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

async fn git(dir: &Path, args: &[&str]) -> Result<GitOutput, AgentError> {
    debug!("git {} (in {})", args.join(" "), dir.display());
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .await
        .map_err(|e| AgentError::FetchError(format!("Failed to run git {}: {}", args[0], e)))?;

    Ok(GitOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

async fn git_checked(dir: &Path, args: &[&str]) -> Result<String, AgentError> {
    let output = git(dir, args).await?;
    if !output.success {
        return Err(AgentError::FetchError(format!(
            "git {} failed: {}",
            args[0],
            output.stderr.trim()
        )));
    }
    Ok(output.stdout)
}

/// The remote does not have the requested branch
fn is_missing_remote_ref(stderr: &str) -> bool {
    stderr.contains("couldn't find remote ref")
}

/// The revision does not exist locally
fn is_unknown_revision(stderr: &str) -> bool {
    stderr.contains("unknown revision")
        || stderr.contains("bad revision")
        || stderr.contains("ambiguous argument")
}

/// Parse `git log -1 --format=%H%x00%an%x00%ae%x00%s%x00%cI`
fn parse_change_set(line: &str) -> Option<ChangeSet> {
    let mut fields = line.trim_end_matches('\n').split('\0');
    let id = fields.next().filter(|id| !id.is_empty())?;
    let author = fields.next().unwrap_or_default();
    let email = fields.next().unwrap_or_default();
    let message = fields.next().unwrap_or_default();
    let timestamp = fields
        .next()
        .and_then(|t| DateTime::parse_from_rfc3339(t.trim()).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let mut changeset = ChangeSet::new(id)
        .with_author(author, (!email.is_empty()).then(|| email.to_string()))
        .with_message(message);
    changeset.timestamp = timestamp;
    Some(changeset)
}

/// Working tree managed with the git CLI
#[derive(Debug, Clone)]
pub struct GitRepository {
    path: PathBuf,
}

impl GitRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn exists(&self) -> bool {
        self.path.join(".git").exists()
    }

    async fn init(&self) -> Result<(), AgentError> {
        tokio::fs::create_dir_all(&self.path).await?;
        git_checked(&self.path, &["init", "--quiet"]).await?;
        info!("Initialized repository at {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl Repository for GitRepository {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn get_change_set(&self, reference: &str) -> Result<Option<ChangeSet>, AgentError> {
        let output = git(
            &self.path,
            &["log", "-1", "--format=%H%x00%an%x00%ae%x00%s%x00%cI", reference, "--"],
        )
        .await?;
        if !output.success {
            if is_unknown_revision(&output.stderr) {
                return Ok(None);
            }
            return Err(AgentError::FetchError(format!(
                "git log failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(parse_change_set(&output.stdout))
    }

    fn clear_lock(&self) -> Result<bool, AgentError> {
        match std::fs::remove_file(self.path.join(INDEX_LOCK)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Opens the site's repository directory
pub struct GitRepositoryFactory {
    dir: PathBuf,
}

impl GitRepositoryFactory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl RepositoryFactory for GitRepositoryFactory {
    fn repository(&self) -> Option<Arc<dyn Repository>> {
        let repository = GitRepository::new(&self.dir);
        repository
            .exists()
            .then(|| Arc::new(repository) as Arc<dyn Repository>)
    }

    async fn ensure_repository(&self) -> Result<Arc<dyn Repository>, AgentError> {
        let repository = GitRepository::new(&self.dir);
        if !repository.exists() {
            repository.init().await?;
        }
        Ok(Arc::new(repository))
    }
}

/// Fetches a branch from the request's remote and checks it out
pub struct GitFetcher;

#[async_trait]
impl Fetcher for GitFetcher {
    async fn fetch(
        &self,
        repository: &dyn Repository,
        request: &DeploymentRequest,
        target_branch: &str,
    ) -> Result<FetchOutcome, AgentError> {
        let url = request
            .repository_url
            .as_deref()
            .ok_or_else(|| AgentError::FetchError("no repository url configured".to_string()))?;
        let dir = repository.path();
        info!("Fetching {} (branch: {})", url, target_branch);

        let refspec = format!("refs/heads/{}", target_branch);
        let output = git(dir, &["fetch", "--quiet", url, &refspec]).await?;
        if !output.success {
            if is_missing_remote_ref(&output.stderr) {
                return Ok(FetchOutcome::NoChanges {
                    reason: format!("branch '{}' not found", target_branch),
                });
            }
            return Err(AgentError::FetchError(format!(
                "git fetch failed: {}",
                output.stderr.trim()
            )));
        }

        git_checked(dir, &["checkout", "--quiet", "--force", "-B", target_branch, "FETCH_HEAD"]).await?;
        if let Some(commit_id) = request.commit_id.as_deref() {
            git_checked(dir, &["reset", "--quiet", "--hard", commit_id]).await?;
        }
        if request.clean {
            git_checked(dir, &["clean", "-fdx", "--quiet"]).await?;
        }

        info!("Successfully fetched {}", target_branch);
        Ok(FetchOutcome::Fetched)
    }
}
