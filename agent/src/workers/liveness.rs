//! Liveness marker for background deployments

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::filesys::file::File;
use crate::storage::settings::BackgroundSettings;

/// Liveness worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// How often the marker is rewritten
    pub interval: Duration,

    /// Tracking stops after this long and the marker is left stale
    pub max_tracked: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_tracked: Duration::from_secs(30 * 60),
        }
    }
}

impl Options {
    pub fn from_settings(settings: &BackgroundSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.liveness_interval_secs.max(1)),
            max_tracked: Duration::from_secs(settings.max_tracked_secs),
        }
    }
}

/// Rewrite `marker` with the start time every interval until
/// `max_tracked` has elapsed.
///
/// Returns when tracking times out. The marker then keeps its last
/// modification time so a watchdog can see the task ran too long.
pub async fn run<S, F>(options: &Options, marker: &File, started: DateTime<Utc>, sleep_fn: S)
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let content = started.to_rfc3339();
    let mut tracked = Duration::ZERO;

    loop {
        if let Err(e) = marker.write_string(&content).await {
            warn!(error = %e, "Unable to refresh pending operation marker");
        }
        if tracked >= options.max_tracked {
            warn!(
                started = %content,
                "Background operation exceeded {:?}, leaving marker stale",
                options.max_tracked
            );
            return;
        }
        sleep_fn(options.interval).await;
        tracked += options.interval;
    }
}

/// Counts in-flight background operations and keeps their liveness marker
#[derive(Clone)]
pub struct PendingOperations {
    inner: Arc<Inner>,
}

struct Inner {
    marker: File,
    options: Options,
    count: AtomicUsize,
    idle: Notify,
}

impl PendingOperations {
    pub fn new(marker: File, options: Options) -> Self {
        Self {
            inner: Arc::new(Inner {
                marker,
                options,
                count: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    pub fn marker(&self) -> &File {
        &self.inner.marker
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    /// Run `task` while refreshing the liveness marker.
    ///
    /// The marker is deleted once the last tracked task completes, unless
    /// tracking timed out first.
    pub async fn track<T, Fut, S, F>(&self, sleep_fn: S, task: Fut) -> T
    where
        Fut: Future<Output = T>,
        S: Fn(Duration) -> F,
        F: Future<Output = ()>,
    {
        let started = Utc::now();
        self.inner.count.fetch_add(1, Ordering::SeqCst);
        debug!(pending = self.count(), "Background operation started");

        let liveness = run(&self.inner.options, &self.inner.marker, started, sleep_fn);
        tokio::pin!(task);
        tokio::pin!(liveness);

        let (output, timed_out) = tokio::select! {
            output = &mut task => (output, false),
            _ = &mut liveness => ((&mut task).await, true),
        };

        if self.inner.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            if !timed_out {
                if let Err(e) = self.inner.marker.delete().await {
                    warn!(error = %e, "Unable to delete pending operation marker");
                }
            }
            self.inner.idle.notify_waiters();
        }
        info!(timed_out, "Background operation finished");
        output
    }

    /// Wait until no operation is in flight. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.inner.idle.notified();
                if self.count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }
}
