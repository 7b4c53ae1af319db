//! Server state

use std::sync::Arc;

use crate::deploy::fetch::FetchDeploymentManager;
use crate::deploy::request::Fetcher;

/// Server state shared across handlers
pub struct ServerState {
    pub manager: Arc<FetchDeploymentManager>,
    pub fetcher: Arc<dyn Fetcher>,
}

impl ServerState {
    pub fn new(manager: Arc<FetchDeploymentManager>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { manager, fetcher }
    }
}
