//! Deployment orchestration

pub mod auto_swap;
pub mod background;
pub mod deployer;
pub mod environment;
pub mod fetch;
pub mod git;
pub mod marker;
pub mod notifier;
pub mod repository;
pub mod request;
pub mod script;
pub mod status;
pub mod status_manager;
