//! SCM Agent Library
//!
//! Serialized fetch, build and deploy of a site from source control, with
//! cross-process locking and coalesced redeploys.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod lock;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
