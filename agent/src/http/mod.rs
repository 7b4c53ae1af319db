//! HTTP client for the hosting platform

pub mod client;
pub mod deployments;
