//! Inbound API models for the SCM agent

pub mod models;
