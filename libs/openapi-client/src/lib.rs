//! Outbound notification models for the SCM agent

pub mod models;
