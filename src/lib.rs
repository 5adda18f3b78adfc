//! Terraform workspace lifecycle for CI/CD pipelines.
//!
//! Stages an ephemeral workspace, drives `terraform` through init, plan,
//! apply, show and output, and packs the planned workspace into a versioned
//! archive so plan and apply can run as separate pipeline jobs.
pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod orchestrator;
pub mod runner;
pub mod workflow;
pub mod workspace;
