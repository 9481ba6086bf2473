#![forbid(unsafe_code)]

//! Session and streaming-protocol engine for stream-json coding-agent CLIs.
//!
//! The agent runs as a long-lived child process that reads newline-delimited
//! JSON requests on stdin and writes newline-delimited JSON events on stdout.
//! This crate decodes that stream, drives request/response turns over it,
//! drains the agent's stderr, and manages the session records and
//! workspaces that outlive individual processes.

pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod runtime;
pub mod stream;

pub use config::BoxConfig;
pub use errors::{AppError, Result};
