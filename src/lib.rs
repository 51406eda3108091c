pub mod ai;
pub mod auth;
pub mod backoff;
pub mod clarification;
pub mod config;
pub mod db;
pub mod enhancer;
pub mod errors;
pub mod fingerprint;
pub mod init;
pub mod logging;
pub mod narrative;
pub mod questions;
pub mod server;
pub mod service;
pub mod templates;
pub mod workflow;
