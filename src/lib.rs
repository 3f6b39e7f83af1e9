//! Signup Orchestrator
//!
//! This library provides the core functionality for the signup-orchestrator
//! system, which schedules, supervises, and recovers unattended browser
//! signup jobs against a durable SQLite job store.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod worker;
