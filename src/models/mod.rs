pub mod api;
pub mod error_log;
pub mod health;
pub mod heartbeat;
pub mod job;
pub mod log;
