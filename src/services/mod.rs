pub mod dispatcher;
pub mod driver;
pub mod health_sampler;
pub mod heartbeat;
pub mod rate_limit;
pub mod sweeper;
pub mod verification;
