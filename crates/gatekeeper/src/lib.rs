pub mod adapter;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod errors;
pub mod idempotency;
pub mod metrics;
pub mod policy;
pub mod proxy;
pub mod ratelimit;
pub mod retry;
pub mod secrets;
pub mod store;
pub mod telemetry;
pub mod token;

pub use config::Config;
pub use errors::{ErrorKind, GatewayError};
pub use proxy::{GatewayState, admin_router, api_router, router};
