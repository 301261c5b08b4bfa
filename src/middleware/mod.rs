pub mod metrics;
pub mod rate_limit;

pub use metrics::MetricsMiddleware;
pub use rate_limit::RateLimit;
