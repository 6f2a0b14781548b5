pub mod actor;
pub mod metrics;

pub use actor::actor_middleware;
pub use metrics::metrics_middleware;
