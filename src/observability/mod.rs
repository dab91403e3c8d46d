//! Observability: structured logging setup and per-client metrics

pub mod logging;
pub mod metrics;

pub use logging::{build_filter, init_default_logging, init_logging, parse_level, LogFormat};
pub use metrics::{
    assess_connection_quality, ClientStats, ConnectionMetrics, ConnectionQuality,
    PerformanceMetrics,
};

pub use logging::connection_span;
