//! # streamsound-observability
//!
//! Observability-Crate fuer Streamsound:
//! - Structured Logging (text oder JSON) via tracing-subscriber
//! - Prometheus-kompatible Metriken fuer laufende Audio-Streams

pub mod logging;
pub mod metrics;

pub use logging::logging_initialisieren;
pub use metrics::StreamMetrics;
