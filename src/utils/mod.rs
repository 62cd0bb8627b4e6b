//! # Utility Modules
//!
//! Supporting utilities for compression negotiation, logging, metrics and time.
//!
//! ## Components
//! - **Compression**: algorithm identifiers and threshold negotiation
//! - **Logging**: tracing-subscriber initialisation from configuration
//! - **Metrics**: atomic relay counters
//! - **Time**: unix seconds and Windows FILETIME helpers

pub mod compression;
pub mod logging;
pub mod metrics;
pub mod time;

pub use compression::{CompressionAlgorithm, CompressionSettings};
pub use metrics::{MetricsSnapshot, RelayMetrics};
