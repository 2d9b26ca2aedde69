//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Log level comes from `RUST_LOG` first, then the config file
//! - Metric updates are no-ops until a recorder is installed, so library
//!   users and tests never need to set one up

pub mod logging;
pub mod metrics;
