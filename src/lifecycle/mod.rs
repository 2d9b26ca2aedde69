//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Settings → Services → bootstrap → instantiate → open
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → admin API stops → sockets closed
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger shutdown
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and the process exits
//! - Check mode stops after instantiate, so nothing is ever bound

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
