//! Virtual server orchestration core.

pub mod admin;
pub mod compile;
pub mod config;
pub mod dictionary;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod protocols;
pub mod server;

pub use config::{ConfigTree, Settings};
pub use lifecycle::Shutdown;
pub use server::{Orchestrator, Services, StartupError};
