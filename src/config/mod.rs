//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, split settings from server declarations)
//!     → validation.rs (semantic checks on settings)
//!     → Settings (typed, immutable)
//!     → ConfigTree (generic sections/pairs, read-only to the orchestrator)
//! ```
//!
//! # Design Decisions
//! - The tree is owned by the caller; servers only hold `SectionId`s into it
//! - All settings have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod tree;
pub mod validation;

pub use loader::{load_config, LoadedConfig};
pub use schema::{AdminConfig, DictionaryConfig, ObservabilityConfig, Settings};
pub use tree::{ConfigTree, Location, Pair, Section, SectionId};
