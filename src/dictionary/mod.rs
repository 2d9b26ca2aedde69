//! Namespace dictionary subsystem.
//!
//! # Data Flow
//! ```text
//! server { namespace = radius }
//!     → cache.rs ensure("radius")
//!         hit:  upgrade the live weak reference
//!         miss: source.rs load → model.rs parse/validate → Arc<Dictionary>
//!     → handle owned by the virtual server
//!     → last handle dropped → dictionary freed
//! ```
//!
//! # Design Decisions
//! - One live dictionary per namespace, shared by every server using it
//! - Definitions are TOML; built-ins are embedded, a directory may override
//! - Enumerations stay extendable so sections can mint codes at bootstrap

pub mod cache;
pub mod model;
pub mod source;

pub use cache::{DictionaryCache, DictionaryHandle};
pub use model::{Attribute, AttributeKind, Dictionary, DictionaryError, DispatchSpec};
pub use source::{BuiltinSource, DictionarySource, DirectorySource, LayeredSource, StaticSource};
