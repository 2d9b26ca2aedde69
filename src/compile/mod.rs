//! Namespace compilers.
//!
//! # Data Flow
//! ```text
//! protocol bootstrap hook
//!     → registry.rs (namespace → CompileFn, last writer wins)
//! orchestrator instantiate
//!     → registry lookup by server namespace
//!     → context.rs (CompileContext: compile well-known sections)
//!     → CompiledPolicies stored on the virtual server
//! ```
//!
//! A namespace without a compiler is not an error; its servers simply
//! have no compiled policies and every non-`listen` subsection is
//! reported as unused.

pub mod context;
pub mod registry;

pub use context::{
    define_section_values, CompileContext, CompileError, CompiledPolicies, CompiledPolicy, SectionName, SectionSpec,
};
pub use registry::{CompileFn, CompilerRegistry, RegistryError};
