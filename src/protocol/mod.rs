//! Protocol plugins.
//!
//! # Data Flow
//! ```text
//! listen section
//!     → loader.rs (namespace from enclosing server → proto_<namespace>)
//!     → registry.rs (ModuleResolver → factory → ProtocolModule)
//!     → hooks.rs (bootstrap / instantiate / open, each optional)
//! ```
//!
//! # Design Decisions
//! - Hooks are capabilities: a plugin opts in by returning itself from
//!   the matching accessor instead of implementing empty methods
//! - Only the open hook is async; it is the one that touches sockets

pub mod hooks;
pub mod loader;
pub mod registry;

pub use hooks::{
    BootstrapContext, BootstrapHook, HookError, InstantiateContext, InstantiateHook, OpenContext, OpenHook,
    ProtocolModule,
};
pub use loader::{LoadError, ModuleInstance, ProtocolLoader};
pub use registry::{
    process_name, ModuleConf, ModuleError, ModuleHandle, ModuleKind, ModuleRegistry, ModuleResolver, ProcessConf,
    ProcessFactory, ProtoFactory, ResolveError,
};
