//! Virtual server orchestration.
//!
//! # Data Flow
//! ```text
//! ConfigTree
//!     → orchestrator.rs bootstrap
//!         namespace check (all servers) → dictionary cache → protocol loader
//!         → plugin bootstrap hooks (compiler registration)
//!     → orchestrator.rs instantiate
//!         namespace compiler → dispatch.rs table → plugin instantiate hooks
//!         → unused-section warnings
//!     → orchestrator.rs open
//!         plugin open hooks → conflict index → scheduler
//! ```
//!
//! # Design Decisions
//! - A phase runs to completion across every server before the next one
//!   starts; nothing is opened unless every server instantiated
//! - A failed open does not close the listeners opened before it; the
//!   caller exits the process
//! - After startup the orchestrator is only read, so it is shared behind
//!   an `Arc` without further locking

pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod state;
pub mod virtual_server;

pub use dispatch::{DispatchBuildError, DispatchError, DispatchTable, ProcessHandler, Rcode, Request};
pub use error::{ErrorKind, HookPhase, StartupError};
pub use orchestrator::{NamespaceError, Orchestrator, Services};
pub use state::{LifecycleState, StateError};
pub use virtual_server::{Listener, ListenerSummary, ServerSummary, VirtualServer};
