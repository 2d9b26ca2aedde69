//! Process-wide namespace → compiler map.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use crate::compile::context::{CompileContext, CompileError};

/// Turns a virtual server's policy sections into executable form.
pub type CompileFn = Arc<dyn Fn(&mut CompileContext<'_>) -> Result<(), CompileError> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("virtual servers have not been bootstrapped; compilers for \"{0}\" must be registered from a bootstrap hook")]
    RootNotEstablished(String),
}

/// Compiler callbacks keyed by namespace.
///
/// Entries are registered by protocol plugins from their bootstrap hook and
/// read by the orchestrator while instantiating. Registering a namespace
/// again replaces the earlier callback: the last writer wins.
#[derive(Default)]
pub struct CompilerRegistry {
    established: AtomicBool,
    entries: RwLock<BTreeMap<String, CompileFn>>,
}

impl CompilerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the registry for registrations. Called by the orchestrator
    /// once it owns a configuration root.
    pub fn establish(&self) {
        self.established.store(true, Ordering::Release);
    }

    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::Acquire)
    }

    /// Insert or replace the compiler for `namespace`.
    ///
    /// Returns `true` when an earlier registration was replaced.
    pub fn register(&self, namespace: &str, compile: CompileFn) -> Result<bool, RegistryError> {
        if !self.is_established() {
            return Err(RegistryError::RootNotEstablished(namespace.to_string()));
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let replaced = entries.insert(namespace.to_string(), compile).is_some();
        if replaced {
            tracing::debug!(namespace = %namespace, "Replaced namespace compiler");
        } else {
            tracing::debug!(namespace = %namespace, "Registered namespace compiler");
        }
        Ok(replaced)
    }

    pub fn lookup(&self, namespace: &str) -> Option<CompileFn> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(namespace).cloned()
    }

    /// Registered namespaces, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.keys().cloned().collect()
    }
}

impl std::fmt::Debug for CompilerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerRegistry")
            .field("established", &self.is_established())
            .field("namespaces", &self.namespaces())
            .finish()
    }
}
