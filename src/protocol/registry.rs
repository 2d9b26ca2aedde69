//! Plugin registry: name → factory.
//!
//! Protocol plugins are published as `proto_<namespace>`, process
//! handlers as `process_<namespace>_<type>`. The registry is a
//! [`ModuleResolver`], which is the seam the loader resolves through.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::compile::CompiledPolicies;
use crate::config::{Location, Section};
use crate::net::ListenerId;
use crate::protocol::hooks::ProtocolModule;
use crate::server::ProcessHandler;

/// Which family of plugin is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Proto,
    Process,
}

impl ModuleKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ModuleKind::Proto => "proto",
            ModuleKind::Process => "process",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Module name of the process handler for `type_name` in `namespace`,
/// e.g. `radius` + `Access-Request` → `radius_access_request`.
pub fn process_name(namespace: &str, type_name: &str) -> String {
    format!("{}_{}", namespace, type_name.to_ascii_lowercase().replace('-', "_"))
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("module {kind}_{name} not found")]
    NotFound { kind: ModuleKind, name: String },

    #[error("module {name} is not a {expected} module")]
    WrongKind { name: String, expected: ModuleKind },
}

/// A plugin rejected its configuration.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("{location}: {message}")]
    Config { location: Location, message: String },

    #[error("{0}")]
    Other(String),
}

impl ModuleError {
    pub fn config(location: &Location, message: impl Into<String>) -> Self {
        ModuleError::Config {
            location: location.clone(),
            message: message.into(),
        }
    }
}

/// Inputs of a protocol plugin factory.
pub struct ModuleConf<'a> {
    pub namespace: &'a str,
    pub listener: &'a ListenerId,
    pub section: Section<'a>,
    pub server: Section<'a>,
}

/// Inputs of a process handler factory.
pub struct ProcessConf<'a> {
    pub namespace: &'a str,
    pub server: Section<'a>,
    pub type_name: &'a str,
    pub code: u32,
    pub policies: &'a CompiledPolicies,
}

pub type ProtoFactory = Arc<dyn Fn(&ModuleConf<'_>) -> Result<Box<dyn ProtocolModule>, ModuleError> + Send + Sync>;
pub type ProcessFactory = Arc<dyn Fn(&ProcessConf<'_>) -> Result<Arc<dyn ProcessHandler>, ModuleError> + Send + Sync>;

/// A resolved plugin.
#[derive(Clone)]
pub enum ModuleHandle {
    Proto(ProtoFactory),
    Process(ProcessFactory),
}

/// Finds plugins by name.
pub trait ModuleResolver: Send + Sync {
    fn resolve(&self, name: &str, kind: ModuleKind) -> Result<ModuleHandle, ResolveError>;
}

/// In-process plugin table.
#[derive(Default, Clone)]
pub struct ModuleRegistry {
    protocols: BTreeMap<String, ProtoFactory>,
    processes: BTreeMap<String, ProcessFactory>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the protocols compiled into this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::protocols::register_builtins(&mut registry);
        registry
    }

    /// Publish `proto_<namespace>`, replacing any earlier factory.
    pub fn register_protocol(&mut self, namespace: &str, factory: ProtoFactory) -> &mut Self {
        self.protocols.insert(namespace.to_string(), factory);
        self
    }

    /// Publish `process_<name>`, replacing any earlier factory.
    pub fn register_process(&mut self, name: &str, factory: ProcessFactory) -> &mut Self {
        self.processes.insert(name.to_string(), factory);
        self
    }

    pub fn names(&self, kind: ModuleKind) -> Vec<String> {
        match kind {
            ModuleKind::Proto => self.protocols.keys().cloned().collect(),
            ModuleKind::Process => self.processes.keys().cloned().collect(),
        }
    }
}

impl ModuleResolver for ModuleRegistry {
    fn resolve(&self, name: &str, kind: ModuleKind) -> Result<ModuleHandle, ResolveError> {
        let found = match kind {
            ModuleKind::Proto => self.protocols.get(name).cloned().map(ModuleHandle::Proto),
            ModuleKind::Process => self.processes.get(name).cloned().map(ModuleHandle::Process),
        };
        found.ok_or_else(|| ResolveError::NotFound {
            kind,
            name: name.to_string(),
        })
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("protocols", &self.names(ModuleKind::Proto))
            .field("processes", &self.names(ModuleKind::Process))
            .finish()
    }
}
