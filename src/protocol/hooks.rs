//! Plugin interface and the per-phase contexts handed to its hooks.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::compile::{CompileFn, CompiledPolicies, CompilerRegistry, RegistryError};
use crate::config::Section;
use crate::dictionary::{DictionaryError, DictionaryHandle};
use crate::net::{
    AddressError, BoundAddress, BoundAddressRecord, BoundSocket, ConflictIndex, ListenerError, ListenerId, Scheduler,
    SchedulerError,
};
use crate::server::{DispatchTable, Request};

/// Failure reported by a plugin hook.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("{address} is already in use by {owner}")]
    Conflict { address: BoundAddress, owner: ListenerId },

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Dictionary(#[from] DictionaryError),

    #[error("{0}")]
    Failed(String),
}

/// A protocol plugin instance, one per `listen` section.
///
/// Hooks are optional capabilities: a plugin exposes one by returning
/// `Some(self)` from the matching accessor.
pub trait ProtocolModule: Send + Sync {
    /// Short plugin name, e.g. `radius`.
    fn name(&self) -> &str;

    /// Point `request` at the process handler for its packet code.
    fn entry_point_set(&self, request: &mut Request);

    fn bootstrap_hook(&mut self) -> Option<&mut dyn BootstrapHook> {
        None
    }

    fn instantiate_hook(&mut self) -> Option<&mut dyn InstantiateHook> {
        None
    }

    fn open_hook(&mut self) -> Option<&mut dyn OpenHook> {
        None
    }
}

pub trait BootstrapHook: Send + Sync {
    fn bootstrap(&mut self, ctx: &mut BootstrapContext<'_>) -> Result<(), HookError>;
}

pub trait InstantiateHook: Send + Sync {
    fn instantiate(&mut self, ctx: &mut InstantiateContext<'_>) -> Result<(), HookError>;
}

#[async_trait]
pub trait OpenHook: Send + Sync {
    async fn open(&mut self, ctx: &mut OpenContext<'_>) -> Result<(), HookError>;
}

/// Bootstrap phase: validate configuration, register compilers.
pub struct BootstrapContext<'a> {
    pub listener: &'a ListenerId,
    pub namespace: &'a str,
    pub section: Section<'a>,
    pub server: Section<'a>,
    pub dictionary: &'a DictionaryHandle,
    pub compilers: &'a CompilerRegistry,
}

impl BootstrapContext<'_> {
    /// Register (or replace) the compiler for this listener's namespace.
    pub fn register_compiler(&self, compile: CompileFn) -> Result<(), HookError> {
        self.compilers.register(self.namespace, compile)?;
        Ok(())
    }
}

/// Instantiate phase: the server's policies are compiled and its
/// dispatch table is built.
pub struct InstantiateContext<'a> {
    pub listener: &'a ListenerId,
    pub section: Section<'a>,
    pub server: Section<'a>,
    pub dictionary: &'a DictionaryHandle,
    pub policies: &'a CompiledPolicies,
    pub dispatch: &'a Arc<DispatchTable>,
}

/// Open phase: claim an address, open sockets, hand them to the scheduler.
pub struct OpenContext<'a> {
    listener: &'a ListenerId,
    app: &'a str,
    section: Section<'a>,
    scheduler: &'a dyn Scheduler,
    conflicts: &'a ConflictIndex,
    bound: Option<BoundAddress>,
}

impl<'a> OpenContext<'a> {
    pub fn new(
        listener: &'a ListenerId,
        app: &'a str,
        section: Section<'a>,
        scheduler: &'a dyn Scheduler,
        conflicts: &'a ConflictIndex,
    ) -> Self {
        Self {
            listener,
            app,
            section,
            scheduler,
            conflicts,
            bound: None,
        }
    }

    pub fn listener(&self) -> &'a ListenerId {
        self.listener
    }

    pub fn section(&self) -> Section<'a> {
        self.section
    }

    /// Claim `address` in the process-wide conflict index. `None` is for
    /// listeners that do not bind a network address and always succeeds.
    pub fn record(&mut self, address: Option<BoundAddress>) -> Result<(), HookError> {
        let Some(address) = address else {
            tracing::debug!(listener = %self.listener, "Listener binds no network address");
            return Ok(());
        };

        let record = BoundAddressRecord {
            address: Some(address),
            owner: self.listener.clone(),
        };
        match self.conflicts.try_record(&record) {
            Ok(()) => {
                tracing::debug!(listener = %self.listener, address = %address, "Listener address recorded");
                self.bound = Some(address);
                Ok(())
            }
            Err(owner) => {
                crate::observability::metrics::record_conflict();
                Err(HookError::Conflict { address, owner })
            }
        }
    }

    /// Hand an opened socket to the scheduler.
    pub fn register(&self, socket: BoundSocket) -> Result<(), HookError> {
        self.scheduler.register(self.listener, self.app, socket)?;
        Ok(())
    }

    /// Address claimed through [`record`](Self::record), if any.
    pub fn bound(&self) -> Option<BoundAddress> {
        self.bound
    }
}
