//! Startup error taxonomy.

use std::fmt;

use thiserror::Error;

use crate::compile::CompileError;
use crate::config::Location;
use crate::dictionary::DictionaryError;
use crate::net::{BoundAddress, ListenerId};
use crate::protocol::{HookError, LoadError};
use crate::server::dispatch::DispatchBuildError;
use crate::server::state::StateError;

/// Which hook failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Bootstrap,
    Instantiate,
    Open,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::Bootstrap => write!(f, "bootstrap"),
            HookPhase::Instantiate => write!(f, "instantiate"),
            HookPhase::Open => write!(f, "open"),
        }
    }
}

/// Coarse classification, stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    ModuleLoad,
    LifecycleHook,
    Conflict,
    Phase,
}

/// Anything that stops the process from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{location}: {message}")]
    Configuration { location: Location, message: String },

    #[error("{location}: Failed initialising namespace \"{namespace}\" for server {server}: {source}")]
    Dictionary {
        location: Location,
        server: String,
        namespace: String,
        #[source]
        source: DictionaryError,
    },

    #[error("Failed loading listener for {listener}: {source}")]
    ModuleLoad {
        listener: ListenerId,
        #[source]
        source: LoadError,
    },

    #[error("Failed compiling server {server}: {source}")]
    Compile {
        server: String,
        #[source]
        source: CompileError,
    },

    #[error("Failed building dispatch table for server {server}: {source}")]
    Dispatch {
        server: String,
        #[source]
        source: DispatchBuildError,
    },

    #[error("{location}: {plugin} {phase} failed for {listener}: {source}")]
    Hook {
        phase: HookPhase,
        listener: ListenerId,
        plugin: String,
        location: Location,
        #[source]
        source: HookError,
    },

    #[error("{listener} cannot claim {address}, it is already in use by {existing}")]
    Conflict {
        listener: ListenerId,
        existing: ListenerId,
        address: BoundAddress,
    },

    #[error(transparent)]
    Phase(#[from] StateError),
}

impl StartupError {
    pub fn configuration(location: &Location, message: impl Into<String>) -> Self {
        StartupError::Configuration {
            location: location.clone(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StartupError::Configuration { .. }
            | StartupError::Dictionary { .. }
            | StartupError::Compile { .. }
            | StartupError::Dispatch { .. } => ErrorKind::Configuration,
            StartupError::ModuleLoad { source, .. } => match source {
                LoadError::MissingNamespace { .. } | LoadError::EmptyNamespace { .. } => ErrorKind::Configuration,
                LoadError::Resolve { .. } | LoadError::Create { .. } => ErrorKind::ModuleLoad,
            },
            StartupError::Hook { .. } => ErrorKind::LifecycleHook,
            StartupError::Conflict { .. } => ErrorKind::Conflict,
            StartupError::Phase(_) => ErrorKind::Phase,
        }
    }
}
