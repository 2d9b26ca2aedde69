//! Startup orchestration.
//!
//! # Responsibilities
//! - Assemble process-wide services from settings
//! - Run the orchestrator phases in order
//!
//! # Design Decisions
//! - Fail fast: the first error is returned and nothing is retried
//! - Listeners open last (traffic only when every server instantiated)

use std::sync::Arc;

use crate::config::{ConfigTree, Settings};
use crate::dictionary::{BuiltinSource, DirectorySource, LayeredSource};
use crate::net::Scheduler;
use crate::observability::metrics;
use crate::protocol::ModuleRegistry;
use crate::server::{Orchestrator, Services, StartupError};

/// Services for the daemon: built-in protocols, and dictionaries from the
/// configured directory falling back to the embedded ones.
pub fn services_from_settings(settings: &Settings) -> Services {
    let mut source = LayeredSource::new();
    if let Some(dir) = &settings.dictionary.directory {
        tracing::info!(directory = %dir.display(), "Loading dictionaries from directory");
        source = source.push(DirectorySource::new(dir.clone()));
    }
    source = source.push(BuiltinSource);

    Services::new(Arc::new(ModuleRegistry::with_builtins()), source)
}

/// Bootstrap, instantiate and open every virtual server.
pub async fn start(
    services: Services,
    tree: Arc<ConfigTree>,
    scheduler: &dyn Scheduler,
) -> Result<Orchestrator, StartupError> {
    let mut orchestrator = Orchestrator::new(services);
    orchestrator.bootstrap(tree)?;
    orchestrator.instantiate()?;
    orchestrator.open(scheduler).await?;

    metrics::set_virtual_servers(orchestrator.len());
    tracing::info!(servers = orchestrator.len(), "Virtual servers running");
    Ok(orchestrator)
}

/// Bootstrap and instantiate only. Used to validate a configuration
/// without binding anything.
pub fn check(services: Services, tree: Arc<ConfigTree>) -> Result<Orchestrator, StartupError> {
    let mut orchestrator = Orchestrator::new(services);
    orchestrator.bootstrap(tree)?;
    orchestrator.instantiate()?;
    Ok(orchestrator)
}
