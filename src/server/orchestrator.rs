//! Virtual server orchestrator.
//!
//! Drives every declared server through bootstrap → instantiate → open and
//! answers lookups once startup is done. Each phase touches every listener
//! of every server before the next phase starts; the first failure aborts
//! the phase and leaves the orchestrator `Failed`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::compile::{CompileContext, CompilerRegistry};
use crate::config::{ConfigTree, Section, SectionId};
use crate::dictionary::{BuiltinSource, DictionaryCache, DictionaryHandle, DictionarySource};
use crate::net::{ConflictIndex, ListenerId, Scheduler};
use crate::observability::metrics;
use crate::protocol::{
    BootstrapContext, HookError, InstantiateContext, ModuleRegistry, ModuleResolver, OpenContext, ProtocolLoader,
};
use crate::server::dispatch::{DispatchBuild, DispatchError, ProcessHandler, Request};
use crate::server::error::{HookPhase, StartupError};
use crate::server::state::{LifecycleState, StateError};
use crate::server::virtual_server::{Listener, ServerSummary, VirtualServer};

/// Process-wide services the orchestrator drives servers with.
#[derive(Clone)]
pub struct Services {
    pub modules: Arc<dyn ModuleResolver>,
    pub dictionaries: Arc<DictionaryCache>,
    pub compilers: Arc<CompilerRegistry>,
    pub conflicts: Arc<ConflictIndex>,
}

impl Services {
    pub fn new(modules: Arc<dyn ModuleResolver>, dictionaries: impl DictionarySource + 'static) -> Self {
        Self {
            modules,
            dictionaries: Arc::new(DictionaryCache::new(dictionaries)),
            compilers: Arc::new(CompilerRegistry::new()),
            conflicts: Arc::new(ConflictIndex::new()),
        }
    }

    /// Built-in protocols and dictionaries only.
    pub fn builtin() -> Self {
        Self::new(Arc::new(ModuleRegistry::with_builtins()), BuiltinSource)
    }
}

/// Result of [`Orchestrator::has_namespace`] when the check fails.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamespaceError {
    #[error("no virtual server named \"{0}\"")]
    NotFound(String),

    #[error("virtual server \"{server}\" is namespace \"{found}\", not \"{expected}\"")]
    WrongNamespace {
        server: String,
        expected: String,
        found: String,
    },
}

pub struct Orchestrator {
    services: Services,
    loader: ProtocolLoader,
    tree: Option<Arc<ConfigTree>>,
    servers: Vec<VirtualServer>,
    by_name: BTreeMap<String, usize>,
    state: LifecycleState,
}

impl Orchestrator {
    pub fn new(services: Services) -> Self {
        let loader = ProtocolLoader::new(services.modules.clone());
        Self {
            services,
            loader,
            tree: None,
            servers: Vec::new(),
            by_name: BTreeMap::new(),
            state: LifecycleState::Declared,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn tree(&self) -> Option<&Arc<ConfigTree>> {
        self.tree.as_ref()
    }

    /// Servers in declaration order.
    pub fn servers(&self) -> impl Iterator<Item = &VirtualServer> {
        self.servers.iter()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    // ---------------------------------------------------------------
    // Phases
    // ---------------------------------------------------------------

    /// Validate every server, load dictionaries and protocol plugins, run
    /// bootstrap hooks.
    pub fn bootstrap(&mut self, tree: Arc<ConfigTree>) -> Result<(), StartupError> {
        self.expect_state(LifecycleState::Declared, LifecycleState::Bootstrapped)?;
        tracing::info!("Bootstrapping listeners");

        let started = Instant::now();
        let result = self.bootstrap_servers(&tree);
        self.tree = Some(tree);
        self.finish_phase("bootstrap", LifecycleState::Bootstrapped, started, result)
    }

    /// Compile policies, build dispatch tables, run instantiate hooks.
    pub fn instantiate(&mut self) -> Result<(), StartupError> {
        self.expect_state(LifecycleState::Bootstrapped, LifecycleState::Instantiated)?;
        let tree = self.loaded_tree(LifecycleState::Instantiated)?;
        tracing::info!("Instantiating listeners");

        let started = Instant::now();
        let result = self.instantiate_servers(&tree);
        self.finish_phase("instantiate", LifecycleState::Instantiated, started, result)
    }

    /// Run open hooks, handing sockets to `scheduler`.
    ///
    /// Listeners opened before a failure stay open.
    pub async fn open(&mut self, scheduler: &dyn Scheduler) -> Result<(), StartupError> {
        self.expect_state(LifecycleState::Instantiated, LifecycleState::Opened)?;
        let tree = self.loaded_tree(LifecycleState::Opened)?;
        tracing::info!("Opening listener interfaces");

        let started = Instant::now();
        let result = self.open_servers(&tree, scheduler).await;
        self.finish_phase("open", LifecycleState::Opened, started, result)
    }

    fn expect_state(&self, expected: LifecycleState, to: LifecycleState) -> Result<(), StartupError> {
        if self.state != expected {
            return Err(StateError { from: self.state, to }.into());
        }
        Ok(())
    }

    fn loaded_tree(&self, to: LifecycleState) -> Result<Arc<ConfigTree>, StartupError> {
        self.tree
            .clone()
            .ok_or_else(|| StateError { from: self.state, to }.into())
    }

    fn finish_phase(
        &mut self,
        phase: &'static str,
        next: LifecycleState,
        started: Instant,
        result: Result<(), StartupError>,
    ) -> Result<(), StartupError> {
        let elapsed = started.elapsed();
        match result {
            Ok(()) => {
                self.state.advance(next)?;
                metrics::record_phase(phase, "ok", elapsed);
                tracing::debug!(phase, elapsed_ms = elapsed.as_millis() as u64, "Phase complete");
                Ok(())
            }
            Err(e) => {
                self.state.fail();
                metrics::record_phase(phase, "error", elapsed);
                tracing::error!(phase, error = %e, "Phase failed");
                Err(e)
            }
        }
    }

    fn bootstrap_servers(&mut self, tree: &ConfigTree) -> Result<(), StartupError> {
        self.services.compilers.establish();
        self.services.conflicts.clear();

        let root = tree.section(tree.root());

        // Every server must name its namespace before any plugin loads.
        let mut declared: Vec<(&str, &str, Section<'_>)> = Vec::new();
        for section in root.subsections_named("server") {
            let Some(name) = section.name2() else {
                return Err(StartupError::configuration(
                    section.location(),
                    "server sections must have a name, e.g. 'server default { ... }'",
                ));
            };

            let namespace = match section.find_pair("namespace") {
                Some(pair) => pair.value(),
                None if section.is_generated() => {
                    tracing::debug!(server = %name, "Skipping generated server without namespace");
                    continue;
                }
                None => {
                    return Err(StartupError::configuration(
                        section.location(),
                        format!(
                            "virtual server {} MUST contain a 'namespace' option. \
                             This tells the server which protocol the virtual server processes",
                            name
                        ),
                    ));
                }
            };

            if declared.iter().any(|(seen, _, _)| *seen == name) {
                return Err(StartupError::configuration(
                    section.location(),
                    format!("virtual server {} is defined more than once", name),
                ));
            }
            declared.push((name, namespace, section));
        }

        if declared.is_empty() {
            return Err(StartupError::configuration(
                root.location(),
                "No virtual servers found. Please add one or more 'server NAME { ... }' sections",
            ));
        }

        for (name, namespace, section) in declared {
            self.bootstrap_server(tree, name, namespace, section)?;
        }
        Ok(())
    }

    fn bootstrap_server(
        &mut self,
        tree: &ConfigTree,
        name: &str,
        namespace: &str,
        section: Section<'_>,
    ) -> Result<(), StartupError> {
        if namespace.is_empty() {
            return Err(StartupError::configuration(
                section.location(),
                format!("virtual server {} has an empty 'namespace'", name),
            ));
        }

        let dictionary =
            self.services
                .dictionaries
                .ensure(namespace)
                .map_err(|source| StartupError::Dictionary {
                    location: section.location().clone(),
                    server: name.to_string(),
                    namespace: namespace.to_string(),
                    source,
                })?;

        tracing::debug!(server = %name, namespace = %namespace, "Bootstrapping virtual server");
        let mut server = VirtualServer::new(name, namespace, dictionary, section.id());
        let result = self.bootstrap_listeners(tree, &mut server);
        match &result {
            Ok(()) => server.state.advance(LifecycleState::Bootstrapped)?,
            Err(_) => server.state.fail(),
        }

        self.by_name.insert(server.name.clone(), self.servers.len());
        self.servers.push(server);
        result
    }

    fn bootstrap_listeners(&self, tree: &ConfigTree, server: &mut VirtualServer) -> Result<(), StartupError> {
        let section = tree.section(server.section);

        for (position, listen) in section.subsections_named("listen").enumerate() {
            let id = ListenerId::new(server.name.clone(), position);
            let module = self.loader.load(listen, &id).map_err(|source| StartupError::ModuleLoad {
                listener: id.clone(),
                source,
            })?;

            let mut listener = Listener::new(id, listen.id(), module);
            let outcome = match listener.module.module_mut().bootstrap_hook() {
                Some(hook) => {
                    let mut ctx = BootstrapContext {
                        listener: &listener.id,
                        namespace: &server.namespace,
                        section: listen,
                        server: section,
                        dictionary: &server.dictionary,
                        compilers: &self.services.compilers,
                    };
                    hook.bootstrap(&mut ctx)
                }
                None => Ok(()),
            };

            if let Err(source) = outcome {
                listener.state.fail();
                let error = hook_error(HookPhase::Bootstrap, &listener, listen, source);
                server.listeners.push(listener);
                return Err(error);
            }

            listener.state.advance(LifecycleState::Bootstrapped)?;
            server.listeners.push(listener);
        }
        Ok(())
    }

    fn instantiate_servers(&mut self, tree: &ConfigTree) -> Result<(), StartupError> {
        for index in 0..self.servers.len() {
            let services = &self.services;
            let server = &mut self.servers[index];
            let result = instantiate_server(services, tree, server);
            match &result {
                Ok(()) => server.state.advance(LifecycleState::Instantiated)?,
                Err(_) => server.state.fail(),
            }
            result?;
        }
        Ok(())
    }

    async fn open_servers(&mut self, tree: &ConfigTree, scheduler: &dyn Scheduler) -> Result<(), StartupError> {
        let conflicts = &self.services.conflicts;

        for server in self.servers.iter_mut() {
            let result = open_server(conflicts, tree, server, scheduler).await;
            match &result {
                Ok(()) => server.state.advance(LifecycleState::Opened)?,
                Err(_) => server.state.fail(),
            }
            result?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Lookups
    // ---------------------------------------------------------------

    pub fn find_by_name(&self, name: &str) -> Option<&VirtualServer> {
        self.by_name.get(name).map(|&index| &self.servers[index])
    }

    /// The server enclosing `section`, which may be the server section
    /// itself or any section nested below it.
    pub fn find_by_child(&self, section: SectionId) -> Option<&VirtualServer> {
        let tree = self.tree.as_ref()?;
        let server_section = tree.get(section)?.find_in_parent("server")?;
        self.find_by_name(server_section.name2()?)
            .filter(|server| server.section == server_section.id())
    }

    pub fn namespace_of(&self, name: &str) -> Option<DictionaryHandle> {
        self.find_by_name(name).map(|server| server.dictionary.clone())
    }

    /// Check that server `name` exists and speaks the namespace of
    /// `expected`.
    pub fn has_namespace(&self, name: &str, expected: &DictionaryHandle) -> Result<&VirtualServer, NamespaceError> {
        let server = self
            .find_by_name(name)
            .ok_or_else(|| NamespaceError::NotFound(name.to_string()))?;
        if !Arc::ptr_eq(&server.dictionary, expected) {
            return Err(NamespaceError::WrongNamespace {
                server: name.to_string(),
                expected: expected.protocol().to_string(),
                found: server.namespace.clone(),
            });
        }
        Ok(server)
    }

    /// Process handler for packet `code` in server `name`.
    pub fn resolve(&self, name: &str, code: u32) -> Result<Arc<dyn ProcessHandler>, DispatchError> {
        let server = self
            .find_by_name(name)
            .ok_or_else(|| DispatchError::ServerNotFound(name.to_string()))?;
        server.dispatch.get(code).ok_or_else(|| DispatchError::NotFound {
            server: name.to_string(),
            code,
        })
    }

    /// Point `request` at its handler using the first listener of the
    /// first server. Returns `false` when there is no listener at all.
    pub fn prime_request(&self, request: &mut Request) -> bool {
        let Some(server) = self.servers.first() else {
            return false;
        };
        let Some(listener) = server.listeners.first() else {
            return false;
        };
        if request.server.is_empty() {
            request.server = server.name.clone();
        }
        listener.plugin().entry_point_set(request);
        true
    }

    pub fn server_list(&self) -> Vec<ServerSummary> {
        self.servers.iter().map(VirtualServer::summary).collect()
    }

    /// One line per server: name padded to 30 columns, then namespace.
    pub fn show_server_list(&self) -> String {
        let mut out = String::new();
        for server in &self.servers {
            let _ = writeln!(out, "{:<30}namespace = {}", server.name, server.namespace);
        }
        out
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state)
            .field("servers", &self.by_name.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn hook_error(phase: HookPhase, listener: &Listener, listen: Section<'_>, source: HookError) -> StartupError {
    StartupError::Hook {
        phase,
        listener: listener.id.clone(),
        plugin: listener.module.name().to_string(),
        location: listen.location().clone(),
        source,
    }
}

fn instantiate_server(services: &Services, tree: &ConfigTree, server: &mut VirtualServer) -> Result<(), StartupError> {
    let section = tree.section(server.section);

    match services.compilers.lookup(&server.namespace) {
        Some(compile) => {
            let mut ctx = CompileContext::new(
                tree,
                server.section,
                &server.name,
                &server.dictionary,
                &mut server.policies,
            );
            compile(&mut ctx).map_err(|source| StartupError::Compile {
                server: server.name.clone(),
                source,
            })?;
        }
        None => {
            tracing::debug!(server = %server.name, namespace = %server.namespace, "No compiler for namespace");
        }
    }

    let table = DispatchBuild {
        server: section,
        namespace: &server.namespace,
        dictionary: &server.dictionary,
        policies: &server.policies,
        resolver: services.modules.as_ref(),
    }
    .build()
    .map_err(|source| StartupError::Dispatch {
        server: server.name.clone(),
        source,
    })?;
    server.dispatch = Arc::new(table);

    for listener in server.listeners.iter_mut() {
        let listen = tree.section(listener.section);
        let outcome = match listener.module.module_mut().instantiate_hook() {
            Some(hook) => {
                let mut ctx = InstantiateContext {
                    listener: &listener.id,
                    section: listen,
                    server: section,
                    dictionary: &server.dictionary,
                    policies: &server.policies,
                    dispatch: &server.dispatch,
                };
                hook.instantiate(&mut ctx)
            }
            None => Ok(()),
        };

        if let Err(source) = outcome {
            listener.state.fail();
            return Err(hook_error(HookPhase::Instantiate, listener, listen, source));
        }
        listener.state.advance(LifecycleState::Instantiated)?;
    }

    server.unused_sections.clear();
    for sub in section.subsections() {
        if sub.name1() == "listen" || server.policies.is_claimed(sub.id()) {
            continue;
        }
        tracing::warn!(
            server = %server.name,
            location = %sub.location(),
            "{} {} {{ ... }} section is unused",
            sub.name1(),
            sub.name2().unwrap_or("")
        );
        metrics::record_unused_section(&server.namespace);
        server.unused_sections.push(sub.id());
    }
    Ok(())
}

async fn open_server(
    conflicts: &ConflictIndex,
    tree: &ConfigTree,
    server: &mut VirtualServer,
    scheduler: &dyn Scheduler,
) -> Result<(), StartupError> {
    for listener in server.listeners.iter_mut() {
        let listen = tree.section(listener.section);
        let app = listener.module.name().to_string();

        let mut bound = None;
        let outcome = match listener.module.module_mut().open_hook() {
            Some(hook) => {
                let mut ctx = OpenContext::new(&listener.id, &app, listen, scheduler, conflicts);
                let outcome = hook.open(&mut ctx).await;
                bound = ctx.bound();
                outcome
            }
            None => {
                tracing::debug!(listener = %listener.id, "Listener has nothing to open");
                Ok(())
            }
        };
        if outcome.is_err() {
            // A failed hook may have claimed its address before the bind
            // failed.
            let released = conflicts.remove(&listener.id);
            if released > 0 {
                tracing::debug!(listener = %listener.id, released, "Released addresses of failed listener");
            }
        }

        match outcome {
            Ok(()) => {
                listener.bound = bound;
                listener.state.advance(LifecycleState::Opened)?;
                metrics::record_listener_opened(&server.namespace);
                tracing::info!(
                    listener = %listener.id,
                    plugin = %app,
                    address = %bound.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string()),
                    "Listener opened"
                );
            }
            Err(HookError::Conflict { address, owner }) => {
                listener.state.fail();
                return Err(StartupError::Conflict {
                    listener: listener.id.clone(),
                    existing: owner,
                    address,
                });
            }
            Err(source) => {
                listener.state.fail();
                return Err(hook_error(HookPhase::Open, listener, listen, source));
            }
        }
    }
    Ok(())
}
