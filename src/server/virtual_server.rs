//! Virtual servers and their listeners.

use std::sync::Arc;

use serde::Serialize;

use crate::compile::CompiledPolicies;
use crate::config::SectionId;
use crate::dictionary::DictionaryHandle;
use crate::net::{BoundAddress, ListenerId};
use crate::protocol::{ModuleInstance, ProtocolModule};
use crate::server::dispatch::DispatchTable;
use crate::server::state::LifecycleState;

/// One `listen` section and the plugin instance serving it.
#[derive(Debug)]
pub struct Listener {
    pub(crate) id: ListenerId,
    pub(crate) section: SectionId,
    pub(crate) module: ModuleInstance,
    pub(crate) bound: Option<BoundAddress>,
    pub(crate) state: LifecycleState,
}

impl Listener {
    pub(crate) fn new(id: ListenerId, section: SectionId, module: ModuleInstance) -> Self {
        Self {
            id,
            section,
            module,
            bound: None,
            state: LifecycleState::Declared,
        }
    }

    pub fn id(&self) -> &ListenerId {
        &self.id
    }

    pub fn section(&self) -> SectionId {
        self.section
    }

    /// Module name, e.g. `proto_radius`.
    pub fn plugin_name(&self) -> &str {
        self.module.name()
    }

    pub fn plugin(&self) -> &dyn ProtocolModule {
        self.module.module()
    }

    /// Address recorded in the conflict index while opening.
    pub fn bound_address(&self) -> Option<BoundAddress> {
        self.bound
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }
}

/// A named `server` section with its namespace, listeners and compiled
/// policy.
#[derive(Debug)]
pub struct VirtualServer {
    pub(crate) name: String,
    pub(crate) namespace: String,
    pub(crate) dictionary: DictionaryHandle,
    pub(crate) section: SectionId,
    pub(crate) listeners: Vec<Listener>,
    pub(crate) policies: CompiledPolicies,
    pub(crate) dispatch: Arc<DispatchTable>,
    pub(crate) unused_sections: Vec<SectionId>,
    pub(crate) state: LifecycleState,
}

impl VirtualServer {
    pub(crate) fn new(name: &str, namespace: &str, dictionary: DictionaryHandle, section: SectionId) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            dictionary,
            section,
            listeners: Vec::new(),
            policies: CompiledPolicies::new(),
            dispatch: Arc::new(DispatchTable::empty()),
            unused_sections: Vec::new(),
            state: LifecycleState::Declared,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn dictionary(&self) -> &DictionaryHandle {
        &self.dictionary
    }

    pub fn section(&self) -> SectionId {
        self.section
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    pub fn policies(&self) -> &CompiledPolicies {
        &self.policies
    }

    pub fn dispatch(&self) -> &Arc<DispatchTable> {
        &self.dispatch
    }

    /// Subsections no compiler claimed.
    pub fn unused_sections(&self) -> &[SectionId] {
        &self.unused_sections
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn summary(&self) -> ServerSummary {
        ServerSummary {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            state: self.state,
            listeners: self
                .listeners
                .iter()
                .map(|listener| ListenerSummary {
                    position: listener.id.position,
                    plugin: listener.plugin_name().to_string(),
                    state: listener.state,
                    address: listener.bound.map(|a| a.to_string()),
                })
                .collect(),
            types: self.dispatch.entries().into_iter().map(|(_, name)| name).collect(),
        }
    }
}

/// Serializable view of a server for operators.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSummary {
    pub name: String,
    pub namespace: String,
    pub state: LifecycleState,
    pub listeners: Vec<ListenerSummary>,
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListenerSummary {
    pub position: usize,
    pub plugin: String,
    pub state: LifecycleState,
    pub address: Option<String>,
}
