//! Per-server process dispatch.
//!
//! Each `type = <name>` inside a `listen` section names a packet type of
//! the server's dictionary. The dictionary's dispatch attribute maps the
//! name to a code, and the code indexes a dense table of process
//! handlers built once during instantiate.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::compile::{CompiledPolicies, CompiledPolicy};
use crate::config::{Location, Section};
use crate::dictionary::DictionaryHandle;
use crate::protocol::{process_name, ModuleError, ModuleHandle, ModuleKind, ModuleResolver, ProcessConf, ResolveError};

/// Outcome of processing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Rcode {
    Ok,
    Handled,
    Noop,
    Reject,
    Fail,
}

/// The slice of a request the orchestrator cares about.
#[derive(Clone, Default)]
pub struct Request {
    pub server: String,
    pub code: u32,
    pub entry_point: Option<Arc<dyn ProcessHandler>>,
    pub policy: Option<Arc<CompiledPolicy>>,
}

impl Request {
    pub fn new(server: impl Into<String>, code: u32) -> Self {
        Self {
            server: server.into(),
            code,
            ..Self::default()
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("server", &self.server)
            .field("code", &self.code)
            .field("entry_point", &self.entry_point.as_ref().map(|h| h.name().to_string()))
            .field("policy", &self.policy.as_ref().map(|p| p.location.to_string()))
            .finish()
    }
}

/// Handles one packet type.
pub trait ProcessHandler: Send + Sync {
    fn name(&self) -> &str;

    fn process(&self, request: &mut Request) -> Rcode;
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no virtual server named \"{0}\"")]
    ServerNotFound(String),

    #[error("server {server} has no handler for packet code {code}")]
    NotFound { server: String, code: u32 },
}

#[derive(Debug, Error)]
pub enum DispatchBuildError {
    #[error("{location}: namespace \"{namespace}\" has no packet types, 'type' is not allowed here")]
    Untyped { location: Location, namespace: String },

    #[error("{location}: Unknown {attribute} value \"{type_name}\"")]
    UnknownType {
        location: Location,
        attribute: String,
        type_name: String,
    },

    #[error("{location}: Invalid type code {code} for \"{type_name}\", codes must be below {max_code}")]
    OutOfRange {
        location: Location,
        type_name: String,
        code: u32,
        max_code: u32,
    },

    #[error("{location}: type \"{type_name}\" maps to code {code}, already handled by \"{existing}\"")]
    Duplicate {
        location: Location,
        type_name: String,
        code: u32,
        existing: String,
    },

    #[error("{location}: Failed loading process_{module}: {source}")]
    Resolve {
        location: Location,
        module: String,
        #[source]
        source: ResolveError,
    },

    #[error("{location}: process_{module} rejected its configuration: {source}")]
    Create {
        location: Location,
        module: String,
        #[source]
        source: ModuleError,
    },
}

struct Slot {
    type_name: String,
    handler: Arc<dyn ProcessHandler>,
}

/// Dense code → handler table.
pub struct DispatchTable {
    slots: Vec<Option<Slot>>,
}

impl DispatchTable {
    /// A table that resolves nothing.
    pub fn empty() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn with_max_code(max_code: u32) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(max_code as usize, || None);
        Self { slots }
    }

    /// Codes must stay below this.
    pub fn max_code(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn get(&self, code: u32) -> Option<Arc<dyn ProcessHandler>> {
        self.slots
            .get(code as usize)
            .and_then(Option::as_ref)
            .map(|slot| slot.handler.clone())
    }

    /// Type name registered for `code`.
    pub fn type_name(&self, code: u32) -> Option<&str> {
        self.slots
            .get(code as usize)
            .and_then(Option::as_ref)
            .map(|slot| slot.type_name.as_str())
    }

    /// (code, type name) pairs in code order.
    pub fn entries(&self) -> Vec<(u32, String)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(code, slot)| slot.as_ref().map(|s| (code as u32, s.type_name.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&mut self, code: u32, type_name: &str, handler: Arc<dyn ProcessHandler>) {
        if let Some(slot) = self.slots.get_mut(code as usize) {
            *slot = Some(Slot {
                type_name: type_name.to_string(),
                handler,
            });
        }
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("max_code", &self.max_code())
            .field("entries", &self.entries())
            .finish()
    }
}

/// Inputs for building one server's table.
pub(crate) struct DispatchBuild<'a> {
    pub server: Section<'a>,
    pub namespace: &'a str,
    pub dictionary: &'a DictionaryHandle,
    pub policies: &'a CompiledPolicies,
    pub resolver: &'a dyn ModuleResolver,
}

impl DispatchBuild<'_> {
    /// Walk every `listen` section's `type` pairs and load a handler per
    /// distinct type.
    ///
    /// A type repeated inside one listener is a duplicate. The same type
    /// in two listeners of the server shares one handler.
    pub(crate) fn build(&self) -> Result<DispatchTable, DispatchBuildError> {
        let mut table: Option<DispatchTable> = None;

        for listen in self.server.subsections_named("listen") {
            let mut in_listener = BTreeSet::new();

            for pair in listen.pairs_named("type") {
                let location = pair.location();
                let type_name = pair.value();

                let spec = self.dictionary.dispatch().ok_or_else(|| DispatchBuildError::Untyped {
                    location: location.clone(),
                    namespace: self.namespace.to_string(),
                })?;
                let code = self
                    .dictionary
                    .enum_value(&spec.attribute, type_name)
                    .ok_or_else(|| DispatchBuildError::UnknownType {
                        location: location.clone(),
                        attribute: spec.attribute.clone(),
                        type_name: type_name.to_string(),
                    })?;
                if code >= spec.max_code {
                    return Err(DispatchBuildError::OutOfRange {
                        location: location.clone(),
                        type_name: type_name.to_string(),
                        code,
                        max_code: spec.max_code,
                    });
                }

                let table = table.get_or_insert_with(|| DispatchTable::with_max_code(spec.max_code));
                let seen_here = !in_listener.insert(code);
                match table.type_name(code) {
                    Some(existing) if seen_here || existing != type_name => {
                        return Err(DispatchBuildError::Duplicate {
                            location: location.clone(),
                            type_name: type_name.to_string(),
                            code,
                            existing: existing.to_string(),
                        });
                    }
                    Some(_) => {
                        tracing::trace!(type_name = %type_name, code, "Sharing process handler between listeners");
                        continue;
                    }
                    None => {}
                }

                let handler = self.load_handler(location, type_name, code)?;
                tracing::debug!(type_name = %type_name, code, handler = %handler.name(), "Process handler registered");
                table.insert(code, type_name, handler);
            }
        }

        Ok(table.unwrap_or_else(DispatchTable::empty))
    }

    fn load_handler(
        &self,
        location: &Location,
        type_name: &str,
        code: u32,
    ) -> Result<Arc<dyn ProcessHandler>, DispatchBuildError> {
        let module = process_name(self.namespace, type_name);
        let resolve_err = |source| DispatchBuildError::Resolve {
            location: location.clone(),
            module: module.clone(),
            source,
        };

        let factory = match self.resolver.resolve(&module, ModuleKind::Process).map_err(resolve_err)? {
            ModuleHandle::Process(factory) => factory,
            ModuleHandle::Proto(_) => {
                return Err(resolve_err(ResolveError::WrongKind {
                    name: module.clone(),
                    expected: ModuleKind::Process,
                }))
            }
        };

        let conf = ProcessConf {
            namespace: self.namespace,
            server: self.server,
            type_name,
            code,
            policies: self.policies,
        };
        factory(&conf).map_err(|source| DispatchBuildError::Create {
            location: location.clone(),
            module: module.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigTree;
    use crate::dictionary::Dictionary;
    use crate::protocol::ModuleRegistry;

    const DICT: &str = r#"
protocol = "test"

[dispatch]
attribute = "Packet-Type"
max_code = 8

[[attribute]]
name = "Packet-Type"
number = 1
kind = "uint32"

[values.Packet-Type]
Ping = 1
Pong = 2
Huge = 9
"#;

    struct Echo(String);

    impl ProcessHandler for Echo {
        fn name(&self) -> &str {
            &self.0
        }

        fn process(&self, _request: &mut Request) -> Rcode {
            Rcode::Ok
        }
    }

    fn echo(conf: &ProcessConf<'_>) -> Result<Arc<dyn ProcessHandler>, ModuleError> {
        Ok(Arc::new(Echo(conf.type_name.to_string())))
    }

    fn registry() -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        for name in ["test_ping", "test_pong", "test_huge"] {
            registry.register_process(name, Arc::new(echo));
        }
        registry
    }

    fn build(tree: &ConfigTree, server: crate::config::SectionId) -> Result<DispatchTable, DispatchBuildError> {
        let dictionary: DictionaryHandle = Arc::new(Dictionary::parse("test", DICT).unwrap());
        let policies = CompiledPolicies::new();
        let registry = registry();
        DispatchBuild {
            server: tree.section(server),
            namespace: "test",
            dictionary: &dictionary,
            policies: &policies,
            resolver: &registry,
        }
        .build()
    }

    fn server_with(listeners: &[&[&str]]) -> (ConfigTree, crate::config::SectionId) {
        let mut tree = ConfigTree::new();
        let root = tree.root();
        let server = tree.add_section(root, "server", Some("s"));
        tree.add_pair(server, "namespace", "test");
        for types in listeners {
            let listen = tree.add_section(server, "listen", None);
            for ty in *types {
                tree.add_pair(listen, "type", *ty);
            }
        }
        (tree, server)
    }

    #[test]
    fn test_build_and_resolve() {
        let (tree, server) = server_with(&[&["Ping", "Pong"]]);
        let table = build(&tree, server).unwrap();
        assert_eq!(table.max_code(), 8);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1).unwrap().name(), "Ping");
        assert_eq!(table.get(2).unwrap().name(), "Pong");
        assert!(table.get(3).is_none());
        assert!(table.get(1000).is_none());
    }

    #[test]
    fn test_duplicate_in_one_listener() {
        let (tree, server) = server_with(&[&["Ping", "Ping"]]);
        let err = build(&tree, server).unwrap_err();
        assert!(matches!(err, DispatchBuildError::Duplicate { code: 1, .. }));
    }

    #[test]
    fn test_shared_across_listeners() {
        let (tree, server) = server_with(&[&["Ping"], &["Ping", "Pong"]]);
        let table = build(&tree, server).unwrap();
        assert_eq!(table.entries(), vec![(1, "Ping".to_string()), (2, "Pong".to_string())]);
    }

    #[test]
    fn test_out_of_range() {
        let (tree, server) = server_with(&[&["Huge"]]);
        let err = build(&tree, server).unwrap_err();
        assert!(matches!(err, DispatchBuildError::OutOfRange { code: 9, max_code: 8, .. }));
    }

    #[test]
    fn test_unknown_type() {
        let (tree, server) = server_with(&[&["Bogus"]]);
        let err = build(&tree, server).unwrap_err();
        assert!(err.to_string().contains("Unknown Packet-Type value \"Bogus\""));
    }

    #[test]
    fn test_no_types_gives_empty_table() {
        let (tree, server) = server_with(&[&[]]);
        let table = build(&tree, server).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.max_code(), 0);
    }
}
