//! Per-listener protocol plugin loading.

use std::sync::Arc;

use thiserror::Error;

use crate::config::{Location, Section};
use crate::net::ListenerId;
use crate::protocol::hooks::ProtocolModule;
use crate::protocol::registry::{ModuleConf, ModuleError, ModuleHandle, ModuleKind, ModuleResolver, ResolveError};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(
        "{location}: No 'namespace' set for virtual server. \
         Please add 'namespace = <protocol>' inside of the 'server {server} {{ ... }}' section"
    )]
    MissingNamespace { location: Location, server: String },

    #[error("{location}: 'namespace' must not be empty")]
    EmptyNamespace { location: Location },

    #[error("{location}: Failed loading proto_{namespace}: {source}")]
    Resolve {
        location: Location,
        namespace: String,
        #[source]
        source: ResolveError,
    },

    #[error("{location}: proto_{namespace} rejected its configuration: {source}")]
    Create {
        location: Location,
        namespace: String,
        #[source]
        source: ModuleError,
    },
}

/// A protocol plugin bound to one `listen` section.
pub struct ModuleInstance {
    name: String,
    namespace: String,
    module: Box<dyn ProtocolModule>,
}

impl ModuleInstance {
    /// Module name, e.g. `proto_radius`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn module(&self) -> &dyn ProtocolModule {
        self.module.as_ref()
    }

    pub fn module_mut(&mut self) -> &mut dyn ProtocolModule {
        self.module.as_mut()
    }
}

impl std::fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .finish()
    }
}

/// Loads the protocol plugin named by a listener's enclosing server.
///
/// Every call yields a fresh instance; two listeners of the same server
/// never share one.
#[derive(Clone)]
pub struct ProtocolLoader {
    resolver: Arc<dyn ModuleResolver>,
}

impl ProtocolLoader {
    pub fn new(resolver: Arc<dyn ModuleResolver>) -> Self {
        Self { resolver }
    }

    pub fn load(&self, listen: Section<'_>, listener: &ListenerId) -> Result<ModuleInstance, LoadError> {
        let found = listen
            .find_in_parent("server")
            .and_then(|server| server.find_pair("namespace").map(|pair| (server, pair.value())));
        let Some((server, namespace)) = found else {
            return Err(LoadError::MissingNamespace {
                location: listen.location().clone(),
                server: listener.server.clone(),
            });
        };
        if namespace.is_empty() {
            return Err(LoadError::EmptyNamespace {
                location: listen.location().clone(),
            });
        }

        let resolve_err = |source| LoadError::Resolve {
            location: listen.location().clone(),
            namespace: namespace.to_string(),
            source,
        };
        let factory = match self.resolver.resolve(namespace, ModuleKind::Proto).map_err(resolve_err)? {
            ModuleHandle::Proto(factory) => factory,
            ModuleHandle::Process(_) => {
                return Err(resolve_err(ResolveError::WrongKind {
                    name: namespace.to_string(),
                    expected: ModuleKind::Proto,
                }))
            }
        };

        let conf = ModuleConf {
            namespace,
            listener,
            section: listen,
            server,
        };
        let module = factory(&conf).map_err(|source| LoadError::Create {
            location: listen.location().clone(),
            namespace: namespace.to_string(),
            source,
        })?;

        tracing::debug!(
            listener = %listener,
            module = %format!("proto_{}", namespace),
            "Loaded protocol module"
        );
        Ok(ModuleInstance {
            name: format!("proto_{}", namespace),
            namespace: namespace.to_string(),
            module,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigTree;
    use crate::protocol::registry::ModuleRegistry;
    use crate::server::Request;

    struct Null;

    impl ProtocolModule for Null {
        fn name(&self) -> &str {
            "null"
        }

        fn entry_point_set(&self, _request: &mut Request) {}
    }

    fn null(_conf: &ModuleConf<'_>) -> Result<Box<dyn ProtocolModule>, ModuleError> {
        Ok(Box::new(Null))
    }

    fn picky(conf: &ModuleConf<'_>) -> Result<Box<dyn ProtocolModule>, ModuleError> {
        Err(ModuleError::config(conf.section.location(), "port is required"))
    }

    fn loader() -> ProtocolLoader {
        let mut registry = ModuleRegistry::new();
        registry.register_protocol("null", Arc::new(null));
        registry.register_protocol("picky", Arc::new(picky));
        ProtocolLoader::new(Arc::new(registry))
    }

    fn listen_in(namespace: Option<&str>) -> (ConfigTree, crate::config::SectionId) {
        let mut tree = ConfigTree::new();
        let root = tree.root();
        let server = tree.add_section(root, "server", Some("auth"));
        if let Some(namespace) = namespace {
            tree.add_pair(server, "namespace", namespace);
        }
        let listen = tree.add_section(server, "listen", None);
        (tree, listen)
    }

    #[test]
    fn test_load_fresh_instances() {
        let (tree, listen) = listen_in(Some("null"));
        let id = ListenerId::new("auth", 0);
        let first = loader().load(tree.section(listen), &id).unwrap();
        let second = loader().load(tree.section(listen), &id).unwrap();
        assert_eq!(first.name(), "proto_null");
        assert_eq!(first.namespace(), "null");
        assert_eq!(second.module().name(), "null");
    }

    #[test]
    fn test_missing_namespace() {
        let (tree, listen) = listen_in(None);
        let err = loader().load(tree.section(listen), &ListenerId::new("auth", 0)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("No 'namespace' set for virtual server"));
        assert!(message.contains("server auth { ... }"));
        assert!(message.starts_with("server auth/listen[0]"));
    }

    #[test]
    fn test_empty_namespace() {
        let (tree, listen) = listen_in(Some(""));
        let err = loader().load(tree.section(listen), &ListenerId::new("auth", 0)).unwrap_err();
        assert!(matches!(err, LoadError::EmptyNamespace { .. }));
    }

    #[test]
    fn test_unknown_module() {
        let (tree, listen) = listen_in(Some("tacacs"));
        let err = loader().load(tree.section(listen), &ListenerId::new("auth", 0)).unwrap_err();
        assert!(matches!(err, LoadError::Resolve { .. }));
        assert!(err.to_string().contains("Failed loading proto_tacacs"));
    }

    #[test]
    fn test_factory_rejects_config() {
        let (tree, listen) = listen_in(Some("picky"));
        let err = loader().load(tree.section(listen), &ListenerId::new("auth", 0)).unwrap_err();
        assert!(matches!(err, LoadError::Create { .. }));
        assert!(err.to_string().contains("port is required"));
    }
}
