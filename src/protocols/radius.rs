//! RADIUS listeners.
//!
//! ```toml
//! [server.default]
//! namespace = "radius"
//!
//! [[server.default.listen]]
//! transport = "udp"      # or "tcp"
//! ipaddr = "*"           # address or prefix, "*" for any
//! port = 1812
//! type = ["Access-Request", "Status-Server"]
//!
//! [server.default."recv Access-Request"]
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::compile::{CompileContext, CompileError, CompiledPolicy, SectionSpec};
use crate::net::listener::{bind_tcp, bind_udp};
use crate::net::{BoundAddress, Transport};
use crate::protocol::{
    process_name, BootstrapContext, BootstrapHook, HookError, InstantiateContext, InstantiateHook, ModuleConf,
    ModuleError, ModuleRegistry, OpenContext, OpenHook, ProcessConf, ProtocolModule,
};
use crate::server::{DispatchTable, ProcessHandler, Rcode, Request};

pub const NAMESPACE: &str = "radius";

const DEFAULT_PORT: u16 = 1812;
const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Packet types with a process handler.
pub const PACKET_TYPES: &[&str] = &[
    "Access-Request",
    "Accounting-Request",
    "Status-Server",
    "CoA-Request",
    "Disconnect-Request",
];

const SECTIONS: &[SectionSpec<'static>] = &[
    SectionSpec::any("recv", "recv"),
    SectionSpec::any("send", "send"),
    SectionSpec::any("authenticate", "authenticate"),
];

pub fn register(registry: &mut ModuleRegistry) {
    registry.register_protocol(NAMESPACE, Arc::new(new_listener));
    for type_name in PACKET_TYPES {
        registry.register_process(&process_name(NAMESPACE, type_name), Arc::new(new_process));
    }
}

fn new_listener(conf: &ModuleConf<'_>) -> Result<Box<dyn ProtocolModule>, ModuleError> {
    Ok(Box::new(RadiusListener::from_conf(conf)?))
}

fn new_process(conf: &ProcessConf<'_>) -> Result<Arc<dyn ProcessHandler>, ModuleError> {
    Ok(Arc::new(RadiusProcess::new(conf)))
}

/// Compiles the well-known policy sections of a `radius` server.
pub fn compile(ctx: &mut CompileContext<'_>) -> Result<(), CompileError> {
    let count = ctx.compile_sections(SECTIONS)?;
    tracing::debug!(server = %ctx.server_name(), sections = count, "Compiled radius policies");
    Ok(())
}

struct RadiusListener {
    transport: Transport,
    address: BoundAddress,
    max_connections: usize,
    dispatch: Option<Arc<DispatchTable>>,
}

impl RadiusListener {
    fn from_conf(conf: &ModuleConf<'_>) -> Result<Self, ModuleError> {
        let section = conf.section;
        let config_err = |message: String| ModuleError::config(section.location(), message);

        let transport = match section.find_pair("transport") {
            Some(pair) => pair.value().parse::<Transport>().map_err(|e| config_err(e.to_string()))?,
            None => Transport::Udp,
        };
        let port = match section.find_pair("port") {
            Some(pair) => pair
                .value()
                .parse::<u16>()
                .map_err(|_| config_err(format!("invalid port \"{}\"", pair.value())))?,
            None => DEFAULT_PORT,
        };
        let ipaddr = section.find_pair("ipaddr").map_or("*", |pair| pair.value());
        let mut address = BoundAddress::parse(transport, ipaddr, port).map_err(|e| config_err(e.to_string()))?;

        if let Some(pair) = section.find_pair("interface") {
            let scope = pair
                .value()
                .parse::<u32>()
                .map_err(|_| config_err(format!("interface must be a numeric scope id, got \"{}\"", pair.value())))?;
            address = address.with_scope(scope);
        }

        let max_connections = match section.find_pair("max_connections") {
            Some(pair) => pair
                .value()
                .parse::<usize>()
                .map_err(|_| config_err(format!("invalid max_connections \"{}\"", pair.value())))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            transport,
            address,
            max_connections,
            dispatch: None,
        })
    }
}

impl ProtocolModule for RadiusListener {
    fn name(&self) -> &str {
        NAMESPACE
    }

    fn entry_point_set(&self, request: &mut Request) {
        request.entry_point = self.dispatch.as_ref().and_then(|table| table.get(request.code));
    }

    fn bootstrap_hook(&mut self) -> Option<&mut dyn BootstrapHook> {
        Some(self)
    }

    fn instantiate_hook(&mut self) -> Option<&mut dyn InstantiateHook> {
        Some(self)
    }

    fn open_hook(&mut self) -> Option<&mut dyn OpenHook> {
        Some(self)
    }
}

impl BootstrapHook for RadiusListener {
    fn bootstrap(&mut self, ctx: &mut BootstrapContext<'_>) -> Result<(), HookError> {
        if ctx.section.find_pair("type").is_none() {
            return Err(HookError::Config(
                "listen section must declare at least one 'type'".to_string(),
            ));
        }
        ctx.register_compiler(Arc::new(compile))
    }
}

impl InstantiateHook for RadiusListener {
    fn instantiate(&mut self, ctx: &mut InstantiateContext<'_>) -> Result<(), HookError> {
        self.dispatch = Some(ctx.dispatch.clone());
        Ok(())
    }
}

#[async_trait]
impl OpenHook for RadiusListener {
    async fn open(&mut self, ctx: &mut OpenContext<'_>) -> Result<(), HookError> {
        ctx.record(Some(self.address))?;

        let addr = self.address.socket_addr();
        let socket = match self.transport {
            Transport::Udp => bind_udp(addr).await?,
            Transport::Tcp => bind_tcp(addr, self.max_connections).await?,
        };
        ctx.register(socket)
    }
}

/// Runs the `recv <type>` policy of one packet type.
struct RadiusProcess {
    name: String,
    recv: Option<Arc<CompiledPolicy>>,
}

impl RadiusProcess {
    fn new(conf: &ProcessConf<'_>) -> Self {
        let recv = conf.policies.get("recv", Some(conf.type_name));
        if recv.is_none() {
            tracing::debug!(type_name = %conf.type_name, "No recv section, packets will be ignored");
        }
        Self {
            name: process_name(NAMESPACE, conf.type_name),
            recv,
        }
    }
}

impl ProcessHandler for RadiusProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, request: &mut Request) -> Rcode {
        match &self.recv {
            Some(policy) => {
                request.policy = Some(policy.clone());
                Rcode::Ok
            }
            None => Rcode::Noop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigTree;
    use crate::net::ListenerId;

    fn listen(pairs: &[(&str, &str)]) -> (ConfigTree, crate::config::SectionId, crate::config::SectionId) {
        let mut tree = ConfigTree::new();
        let root = tree.root();
        let server = tree.add_section(root, "server", Some("auth"));
        tree.add_pair(server, "namespace", NAMESPACE);
        let listen = tree.add_section(server, "listen", None);
        for (name, value) in pairs {
            tree.add_pair(listen, name, *value);
        }
        (tree, server, listen)
    }

    fn build(pairs: &[(&str, &str)]) -> Result<RadiusListener, ModuleError> {
        let (tree, server, section) = listen(pairs);
        let id = ListenerId::new("auth", 0);
        RadiusListener::from_conf(&ModuleConf {
            namespace: NAMESPACE,
            listener: &id,
            section: tree.section(section),
            server: tree.section(server),
        })
    }

    #[test]
    fn test_defaults() {
        let listener = build(&[("type", "Access-Request")]).unwrap();
        assert_eq!(listener.transport, Transport::Udp);
        assert_eq!(listener.address.port(), 1812);
        assert_eq!(listener.address.prefix(), 0);
    }

    #[test]
    fn test_explicit_address() {
        let listener = build(&[("transport", "tcp"), ("ipaddr", "127.0.0.1"), ("port", "2083")]).unwrap();
        assert_eq!(listener.transport, Transport::Tcp);
        assert_eq!(listener.address.socket_addr(), "127.0.0.1:2083".parse().unwrap());
    }

    #[test]
    fn test_invalid_values() {
        assert!(build(&[("transport", "sctp")]).is_err());
        assert!(build(&[("port", "70000")]).is_err());
        assert!(build(&[("ipaddr", "10.0.0.1/40")]).is_err());
        let err = build(&[("interface", "eth0")]).err().unwrap();
        assert!(err.to_string().contains("numeric scope id"));
    }

    #[test]
    fn test_process_uses_recv_policy() {
        let (tree, server, _) = listen(&[]);
        let policies = crate::compile::CompiledPolicies::new();
        let handler = RadiusProcess::new(&ProcessConf {
            namespace: NAMESPACE,
            server: tree.section(server),
            type_name: "Status-Server",
            code: 12,
            policies: &policies,
        });
        let mut request = Request::new("auth", 12);
        assert_eq!(handler.process(&mut request), Rcode::Noop);
        assert_eq!(handler.name(), "radius_status_server");
    }
}
