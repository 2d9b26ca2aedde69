//! Shared utilities for integration testing.
//!
//! The `mock` protocol records its address in the conflict index like a
//! real listener but never binds a socket, so tests can use fixed ports.
//! A `fail = "bootstrap" | "instantiate" | "open"` pair in a listen
//! section makes the matching hook fail; `fail = "bind"` fails the open
//! hook after the address was recorded.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;

use vserver::compile::{CompileContext, CompileError, SectionSpec};
use vserver::config::loader::parse_config;
use vserver::config::ConfigTree;
use vserver::dictionary::{BuiltinSource, LayeredSource, StaticSource};
use vserver::net::{BoundAddress, Transport};
use vserver::protocol::{
    process_name, BootstrapContext, BootstrapHook, HookError, InstantiateContext, InstantiateHook, ModuleConf,
    ModuleError, ModuleRegistry, OpenContext, OpenHook, ProcessConf, ProtocolModule,
};
use vserver::protocols::radius;
use vserver::server::{DispatchTable, ProcessHandler, Rcode, Request, Services};

pub const MOCK_DICTIONARY: &str = r#"
protocol = "mock"

[dispatch]
attribute = "Packet-Type"
max_code = 16

[[attribute]]
name = "Packet-Type"
number = 1
kind = "uint32"

[values.Packet-Type]
Request = 1
Report = 2
Ping = 3
Orphan = 4
Huge = 20
"#;

/// Types of the mock namespace that have a process module. `Orphan` has
/// none.
pub const MOCK_TYPES: &[&str] = &["Request", "Report", "Ping", "Huge"];

const MOCK_SECTIONS: &[SectionSpec<'static>] = &[SectionSpec::any("recv", "recv")];

/// Services with the mock protocol plus the built-in ones.
pub fn services() -> Services {
    Services::new(Arc::new(registry(false)), dictionaries())
}

/// Like [`services`], but `radius` listeners are mocks that never bind.
pub fn services_with_mock_radius() -> Services {
    Services::new(Arc::new(registry(true)), dictionaries())
}

pub fn registry(mock_radius: bool) -> ModuleRegistry {
    let mut registry = ModuleRegistry::with_builtins();
    registry.register_protocol("mock", Arc::new(new_mock_listener));
    for type_name in MOCK_TYPES {
        registry.register_process(&process_name("mock", type_name), Arc::new(new_mock_process));
    }
    if mock_radius {
        registry.register_protocol(radius::NAMESPACE, Arc::new(new_mock_listener));
    }
    registry
}

fn dictionaries() -> LayeredSource {
    LayeredSource::new()
        .push(StaticSource::new().with("mock", MOCK_DICTIONARY))
        .push(BuiltinSource)
}

/// Parse a TOML document into a shared tree, panicking on errors.
pub fn tree(doc: &str) -> Arc<ConfigTree> {
    let loaded = parse_config(doc, None).expect("test config must parse");
    Arc::new(loaded.tree)
}

fn new_mock_listener(conf: &ModuleConf<'_>) -> Result<Box<dyn ProtocolModule>, ModuleError> {
    let section = conf.section;
    let address = match section.find_pair("port") {
        Some(pair) => {
            let port = pair
                .value()
                .parse::<u16>()
                .map_err(|_| ModuleError::config(section.location(), "invalid port"))?;
            let transport = match section.find_pair("transport") {
                Some(pair) => pair
                    .value()
                    .parse::<Transport>()
                    .map_err(|e| ModuleError::config(section.location(), e.to_string()))?,
                None => Transport::Udp,
            };
            let ipaddr = section.find_pair("ipaddr").map_or("*", |pair| pair.value());
            Some(
                BoundAddress::parse(transport, ipaddr, port)
                    .map_err(|e| ModuleError::config(section.location(), e.to_string()))?,
            )
        }
        None => None,
    };

    Ok(Box::new(MockListener {
        namespace: conf.namespace.to_string(),
        address,
        fail: section.find_pair("fail").map(|pair| pair.value().to_string()),
        dispatch: None,
    }))
}

fn new_mock_process(conf: &ProcessConf<'_>) -> Result<Arc<dyn ProcessHandler>, ModuleError> {
    Ok(Arc::new(MockProcess {
        name: process_name(conf.namespace, conf.type_name),
        has_recv: conf.policies.get("recv", Some(conf.type_name)).is_some(),
    }))
}

fn compile_mock(ctx: &mut CompileContext<'_>) -> Result<(), CompileError> {
    ctx.compile_sections(MOCK_SECTIONS)?;
    Ok(())
}

struct MockListener {
    namespace: String,
    address: Option<BoundAddress>,
    fail: Option<String>,
    dispatch: Option<Arc<DispatchTable>>,
}

impl MockListener {
    fn check(&self, phase: &str) -> Result<(), HookError> {
        match &self.fail {
            Some(fail) if fail == phase => Err(HookError::Failed(format!("injected {} failure", phase))),
            _ => Ok(()),
        }
    }
}

impl ProtocolModule for MockListener {
    fn name(&self) -> &str {
        &self.namespace
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

impl BootstrapHook for MockListener {
    fn bootstrap(&mut self, ctx: &mut BootstrapContext<'_>) -> Result<(), HookError> {
        self.check("bootstrap")?;
        if ctx.namespace == radius::NAMESPACE {
            ctx.register_compiler(Arc::new(radius::compile))
        } else {
            ctx.register_compiler(Arc::new(compile_mock))
        }
    }
}

impl InstantiateHook for MockListener {
    fn instantiate(&mut self, ctx: &mut InstantiateContext<'_>) -> Result<(), HookError> {
        self.check("instantiate")?;
        self.dispatch = Some(ctx.dispatch.clone());
        Ok(())
    }
}

#[async_trait]
impl OpenHook for MockListener {
    async fn open(&mut self, ctx: &mut OpenContext<'_>) -> Result<(), HookError> {
        self.check("open")?;
        ctx.record(self.address)?;
        // Fails like a bind error, after the address was claimed.
        self.check("bind")
    }
}

struct MockProcess {
    name: String,
    has_recv: bool,
}

impl ProcessHandler for MockProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, _request: &mut Request) -> Rcode {
        if self.has_recv {
            Rcode::Ok
        } else {
            Rcode::Noop
        }
    }
}
