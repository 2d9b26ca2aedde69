//! Local control socket.
//!
//! ```toml
//! [server.control]
//! namespace = "control"
//!
//! [[server.control.listen]]
//! path = "/var/run/vserver/control.sock"
//! ```
//!
//! The socket has no network address, so it never enters the conflict
//! index. Control commands carry no packet types; requests are never
//! routed to a process handler.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::net::listener::bind_unix;
use crate::protocol::{HookError, ModuleConf, ModuleError, ModuleRegistry, OpenContext, OpenHook, ProtocolModule};
use crate::server::Request;

pub const NAMESPACE: &str = "control";

pub fn register(registry: &mut ModuleRegistry) {
    registry.register_protocol(NAMESPACE, Arc::new(new_listener));
}

fn new_listener(conf: &ModuleConf<'_>) -> Result<Box<dyn ProtocolModule>, ModuleError> {
    let pair = conf
        .section
        .find_pair("path")
        .ok_or_else(|| ModuleError::config(conf.section.location(), "control listener requires 'path'"))?;
    if pair.value().is_empty() {
        return Err(ModuleError::config(pair.location(), "'path' must not be empty"));
    }
    Ok(Box::new(ControlListener {
        path: PathBuf::from(pair.value()),
    }))
}

struct ControlListener {
    path: PathBuf,
}

impl ProtocolModule for ControlListener {
    fn name(&self) -> &str {
        NAMESPACE
    }

    fn entry_point_set(&self, request: &mut Request) {
        request.entry_point = None;
    }

    fn open_hook(&mut self) -> Option<&mut dyn OpenHook> {
        Some(self)
    }
}

#[async_trait]
impl OpenHook for ControlListener {
    async fn open(&mut self, ctx: &mut OpenContext<'_>) -> Result<(), HookError> {
        ctx.record(None)?;
        let socket = bind_unix(&self.path)?;
        ctx.register(socket)
    }
}
