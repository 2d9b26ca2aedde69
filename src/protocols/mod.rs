//! Protocols compiled into the daemon.
//!
//! | Namespace | Listener | Packet types |
//! |---|---|---|
//! | `radius` | UDP / TCP socket | Access, Accounting, Status-Server, CoA, Disconnect |
//! | `control` | local stream socket | none |

pub mod control;
pub mod radius;

use crate::protocol::ModuleRegistry;

/// Publish every built-in protocol and its process handlers.
pub fn register_builtins(registry: &mut ModuleRegistry) {
    radius::register(registry);
    control::register(registry);
}
