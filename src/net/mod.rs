//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! listen section (transport, ipaddr, port, interface)
//!     → address.rs (BoundAddress: prefix-masked coverage)
//!     → conflict.rs (process-wide index, overlap rejection)
//!     → listener.rs (bind UDP / TCP / local socket)
//!     → scheduler.rs (hand the socket to the I/O runtime)
//! ```
//!
//! # Design Decisions
//! - A listener records its coverage before binding, so a conflicting
//!   configuration fails with both owners named instead of `EADDRINUSE`
//! - Records without an address (local sockets) are never indexed

pub mod address;
pub mod conflict;
pub mod listener;
pub mod scheduler;

pub use address::{AddressError, BoundAddress, Family, Transport};
pub use conflict::{BoundAddressRecord, ConflictIndex, ListenerId};
pub use listener::{BoundSocket, ListenerError};
pub use scheduler::{IoRegistry, Registration, Scheduler, SchedulerError};
