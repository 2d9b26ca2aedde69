//! Hand-off point between listeners and the network I/O scheduler.
//!
//! The scheduler that drives sockets at runtime lives outside this crate;
//! plugins only need somewhere to register what they opened.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use thiserror::Error;

use crate::net::conflict::ListenerId;
use crate::net::listener::BoundSocket;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is shut down")]
    Closed,
    #[error("{0} already registered")]
    Duplicate(ListenerId),
}

/// Accepts opened sockets on behalf of the runtime.
pub trait Scheduler: Send + Sync {
    /// Take ownership of `socket`, opened by plugin `app` for `listener`.
    fn register(&self, listener: &ListenerId, app: &str, socket: BoundSocket) -> Result<(), SchedulerError>;
}

/// Summary of one registered socket.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub listener: ListenerId,
    pub app: String,
    pub endpoint: String,
}

struct Slot {
    registration: Registration,
    _socket: BoundSocket,
}

/// Scheduler that simply keeps opened sockets alive until shutdown.
pub struct IoRegistry {
    slots: Mutex<Option<Vec<Slot>>>,
}

impl Default for IoRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IoRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Some(Vec::new())),
        }
    }

    pub fn registrations(&self) -> Vec<Registration> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .iter()
            .flatten()
            .map(|slot| slot.registration.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every socket and refuse further registrations.
    pub fn close(&self) -> usize {
        let taken = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();
        for slot in &taken {
            tracing::debug!(
                listener = %slot.registration.listener,
                endpoint = %slot.registration.endpoint,
                "Closing listener socket"
            );
        }
        taken.len()
    }
}

impl Scheduler for IoRegistry {
    fn register(&self, listener: &ListenerId, app: &str, socket: BoundSocket) -> Result<(), SchedulerError> {
        let mut guard = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slots = guard.as_mut().ok_or(SchedulerError::Closed)?;
        if slots.iter().any(|slot| &slot.registration.listener == listener) {
            return Err(SchedulerError::Duplicate(listener.clone()));
        }

        let registration = Registration {
            listener: listener.clone(),
            app: app.to_string(),
            endpoint: socket.describe(),
        };
        tracing::info!(
            listener = %registration.listener,
            app = %registration.app,
            endpoint = %registration.endpoint,
            "Listener registered with scheduler"
        );
        slots.push(Slot { registration, _socket: socket });
        Ok(())
    }
}
