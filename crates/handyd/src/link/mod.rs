//! The device hub capability the session drives.
//!
//! A [`DeviceLink`] owns the transport to the hub. The session never holds
//! the transport itself, only [`DeviceHandle`]s announced through the
//! [`LinkEvent`] stream that each link hands out at construction.

pub mod intiface;
pub mod simulated;

pub use intiface::IntifaceLink;
pub use simulated::{LinearCall, SimulatedHub, SimulatedLink};

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Reference to an actuator the hub has announced.
///
/// `index` is the hub's identity for the device; `name` is for humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceHandle {
    pub index: u32,
    pub name: String,
}

impl DeviceHandle {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

/// Asynchronous notifications from the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    DeviceAdded(DeviceHandle),
    DeviceRemoved { index: u32 },
    /// The hub connection dropped without us asking.
    HubDisconnected { reason: String },
}

/// Receiving half of a link's notification stream.
pub type LinkEvents = mpsc::Receiver<LinkEvent>;

/// Buffer for link notification channels.
pub(crate) const EVENT_BUFFER: usize = 64;

/// Errors from the hub transport.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("could not connect to hub (tried {}): {reason}", attempted.join(", "))]
    ConnectFailed {
        attempted: Vec<String>,
        reason: String,
    },

    #[error("not connected to hub")]
    NotConnected,

    #[error("hub transport error: {0}")]
    Transport(String),

    #[error("hub rejected command: {0}")]
    Rejected(String),

    #[error("hub did not answer within {0:?}")]
    Timeout(Duration),

    #[error("unexpected hub message: {0}")]
    Protocol(String),
}

/// Operations the session needs from a hub connection.
///
/// Calls are made one at a time by the session actor, so implementations
/// see at most one in-flight command.
#[async_trait]
pub trait DeviceLink: Send + 'static {
    /// Try `endpoints` in order and stop at the first that accepts.
    ///
    /// Returns the endpoint that accepted. On failure the error lists every
    /// endpoint attempted.
    async fn connect(&mut self, endpoints: &[String]) -> Result<String, LinkError>;

    /// Open a discovery window of `window`, then stop scanning.
    ///
    /// Devices found arrive as [`LinkEvent::DeviceAdded`], possibly after this
    /// returns.
    async fn scan(&mut self, window: Duration) -> Result<(), LinkError>;

    /// Move `device` to `position` (0.0..=1.0) over `duration_ms`.
    async fn send_linear(
        &mut self,
        device: &DeviceHandle,
        duration_ms: u32,
        position: f64,
    ) -> Result<(), LinkError>;

    /// Release the hub connection. Calling this while disconnected is a no-op.
    async fn disconnect(&mut self) -> Result<(), LinkError>;
}
