//! In-process hub for running without hardware.
//!
//! `handyd serve --simulate` drives this instead of Intiface, and the test
//! suites use the [`SimulatedHub`] handle to inspect every linear move and to
//! inject failures and hub notifications.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::{DeviceHandle, DeviceLink, LinkError, LinkEvent, LinkEvents, EVENT_BUFFER};

/// One recorded `send_linear` call.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearCall {
    pub device_index: u32,
    pub duration_ms: u32,
    pub position: f64,
}

#[derive(Debug, Default)]
struct HubState {
    connected: bool,
    /// Devices announced on each scan.
    devices: Vec<DeviceHandle>,
    motions: Vec<LinearCall>,
    connect_attempts: Vec<String>,
    scans: usize,
    disconnects: usize,
    /// Endpoints that refuse connections.
    refused: Vec<String>,
    motion_failure: Option<String>,
    /// Disconnect never completes.
    hang_disconnect: bool,
}

/// Control and inspection handle shared with a [`SimulatedLink`].
#[derive(Clone)]
pub struct SimulatedHub {
    state: Arc<Mutex<HubState>>,
    events: mpsc::Sender<LinkEvent>,
}

impl SimulatedHub {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        // A panicking test thread must not hide the recorded calls.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Announce `name` at `index` on every scan.
    pub fn with_device(self, index: u32, name: &str) -> Self {
        self.lock().devices.push(DeviceHandle::new(index, name));
        self
    }

    /// Make `endpoint` refuse connections.
    pub fn refuse(&self, endpoint: &str) {
        self.lock().refused.push(endpoint.to_string());
    }

    /// Fail every subsequent linear move with `reason` (None to heal).
    pub fn fail_motion(&self, reason: Option<&str>) {
        self.lock().motion_failure = reason.map(str::to_string);
    }

    /// Make every later disconnect hang forever, like a hub that stopped
    /// answering.
    pub fn hang_disconnect(&self) {
        self.lock().hang_disconnect = true;
    }

    pub fn motions(&self) -> Vec<LinearCall> {
        self.lock().motions.clone()
    }

    pub fn connect_attempts(&self) -> Vec<String> {
        self.lock().connect_attempts.clone()
    }

    pub fn scans(&self) -> usize {
        self.lock().scans
    }

    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Push a device-added notification outside a scan.
    pub async fn announce(&self, index: u32, name: &str) {
        let _ = self
            .events
            .send(LinkEvent::DeviceAdded(DeviceHandle::new(index, name)))
            .await;
    }

    pub async fn remove(&self, index: u32) {
        let _ = self.events.send(LinkEvent::DeviceRemoved { index }).await;
    }

    /// Drop the hub connection as if the server went away.
    pub async fn drop_connection(&self, reason: &str) {
        self.lock().connected = false;
        let _ = self
            .events
            .send(LinkEvent::HubDisconnected {
                reason: reason.to_string(),
            })
            .await;
    }
}

/// [`DeviceLink`] backed by a [`SimulatedHub`].
pub struct SimulatedLink {
    hub: SimulatedHub,
}

impl SimulatedLink {
    /// Create a link, its control handle, and its notification stream.
    pub fn new() -> (Self, SimulatedHub, LinkEvents) {
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let hub = SimulatedHub {
            state: Arc::new(Mutex::new(HubState::default())),
            events,
        };
        (Self { hub: hub.clone() }, hub, rx)
    }
}

#[async_trait]
impl DeviceLink for SimulatedLink {
    async fn connect(&mut self, endpoints: &[String]) -> Result<String, LinkError> {
        let mut state = self.hub.lock();
        let mut attempted = Vec::new();

        for endpoint in endpoints {
            state.connect_attempts.push(endpoint.clone());
            attempted.push(endpoint.clone());
            if !state.refused.contains(endpoint) {
                state.connected = true;
                debug!(endpoint = %endpoint, "simulated hub accepted connection");
                return Ok(endpoint.clone());
            }
        }

        Err(LinkError::ConnectFailed {
            attempted,
            reason: "connection refused".to_string(),
        })
    }

    async fn scan(&mut self, window: Duration) -> Result<(), LinkError> {
        let devices = {
            let mut state = self.hub.lock();
            if !state.connected {
                return Err(LinkError::NotConnected);
            }
            state.scans += 1;
            state.devices.clone()
        };

        for device in devices {
            let _ = self.hub.events.send(LinkEvent::DeviceAdded(device)).await;
        }

        tokio::time::sleep(window).await;
        Ok(())
    }

    async fn send_linear(
        &mut self,
        device: &DeviceHandle,
        duration_ms: u32,
        position: f64,
    ) -> Result<(), LinkError> {
        let mut state = self.hub.lock();
        if !state.connected {
            return Err(LinkError::NotConnected);
        }
        if let Some(reason) = &state.motion_failure {
            return Err(LinkError::Rejected(reason.clone()));
        }

        state.motions.push(LinearCall {
            device_index: device.index,
            duration_ms,
            position,
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        let hang = {
            let mut state = self.hub.lock();
            if !state.hang_disconnect && state.connected {
                state.connected = false;
                state.disconnects += 1;
            }
            state.hang_disconnect
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}
