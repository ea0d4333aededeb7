//! Session state machine.
//!
//! One [`Session`] exists per process. It is owned by the dispatcher actor and
//! never shared, so every method here is plain synchronous state mutation.
//! Link I/O happens in the dispatcher; the session only decides what is
//! allowed and records what happened.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clamp::SpeedBounds;
use crate::link::{DeviceHandle, LinkEvent};

/// Hub connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Why a move was not forwarded to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotConnected,
    NoDevice,
    Paused,
}

/// Result of a device-added notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    Bound,
    /// Another device is already bound.
    Ignored,
    /// Announcement arrived while not connected.
    NotConnected,
}

/// Read-only projection of the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub device_bound: bool,
    /// `"None"` when no device is bound.
    pub device_name: String,
    pub paused: bool,
    pub speed_multiplier: f64,
}

#[derive(Debug)]
pub struct Session {
    link: LinkState,
    paused: bool,
    speed: f64,
    bound: Option<DeviceHandle>,
    bounds: SpeedBounds,
    endpoint: Option<String>,
}

impl Session {
    /// Fresh session: disconnected, unbound, paused.
    pub fn new(bounds: SpeedBounds, initial_speed: f64) -> Self {
        Self {
            link: LinkState::Disconnected,
            paused: true,
            speed: bounds.clamp(initial_speed),
            bound: None,
            bounds,
            endpoint: None,
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.link
    }

    pub fn is_connected(&self) -> bool {
        self.link == LinkState::Connected
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn begin_connect(&mut self) {
        self.link = LinkState::Connecting;
    }

    pub fn connect_succeeded(&mut self, endpoint: String) {
        info!(endpoint = %endpoint, "connected to hub");
        self.link = LinkState::Connected;
        self.endpoint = Some(endpoint);
    }

    pub fn connect_failed(&mut self) {
        self.link = LinkState::Disconnected;
        self.endpoint = None;
    }

    /// First-found policy: bind only when connected and nothing is bound.
    pub fn device_added(&mut self, device: DeviceHandle) -> BindOutcome {
        if self.link == LinkState::Disconnected {
            return BindOutcome::NotConnected;
        }
        if self.bound.is_some() {
            return BindOutcome::Ignored;
        }
        self.bound = Some(device);
        BindOutcome::Bound
    }

    /// Unbind if `index` is the bound device. Returns whether it was.
    pub fn device_removed(&mut self, index: u32) -> bool {
        if self.bound.as_ref().is_some_and(|d| d.index == index) {
            if let Some(device) = self.bound.take() {
                info!(name = %device.name, index, "bound device removed");
            }
            true
        } else {
            debug!(index, "unbound device removed");
            false
        }
    }

    /// Hub went away on its own. Fails safe: unbind and pause.
    pub fn hub_lost(&mut self, reason: &str) {
        let endpoint = self.endpoint.take().unwrap_or_default();
        warn!(endpoint = %endpoint, reason = %reason, "hub disconnected");
        self.link = LinkState::Disconnected;
        self.bound = None;
        self.paused = true;
    }

    /// Drop the hub connection. Returns whether one was active or pending.
    ///
    /// The pause flag is left as is.
    pub fn disconnect(&mut self) -> bool {
        let was_active = self.link != LinkState::Disconnected;
        self.link = LinkState::Disconnected;
        self.bound = None;
        self.endpoint = None;
        was_active
    }

    /// Set paused. Returns the device to retract, if there is one to reach.
    pub fn pause(&mut self) -> Option<DeviceHandle> {
        self.paused = true;
        if self.is_connected() {
            self.bound.clone()
        } else {
            None
        }
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Store the clamped speed and return it.
    pub fn set_speed(&mut self, value: f64) -> f64 {
        self.speed = self.bounds.clamp(value);
        self.speed
    }

    /// Device a move should go to, or why it should be skipped.
    pub fn motion_target(&self) -> Result<&DeviceHandle, SkipReason> {
        if !self.is_connected() {
            return Err(SkipReason::NotConnected);
        }
        let device = self.bound.as_ref().ok_or(SkipReason::NoDevice)?;
        if self.paused {
            return Err(SkipReason::Paused);
        }
        Ok(device)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            connected: self.is_connected(),
            device_bound: self.bound.is_some(),
            device_name: self
                .bound
                .as_ref()
                .map(|d| d.name.clone())
                .unwrap_or_else(|| "None".to_string()),
            paused: self.paused,
            speed_multiplier: self.speed,
        }
    }

    /// Fold a hub notification into the session.
    pub fn apply(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::DeviceAdded(device) => {
                let (name, index) = (device.name.clone(), device.index);
                match self.device_added(device) {
                    BindOutcome::Bound => info!(name = %name, index, "device bound"),
                    BindOutcome::Ignored => {
                        info!(name = %name, index, "device ignored; another device is bound")
                    }
                    BindOutcome::NotConnected => {
                        debug!(name = %name, index, "device announced while disconnected")
                    }
                }
            }
            LinkEvent::DeviceRemoved { index } => {
                self.device_removed(index);
            }
            LinkEvent::HubDisconnected { reason } => self.hub_lost(&reason),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SpeedBounds::default(), 1.0)
    }
}
