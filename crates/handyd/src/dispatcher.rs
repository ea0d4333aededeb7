//! Command dispatcher: the single owner of the session.
//!
//! Architecture: actor pattern.
//! - One task owns the [`Session`] and the [`DeviceLink`]
//! - Callers hold a cloneable [`Dispatcher`] and send commands through an mpsc mailbox
//! - Each command carries a oneshot for its reply
//! - Hub notifications are polled ahead of commands, so anything the hub said
//!   before a command was queued is applied before that command runs
//!
//! Commands run one at a time in mailbox order. A slow hub round-trip delays
//! every command queued behind it.

use handyconf::HandyConfig;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clamp::{self, DurationPolicy, SpeedBounds};
use crate::error::CommandError;
use crate::link::{DeviceLink, LinkEvents};
use crate::session::{Session, SkipReason, StatusSnapshot};

/// Mailbox depth for the session actor.
const MAILBOX: usize = 64;

/// A requested move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionCommand {
    pub position: f64,
    /// Replaces the configured base duration when present.
    pub duration_ms: Option<u32>,
}

impl MotionCommand {
    pub fn to(position: f64) -> Self {
        Self {
            position,
            duration_ms: None,
        }
    }
}

/// Outcome of a move that did not fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MoveAck {
    Sent { position: f64, duration_ms: u32 },
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PauseAck {
    pub paused: bool,
    /// Whether a retract was sent to the device.
    pub retracted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResumeAck {
    pub paused: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedAck {
    pub applied_speed: f64,
}

/// Everything the actor needs from config.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub endpoints: Vec<String>,
    pub scan_window: Duration,
    pub durations: DurationPolicy,
    pub speed_bounds: SpeedBounds,
    pub initial_speed: f64,
    pub retract_duration_ms: u32,
    pub shutdown_timeout: Duration,
}

impl DispatcherSettings {
    pub fn from_config(config: &HandyConfig) -> Self {
        let motion = &config.bootstrap.motion;
        Self {
            endpoints: config.infra.hub.endpoints.clone(),
            scan_window: Duration::from_millis(config.bootstrap.scan.window_ms),
            durations: DurationPolicy::from_config(motion),
            speed_bounds: SpeedBounds::from_config(motion),
            initial_speed: motion.initial_speed,
            retract_duration_ms: motion.retract_duration_ms,
            shutdown_timeout: Duration::from_millis(config.infra.hub.shutdown_timeout_ms),
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from_config(&HandyConfig::default())
    }
}

enum Command {
    Move {
        command: MotionCommand,
        reply: oneshot::Sender<Result<MoveAck, CommandError>>,
    },
    Pause {
        reply: oneshot::Sender<PauseAck>,
    },
    Resume {
        reply: oneshot::Sender<ResumeAck>,
    },
    SetSpeed {
        value: f64,
        reply: oneshot::Sender<SpeedAck>,
    },
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
    Connect {
        reply: oneshot::Sender<Result<StatusSnapshot, CommandError>>,
    },
    Disconnect {
        reply: oneshot::Sender<StatusSnapshot>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Handle to the session actor. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Command>,
}

impl Dispatcher {
    /// Start the session actor over `link`.
    pub fn spawn<L: DeviceLink>(
        link: L,
        events: LinkEvents,
        settings: DispatcherSettings,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(MAILBOX);
        let actor = SessionActor {
            session: Session::new(settings.speed_bounds, settings.initial_speed),
            link,
            events,
            settings,
        };
        let handle = tokio::spawn(actor.run(rx));
        (Self { tx }, handle)
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| CommandError::Unavailable)?;
        rx.await.map_err(|_| CommandError::Unavailable)
    }

    pub async fn move_to(&self, command: MotionCommand) -> Result<MoveAck, CommandError> {
        self.call(|reply| Command::Move { command, reply }).await?
    }

    pub async fn pause(&self) -> Result<PauseAck, CommandError> {
        self.call(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<ResumeAck, CommandError> {
        self.call(|reply| Command::Resume { reply }).await
    }

    pub async fn set_speed(&self, value: f64) -> Result<SpeedAck, CommandError> {
        self.call(|reply| Command::SetSpeed { value, reply }).await
    }

    pub async fn status(&self) -> Result<StatusSnapshot, CommandError> {
        self.call(|reply| Command::Status { reply }).await
    }

    /// Connect (if needed) and run one scan window.
    pub async fn connect(&self) -> Result<StatusSnapshot, CommandError> {
        self.call(|reply| Command::Connect { reply }).await?
    }

    pub async fn disconnect(&self) -> Result<StatusSnapshot, CommandError> {
        self.call(|reply| Command::Disconnect { reply }).await
    }

    /// Disconnect and stop the actor. Later calls return `Unavailable`.
    pub async fn shutdown(&self) {
        let _ = self.call(|done| Command::Shutdown { done }).await;
    }
}

struct SessionActor<L> {
    session: Session,
    link: L,
    events: LinkEvents,
    settings: DispatcherSettings,
}

impl<L: DeviceLink> SessionActor<L> {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!("session actor started");

        loop {
            tokio::select! {
                biased;

                Some(event) = self.events.recv() => self.session.apply(event),

                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle(command).await {
                            break;
                        }
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
            }
        }

        debug!("session actor stopped");
    }

    /// Run one command. Returns false once the actor should stop.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Move { command, reply } => {
                let _ = reply.send(self.move_to(command).await);
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.pause().await);
            }
            Command::Resume { reply } => {
                self.session.resume();
                info!("resumed");
                let _ = reply.send(ResumeAck { paused: false });
            }
            Command::SetSpeed { value, reply } => {
                let applied_speed = self.session.set_speed(value);
                info!(requested = value, applied = applied_speed, "speed set");
                let _ = reply.send(SpeedAck { applied_speed });
            }
            Command::Status { reply } => {
                let _ = reply.send(self.session.snapshot());
            }
            Command::Connect { reply } => {
                let _ = reply.send(self.connect().await);
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(self.session.snapshot());
            }
            Command::Shutdown { done } => {
                self.shutdown().await;
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    async fn move_to(&mut self, command: MotionCommand) -> Result<MoveAck, CommandError> {
        let position = clamp::position(command.position);
        let device = match self.session.motion_target() {
            Ok(device) => device.clone(),
            Err(reason) => {
                debug!(?reason, position, "move skipped");
                return Ok(MoveAck::Skipped { reason });
            }
        };

        let duration_ms = self
            .settings
            .durations
            .motion_duration(command.duration_ms, self.session.speed());

        self.link.send_linear(&device, duration_ms, position).await?;
        debug!(position, duration_ms, "move sent");
        Ok(MoveAck::Sent {
            position,
            duration_ms,
        })
    }

    async fn pause(&mut self) -> PauseAck {
        let Some(device) = self.session.pause() else {
            info!("paused");
            return PauseAck {
                paused: true,
                retracted: false,
                warning: None,
            };
        };

        let retract_ms = self
            .settings
            .durations
            .retract_duration(self.settings.retract_duration_ms);
        match self
            .link
            .send_linear(&device, retract_ms, clamp::POSITION_MIN)
            .await
        {
            Ok(()) => {
                info!(device = %device.name, "paused and retracted");
                PauseAck {
                    paused: true,
                    retracted: true,
                    warning: None,
                }
            }
            Err(e) => {
                warn!(device = %device.name, "paused but retract failed: {}", e);
                PauseAck {
                    paused: true,
                    retracted: false,
                    warning: Some(format!("retract failed: {}", e)),
                }
            }
        }
    }

    async fn connect(&mut self) -> Result<StatusSnapshot, CommandError> {
        if !self.session.is_connected() {
            self.session.begin_connect();
            match self.link.connect(&self.settings.endpoints).await {
                Ok(endpoint) => self.session.connect_succeeded(endpoint),
                Err(e) => {
                    warn!("hub connect failed: {}", e);
                    self.session.connect_failed();
                    return Err(e.into());
                }
            }
        }

        self.scan().await;
        Ok(self.session.snapshot())
    }

    /// Run one scan window, binding devices as they are announced.
    async fn scan(&mut self) {
        let window = self.settings.scan_window;
        info!(window_ms = window.as_millis() as u64, "scanning for devices");

        let scan = self.link.scan(window);
        tokio::pin!(scan);

        loop {
            tokio::select! {
                result = &mut scan => {
                    if let Err(e) = result {
                        warn!("scan did not complete cleanly: {}", e);
                    }
                    break;
                }
                Some(event) = self.events.recv() => self.session.apply(event),
            }
        }

        while let Ok(event) = self.events.try_recv() {
            self.session.apply(event);
        }

        if !self.session.snapshot().device_bound {
            info!("scan finished without a device");
        }
    }

    async fn disconnect(&mut self) {
        if self.session.disconnect() {
            if let Err(e) = self.link.disconnect().await {
                warn!("hub disconnect failed: {}", e);
            }
            info!("disconnected from hub");
        }
    }

    async fn shutdown(&mut self) {
        if !self.session.disconnect() {
            return;
        }
        match tokio::time::timeout(self.settings.shutdown_timeout, self.link.disconnect()).await {
            Ok(Ok(())) => info!("hub released"),
            Ok(Err(e)) => warn!("hub disconnect failed during shutdown: {}", e),
            Err(_) => warn!(
                timeout_ms = self.settings.shutdown_timeout.as_millis() as u64,
                "hub disconnect timed out during shutdown"
            ),
        }
    }
}
