//! handyd - local HTTP control daemon for The Handy
//!
//! Accepts simple motion commands over HTTP and forwards them to a single
//! linear actuator through an Intiface (Buttplug) hub.
//!
//! Request flow: [`gateway`] validates, [`dispatcher`] serializes onto the
//! one [`session::Session`], and a [`link::DeviceLink`] talks to the hub.

pub mod clamp;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod link;
pub mod serve;
pub mod session;
pub mod telemetry;

pub use dispatcher::{Dispatcher, DispatcherSettings, MotionCommand, MoveAck};
pub use error::CommandError;
pub use session::{SkipReason, StatusSnapshot};
