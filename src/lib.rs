//! Mediates Grbl serial protocol traffic between CNC/laser motion
//! controllers and the clients that want to talk to them.
//!
//! A single [`Registry`](registry::Registry) actor owns device lifecycle and
//! routes requests to a per-device [`Machine`](machine::Machine) actor, which
//! in turn owns a [`FlowController`](flow_control::FlowController) (admission
//! control against Grbl's 127-byte receive buffer) and a
//! [`SerialConnection`](serial::SerialConnection) (the transport). Everything
//! communicates over `std::sync::mpsc` mailboxes carrying the typed
//! [`Message`](message::Message) enum; [`handle::Handle`] is the process-wide
//! entry point a host acquires a `Sender<Message>` from.

pub mod actor;
pub mod classifier;
pub mod command;
pub mod error;
pub mod flow_control;
pub mod handle;
pub mod hotplug;
pub mod machine;
pub mod message;
pub mod registry;
pub mod serial;

pub use command::CommandTag;
pub use error::{MediationError, Result};
pub use handle::{default_options, Handle, Options};
pub use hotplug::{HotplugEvent, HotplugSource, PollingHotplug};
pub use message::{ClientId, Message, RejectReason};
