//! Per-device protocol state machine: identification, wire-byte injection,
//! and the collaboration between a device's `FlowController` and its
//! `SerialConnection`.

use crate::actor::{spawn_actor_with, ActorHandle, Mailbox};
use crate::classifier::Classifier;
use crate::command::{self, CommandTag};
use crate::flow_control::{FlowController, Reaction};
use crate::message::{ClientId, Message, RejectReason};
use crate::serial::SerialConnection;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Forward progress through Grbl handshake and identification. Moves
/// strictly forward except on USB detach, which drops back to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Disconnected,
    Connected,
    Grbl,
    Identified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MachineType {
    #[default]
    Unknown,
    GhostGunner,
}

/// Retry/backoff policy applied when opening the serial port on
/// `USBDeviceAdded`. Not present in the wire protocol at all -- an ambient
/// concern this port adds, grounded in the richer `GrblController` the
/// starting tree already carried (`RecoveryConfig`). Physical reconnect
/// after a detach is already handled upstream (the hotplug bridge re-emits
/// `USBDeviceAdded` once the device reappears), so this only covers a port
/// that is present but transiently fails to open (e.g. briefly held by
/// another process during a udev settle window).
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            max_retries: 2,
            retry_delay_ms: 100,
        }
    }
}

fn ghost_gunner_dd_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"DD ([0-9a-zA-Z]+)").unwrap())
}

fn ghost_gunner_gg_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"GG:([0-9a-zA-Z]+)").unwrap())
}

/// A single device's protocol state: `usb_id`, version, type, and the
/// monotone `message_id` stamped onto every accepted `SendGcode`.
pub struct Machine {
    usb_id: String,
    parent: Mailbox,
    self_mailbox: Mailbox,
    flow: FlowController,
    serial: SerialConnection,
    recovery: RecoveryConfig,
    state: MachineState,
    grbl_version: (u32, u32, char),
    machine_type: MachineType,
    version_string: String,
    message_id: u64,
}

impl Machine {
    pub fn new(usb_id: String, parent: Mailbox, self_mailbox: Mailbox, serial: SerialConnection) -> Self {
        Machine {
            usb_id,
            parent,
            self_mailbox,
            flow: FlowController::new(),
            serial,
            recovery: RecoveryConfig::default(),
            state: MachineState::Disconnected,
            grbl_version: (0, 0, '\0'),
            machine_type: MachineType::Unknown,
            version_string: String::new(),
            message_id: u64::MAX,
        }
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn set_recovery_config(&mut self, config: RecoveryConfig) {
        self.recovery = config;
    }

    pub fn recovery_config(&self) -> &RecoveryConfig {
        &self.recovery
    }

    /// Human-readable device description, mirroring the original's
    /// `Describe()`.
    pub fn describe(&self) -> String {
        match self.machine_type {
            MachineType::GhostGunner => {
                format!("Ghost Gunner {} ({})", self.version_string, self.usb_id)
            }
            MachineType::Unknown => format!(
                "Generic Grbl {}.{}{} device ({})",
                self.grbl_version.0, self.grbl_version.1, self.grbl_version.2, self.usb_id
            ),
        }
    }

    fn transmit_all(&mut self, frames: Vec<Vec<u8>>) {
        for frame in frames {
            if let Err(e) = self.serial.send_bytes(&frame) {
                warn!(usb_id = %self.usb_id, error = %e, "serial transmit failed");
            }
        }
    }

    /// React to a USB attach: transition to `Connected` unconditionally,
    /// flush the flow controller's queues via the synthetic Reconnect
    /// trigger, then attempt to open the serial transport at `port`,
    /// retrying up to `recovery.max_retries` times (sleeping
    /// `recovery.retry_delay_ms` between attempts) before giving up. A
    /// failed open after retries is a transport-layer concern logged here,
    /// not a reason to hold the protocol state machine back -- the Machine
    /// still answers `ListDevices`/`Describe` as Connected, and a subsequent
    /// `USBDeviceRemoved`/`USBDeviceAdded` pair gets another chance at the
    /// transport.
    pub fn on_usb_added(&mut self, port: &str) {
        self.state = MachineState::Connected;
        self.flow.reconnect();

        let mut attempt = 0;
        loop {
            match self.serial.connect(port, self.self_mailbox.clone()) {
                Ok(()) => {
                    info!(usb_id = %self.usb_id, %port, attempt, "device connected");
                    return;
                }
                Err(e) if attempt < self.recovery.max_retries => {
                    attempt += 1;
                    warn!(usb_id = %self.usb_id, %port, attempt, error = %e, "serial open failed, retrying");
                    std::thread::sleep(std::time::Duration::from_millis(self.recovery.retry_delay_ms));
                }
                Err(e) => {
                    warn!(usb_id = %self.usb_id, %port, error = %e, "failed to open serial port, giving up");
                    return;
                }
            }
        }
    }

    /// React to USB detach: flush all queued/in-flight state and fall back
    /// to `Disconnected`, the only non-monotonic transition this state
    /// machine allows.
    pub fn on_usb_removed(&mut self) {
        self.serial.disconnect();
        self.flow = FlowController::new();
        self.state = MachineState::Disconnected;
        info!(usb_id = %self.usb_id, "device disconnected");
    }

    /// React to a Grbl startup banner: validate the firmware version,
    /// enable flow control, and kick off a version probe.
    pub fn on_init_grbl(&mut self, major: u32, minor: u32, sub: char) {
        self.grbl_version = (major, minor, sub);
        if major == 0 && minor < 9 {
            warn!(usb_id = %self.usb_id, %major, %minor, "unsupported Grbl firmware, ignoring");
            return;
        }
        self.state = MachineState::Grbl;
        self.flow.enable();

        let frames = self.flow.queue(CommandTag::GrblVersion, command::wire_payload(CommandTag::GrblVersion).to_vec(), None);
        self.transmit_all(frames);
    }

    /// Process one received serial line, returning any message that should
    /// be forwarded to the registry/parent.
    pub fn on_data_received(&mut self, line: &str) -> Option<Message> {
        match self.flow.receive(line) {
            Reaction::None => None,
            Reaction::Startup { lines } => {
                if self.state == MachineState::Disconnected {
                    return None;
                }
                let (major, minor, sub) = Classifier::version(lines.first().map(String::as_str).unwrap_or(""));
                self.on_init_grbl(major, minor, sub);
                None
            }
            Reaction::Push { lines } => Some(Message::GrblPushReceived {
                to: ClientId::new(),
                usb_id: self.usb_id.clone(),
                lines,
            }),
            Reaction::AlarmLatched => {
                warn!(usb_id = %self.usb_id, "alarm latched");
                Some(Message::AlarmLatched {
                    to: ClientId::new(),
                    usb_id: self.usb_id.clone(),
                })
            }
            Reaction::Paired { pending, lines, freed } => {
                self.transmit_all(freed);
                self.route_response(pending.tag, pending.message_id, lines)
            }
        }
    }

    fn route_response(&mut self, original: CommandTag, message_id: Option<u64>, lines: Vec<String>) -> Option<Message> {
        match self.state {
            MachineState::Disconnected | MachineState::Connected => None,
            MachineState::Grbl => self.process_version_response(&lines),
            MachineState::Identified => Some(Message::ResponseReceived {
                to: ClientId::new(),
                usb_id: self.usb_id.clone(),
                original,
                message_id: message_id.unwrap_or(0),
                lines,
            }),
        }
    }

    /// Parse a `$I` version reply and move to `Identified`. The `DD (...)`
    /// pattern is tried before `GG:(...)` -- matching the original
    /// identification order exactly.
    fn process_version_response(&mut self, lines: &[String]) -> Option<Message> {
        let raw = lines.join(" ");
        let (machine_type, version_string) = if let Some(caps) = ghost_gunner_dd_re().captures(&raw) {
            (MachineType::GhostGunner, caps[1].to_string())
        } else if let Some(caps) = ghost_gunner_gg_re().captures(&raw) {
            (MachineType::GhostGunner, caps[1].to_string())
        } else {
            (MachineType::Unknown, raw.clone())
        };

        let first_time = self.state < MachineState::Identified;
        self.machine_type = machine_type;
        self.version_string = version_string;
        self.state = MachineState::Identified;

        if first_time {
            Some(Message::DeviceIsSupported {
                usb_id: self.usb_id.clone(),
                description: self.describe(),
            })
        } else {
            None
        }
    }

    /// Handle a client-originated `SendGcode`/Grbl-command request. Returns
    /// a `CommandRejected` reply if the device has not finished handshake
    /// yet (spec scenario 7; the original silently dropped this case).
    pub fn on_client_command(&mut self, from: ClientId, tag: CommandTag, payload: Vec<u8>) -> Option<Message> {
        if self.state < MachineState::Grbl {
            return Some(Message::CommandRejected {
                to: from,
                usb_id: self.usb_id.clone(),
                reason: RejectReason::NotReady,
            });
        }
        self.message_id = self.message_id.wrapping_add(1);
        let frames = self.flow.queue(tag, payload, Some(self.message_id));
        self.transmit_all(frames);
        None
    }
}

impl PartialOrd for MachineState {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MachineState {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        fn rank(s: &MachineState) -> u8 {
            match s {
                MachineState::Disconnected => 0,
                MachineState::Connected => 1,
                MachineState::Grbl => 2,
                MachineState::Identified => 3,
            }
        }
        rank(self).cmp(&rank(other))
    }
}

/// Spawn a Machine as its own actor thread, wiring it to the registry's
/// mailbox as its parent. The returned handle's mailbox is also what the
/// Machine hands to its `SerialConnection` so the reader thread it starts
/// on `USBDeviceAdded` can route `DataReceived` back into this actor.
pub fn spawn(usb_id: String, parent: Mailbox) -> ActorHandle {
    spawn_actor_with(
        "machine",
        move |self_mailbox| {
            Machine::new(
                usb_id.clone(),
                parent.clone(),
                self_mailbox,
                SerialConnection::detached(usb_id.clone()),
            )
        },
        move |machine, message| {
            match message {
                Message::USBDeviceAdded { port, .. } => machine.on_usb_added(&port),
                Message::USBDeviceRemoved { .. } => machine.on_usb_removed(),
                Message::DataReceived { line, .. } => {
                    if let Some(reply) = machine.on_data_received(&line) {
                        let _ = machine.parent.send(reply);
                    }
                }
                Message::SendGcode { from, line, .. } => {
                    if let Some(reply) = machine.on_client_command(from, CommandTag::SendGcode, line) {
                        let _ = machine.parent.send(reply);
                    }
                }
                Message::GrblCommand { from, tag, .. } => {
                    let payload = command::wire_payload(tag).to_vec();
                    if let Some(reply) = machine.on_client_command(from, tag, payload) {
                        let _ = machine.parent.send(reply);
                    }
                }
                Message::Shutdown => return false,
                _ => {}
            }
            true
        },
    )
}
