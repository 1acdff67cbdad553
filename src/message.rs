//! The typed inter-actor message and the opaque subscriber identity it
//! travels alongside.

use crate::actor::Mailbox;
use crate::command::CommandTag;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a subscriber/requester within this process. The in-process
/// analogue of a router-socket identity frame: minted once per client by
/// [`crate::registry::Registry`] and handed back on every reply so the
/// registry knows where to deliver pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        ClientId(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a command was refused instead of forwarded to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// The addressed machine has not finished Grbl handshake/identification yet.
    NotReady,
    /// No machine is registered under that USB id.
    UnknownDevice,
}

/// Every message this crate moves between the registry, a machine, its flow
/// controller, and the serial/hotplug collaborators. The `CommandTag` wire
/// discriminant is derivable from the variant via [`Message::tag`] but
/// is never carried as a raw byte internally.
#[derive(Debug, Clone)]
pub enum Message {
    // -- client requests, routed through the Registry to a Machine --
    ListDevices {
        from: ClientId,
    },
    Subscribe {
        from: ClientId,
        usb_ids: Vec<String>,
    },
    Unsubscribe {
        from: ClientId,
        usb_ids: Vec<String>,
    },
    SendGcode {
        from: ClientId,
        usb_id: String,
        line: Vec<u8>,
    },
    GrblCommand {
        from: ClientId,
        usb_id: String,
        tag: CommandTag,
    },

    // -- replies / pushes delivered back to a client --
    ListDevicesReply {
        to: ClientId,
        devices: Vec<String>,
    },
    PushDeviceAdded {
        to: ClientId,
        usb_id: String,
        description: String,
    },
    PushDeviceRemoved {
        to: ClientId,
        usb_id: String,
    },
    ResponseReceived {
        to: ClientId,
        usb_id: String,
        original: CommandTag,
        message_id: u64,
        lines: Vec<String>,
    },
    GrblPushReceived {
        to: ClientId,
        usb_id: String,
        lines: Vec<String>,
    },
    AlarmLatched {
        to: ClientId,
        usb_id: String,
    },
    CommandRejected {
        to: ClientId,
        usb_id: String,
        reason: RejectReason,
    },

    // -- internal events between Registry / Machine / FlowController / transport --
    USBDeviceAdded {
        usb_id: String,
        port: String,
    },
    USBDeviceRemoved {
        usb_id: String,
        port: String,
    },
    DataReceived {
        usb_id: String,
        line: String,
    },
    InitGrbl {
        usb_id: String,
        major: u32,
        minor: u32,
        sub: char,
        banner: Vec<String>,
    },
    EnableFlowControl,
    DeviceIsSupported {
        usb_id: String,
        description: String,
    },

    /// Mints a subscriber identity's delivery channel with the Registry.
    /// The in-process stand-in for the original ZeroMQ ROUTER socket
    /// learning a new identity frame the first time it sees one: here a
    /// client must register explicitly since there is no shared socket to
    /// observe it on.
    RegisterClient {
        id: ClientId,
        mailbox: Mailbox,
    },

    Shutdown,
}

impl Message {
    /// The documented wire-level discriminant for this message, where one
    /// applies. Internal bookkeeping variants with no public tag
    /// (e.g. none currently -- every variant maps to a tag) return the tag
    /// whose semantics match most closely.
    pub fn tag(&self) -> CommandTag {
        match self {
            Message::ListDevices { .. } => CommandTag::ListDevices,
            Message::Subscribe { .. } => CommandTag::Subscribe,
            Message::Unsubscribe { .. } => CommandTag::Unsubscribe,
            Message::SendGcode { .. } => CommandTag::SendGcode,
            Message::GrblCommand { tag, .. } => *tag,
            Message::ListDevicesReply { .. } => CommandTag::ListDevicesReply,
            Message::PushDeviceAdded { .. } => CommandTag::PushDeviceAdded,
            Message::PushDeviceRemoved { .. } => CommandTag::PushDeviceRemoved,
            Message::ResponseReceived { .. } => CommandTag::ResponseReceived,
            Message::GrblPushReceived { .. } => CommandTag::GrblPushReceived,
            Message::AlarmLatched { .. } => CommandTag::ResponseReceived,
            Message::CommandRejected { .. } => CommandTag::ResponseReceived,
            Message::USBDeviceAdded { .. } => CommandTag::USBDeviceAdded,
            Message::USBDeviceRemoved { .. } => CommandTag::USBDeviceRemoved,
            Message::DataReceived { .. } => CommandTag::DataReceived,
            Message::InitGrbl { .. } => CommandTag::InitGrbl,
            Message::EnableFlowControl => CommandTag::EnableFlowControl,
            Message::DeviceIsSupported { .. } => CommandTag::DeviceIsSupported,
            Message::RegisterClient { .. } => CommandTag::Invalid,
            Message::Shutdown => CommandTag::Shutdown,
        }
    }
}
