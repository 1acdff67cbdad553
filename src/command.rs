//! Command tags, the public wire-level discriminants, and the static
//! per-command flow-control policy table.

use serde::{Deserialize, Serialize};

/// Stable wire-level identifier for every message variant this crate moves
/// between components. The numeric values are a documented external
/// contract, not an implementation detail -- a host that logs or displays
/// them needs them to stay fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandTag {
    Invalid = 0,
    ListDevices = 1,
    Subscribe = 2,
    Unsubscribe = 3,
    SendGcode = 4,
    ExecuteProgram = 5,
    GrblHelp = 6,
    GrblStatus = 7,
    GrblSettings = 8,
    GrblVersion = 9,
    GrblHome = 10,
    GrblParams = 11,
    GrblParserState = 12,
    GrblStartupBlocks = 13,
    GrblCheckModeToggle = 14,
    GrblResetAlarm = 15,
    GrblSoftReset = 16,
    GrblCycleToggle = 17,
    GrblFeedHold = 18,
    GrblJogCancel = 19,
    ResponseReceived = 123,
    NowExecuting = 124,
    PushDeviceRemoved = 125,
    PushDeviceAdded = 126,
    ListDevicesReply = 127,
    GrblPushReceived = 248,
    DeviceIsSupported = 249,
    EnableFlowControl = 250,
    DataReceived = 251,
    InitGrbl = 252,
    USBDeviceRemoved = 253,
    USBDeviceAdded = 254,
    Shutdown = 255,
}

/// Where an admitted request is placed in the flow controller's queues.
///
/// `Reconnect` names the synthetic USB-attach/detach trigger's placement for
/// documentation purposes; no `CommandTag` in `send_flags` carries it since
/// that trigger's payload is always empty and is never queued -- see
/// `FlowController::reconnect`, which implements its effect directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePosition {
    Reconnect,
    Reset,
    Back,
    Front,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Realtime {
    Realtime,
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Buffering {
    NoBuffer,
    CanBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineShape {
    Multiline,
    SingleLine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Planned {
    Planned,
    Unplanned,
}

/// Per-command flow-control policy. See the static table below for the
/// exact entry per [`CommandTag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendFlags {
    pub position: QueuePosition,
    pub realtime: Realtime,
    pub buffer: Buffering,
    pub lineshape: LineShape,
    pub planned: Planned,
}

impl SendFlags {
    /// Static validity relationships that must hold for every table entry.
    /// Checked once in a unit test over the whole table below, not at
    /// runtime -- a violation here is a typo in this file, not a condition
    /// the caller could trigger.
    const fn is_internally_consistent(&self) -> bool {
        use Buffering::*;
        use LineShape::*;
        use Planned::*;
        use QueuePosition::*;
        use Realtime::*;

        if matches!(self.position, Reset) {
            if !matches!(self.realtime, Queued) {
                return false;
            }
            if !matches!(self.planned, Unplanned) {
                return false;
            }
            if !matches!(self.lineshape, SingleLine) {
                return false;
            }
        }
        if matches!(self.realtime, Realtime) {
            if !matches!(self.planned, Unplanned) {
                return false;
            }
            if !matches!(self.lineshape, SingleLine) {
                return false;
            }
        }
        if matches!(self.planned, Planned) {
            if !matches!(self.buffer, CanBuffer) {
                return false;
            }
            if !matches!(self.lineshape, SingleLine) {
                return false;
            }
        }
        true
    }
}

/// Returns the flow-control policy for every `CommandTag` that can be sent
/// down to a device. Tags with no send-side meaning (events, pushes, replies)
/// have no entry and are not expected to be looked up here.
pub const fn send_flags(tag: CommandTag) -> Option<SendFlags> {
    use Buffering::*;
    use LineShape::*;
    use Planned::*;
    use QueuePosition::*;
    use Realtime::*;

    let flags = match tag {
        CommandTag::GrblHelp
        | CommandTag::GrblParams
        | CommandTag::GrblSettings
        | CommandTag::GrblStartupBlocks
        | CommandTag::GrblVersion => SendFlags {
            position: Back,
            realtime: Queued,
            buffer: NoBuffer,
            lineshape: Multiline,
            planned: Unplanned,
        },
        CommandTag::GrblStatus
        | CommandTag::GrblCycleToggle
        | CommandTag::GrblFeedHold
        | CommandTag::GrblJogCancel => SendFlags {
            position: Front,
            realtime: Realtime,
            buffer: CanBuffer,
            lineshape: SingleLine,
            planned: Unplanned,
        },
        CommandTag::GrblHome | CommandTag::GrblParserState | CommandTag::GrblCheckModeToggle => {
            SendFlags {
                position: Back,
                realtime: Queued,
                buffer: NoBuffer,
                lineshape: SingleLine,
                planned: Unplanned,
            }
        }
        CommandTag::GrblResetAlarm => SendFlags {
            position: Front,
            realtime: Queued,
            buffer: CanBuffer,
            lineshape: SingleLine,
            planned: Unplanned,
        },
        CommandTag::GrblSoftReset => SendFlags {
            position: Reset,
            realtime: Queued,
            buffer: CanBuffer,
            lineshape: SingleLine,
            planned: Unplanned,
        },
        CommandTag::SendGcode => SendFlags {
            position: Back,
            realtime: Queued,
            buffer: CanBuffer,
            lineshape: SingleLine,
            planned: Planned,
        },
        _ => return None,
    };
    Some(flags)
}

/// Exact on-wire bytes the machine injects for each Grbl command tag that
/// carries no caller-supplied payload. `GrblSoftReset`/`GrblStatus`/
/// `GrblCycleToggle`/`GrblFeedHold`/`GrblJogCancel` are single control
/// bytes sent outside the line-buffered protocol.
pub fn wire_payload(tag: CommandTag) -> &'static [u8] {
    match tag {
        CommandTag::GrblHelp => b"$\n",
        CommandTag::GrblSettings => b"$$\n",
        CommandTag::GrblVersion => b"$I\n",
        CommandTag::GrblHome => b"$H\n",
        CommandTag::GrblParams => b"$#\n",
        CommandTag::GrblParserState => b"$G\n",
        CommandTag::GrblStartupBlocks => b"$N\n",
        CommandTag::GrblCheckModeToggle => b"$C\n",
        CommandTag::GrblResetAlarm => b"$X\n",
        CommandTag::GrblStatus => b"?",
        CommandTag::GrblCycleToggle => b"~",
        CommandTag::GrblFeedHold => b"!",
        CommandTag::GrblJogCancel => &[0x85],
        CommandTag::GrblSoftReset => &[0x18],
        _ => b"",
    }
}

/// True for the tags that should clear a latched alarm instead of being
/// blocked by one.
pub fn clears_alarm(tag: CommandTag) -> bool {
    matches!(tag, CommandTag::GrblResetAlarm | CommandTag::GrblSoftReset)
}
