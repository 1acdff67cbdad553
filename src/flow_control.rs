//! Flow-control scheduling: the budget/admission logic that keeps a Grbl
//! device's 127-byte receive buffer from overflowing while interleaving
//! realtime control bytes with the queued command stream.
//!
//! `FlowController` is owned exclusively by its `Machine` (see
//! `crate::machine`) rather than running on its own thread: the Machine's
//! actor loop is already the only thing that ever touches it, so a second
//! thread/mailbox hop here would add latency without adding isolation.

use crate::classifier::{Classifier, LineKind};
use crate::command::{self, Buffering, CommandTag, Planned, QueuePosition, Realtime, SendFlags};
use tracing::{debug, trace, warn};

const RECEIVE_BUFFER_LIMIT: usize = 127;

#[derive(Debug, Clone)]
pub struct Pending {
    pub tag: CommandTag,
    pub payload: Vec<u8>,
    pub flags: SendFlags,
    /// The client-stamped id this request carried, if any. Machine-internal
    /// probes (e.g. the post-handshake `$I` version request) have none.
    pub message_id: Option<u64>,
}

struct Queued {
    tag: CommandTag,
    payload: Vec<u8>,
    flags: SendFlags,
    message_id: Option<u64>,
}

/// What the caller should do in reaction to a classified inbound line.
pub enum Reaction {
    /// Nothing externally visible; state updated internally.
    None,
    /// A startup banner was seen; hand its captured text to the Machine.
    Startup { lines: Vec<String> },
    /// An unsolicited push arrived.
    Push { lines: Vec<String> },
    /// A response (or best-effort unknown line) paired with a pending
    /// command; hand it to the Machine for routing. `freed` is any bytes
    /// newly admitted for transmission now that the pairing freed budget.
    Paired {
        pending: Pending,
        lines: Vec<String>,
        freed: Vec<Vec<u8>>,
    },
    /// The alarm state just latched.
    AlarmLatched,
}

pub struct FlowController {
    active: bool,
    alarm: bool,
    used: usize,
    incoming: std::collections::VecDeque<Queued>,
    outgoing: std::collections::VecDeque<Pending>,
    realtime: Option<Pending>,
    classifier: Classifier,
}

impl Default for FlowController {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowController {
    pub fn new() -> Self {
        FlowController {
            active: false,
            alarm: false,
            used: 0,
            incoming: std::collections::VecDeque::new(),
            outgoing: std::collections::VecDeque::new(),
            realtime: None,
            classifier: Classifier::new(),
        }
    }

    pub fn enable(&mut self) {
        self.active = true;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_alarmed(&self) -> bool {
        self.alarm
    }

    /// Queue a request for transmission, applying the static `SendFlags`
    /// policy for `tag`. Returns the bytes to transmit immediately if flow
    /// control is not yet active (pre-`EnableFlowControl`, every request
    /// passes straight through). `message_id` is the client-stamped id to
    /// echo back on the eventual paired response, or `None` for a
    /// Machine-internal probe with no originating client.
    pub fn queue(&mut self, tag: CommandTag, payload: Vec<u8>, message_id: Option<u64>) -> Vec<Vec<u8>> {
        if !self.active {
            return vec![payload];
        }

        let flags = command::send_flags(tag).expect("queue() called with a non-sendable tag");
        let clears = command::clears_alarm(tag);

        // Reset clears the incoming queue before inserting the request
        // itself, so the soft-reset command still gets transmitted and runs
        // its own state-clearing branch in `run()` on admission. The
        // synthetic Reconnect trigger (see `reconnect()`) has no `CommandTag`
        // of its own -- it never reaches this per-tag path at all.
        if flags.position == QueuePosition::Reset {
            self.incoming.clear();
        }

        if !payload.is_empty() {
            let entry = Queued { tag, payload, flags, message_id };
            if flags.position == QueuePosition::Back {
                self.incoming.push_back(entry);
            } else {
                self.incoming.push_front(entry);
            }
        }

        self.run(clears)
    }

    /// The synthetic Reconnect trigger `USBDeviceAdded`/`USBDeviceRemoved`
    /// enqueue ahead of forwarding the event itself: clears `outgoing` and
    /// zeros `used`, then behaves like `Reset` by also clearing `incoming`.
    /// Its triggering payload is always empty, so unlike a real queued
    /// request it never occupies a slot and never runs the admission loop.
    pub fn reconnect(&mut self) {
        self.outgoing.clear();
        self.used = 0;
        self.incoming.clear();
    }

    /// Drain as many admissible queued requests as the budget and buffer
    /// state allow, returning the raw bytes to transmit for each, in order.
    pub fn run(&mut self, clears_alarm: bool) -> Vec<Vec<u8>> {
        let mut to_transmit = Vec::new();

        if self.alarm && !clears_alarm {
            return to_transmit;
        }

        loop {
            let available = RECEIVE_BUFFER_LIMIT.saturating_sub(self.used);
            let Some(front) = self.incoming.front() else {
                break;
            };

            let admissible = match (front.flags.planned, front.flags.buffer, front.flags.realtime)
            {
                (Planned::Planned, _, _) => front.payload.len() <= available,
                (Planned::Unplanned, Buffering::NoBuffer, _) => self.outgoing.is_empty(),
                (Planned::Unplanned, Buffering::CanBuffer, Realtime::Realtime) => {
                    self.realtime.is_none()
                }
                (Planned::Unplanned, Buffering::CanBuffer, Realtime::Queued) => true,
            };

            if !admissible {
                break;
            }

            let entry = self.incoming.pop_front().expect("front() just matched");

            if entry.flags.planned == Planned::Planned {
                self.used += entry.payload.len();
            }

            if entry.flags.position == QueuePosition::Reset {
                self.active = false;
                self.outgoing.clear();
                self.incoming.clear();
                self.realtime = None;
                self.used = 0;
            }

            let start_multiline = entry.flags.lineshape == command::LineShape::Multiline;
            let pending = Pending {
                tag: entry.tag,
                payload: entry.payload.clone(),
                flags: entry.flags,
                message_id: entry.message_id,
            };

            to_transmit.push(entry.payload);

            if entry.flags.position != QueuePosition::Reset {
                if entry.flags.realtime == Realtime::Realtime {
                    self.realtime = Some(pending);
                } else {
                    self.outgoing.push_back(pending);
                }
            }

            if start_multiline {
                self.classifier.start_multiline();
            }
        }

        to_transmit
    }

    /// Classify one received line and react: pair it with a pending
    /// command, surface a push/startup/alarm event, or quietly buffer a
    /// multiline continuation.
    ///
    /// `LineKind::Status` is handled here as its own case -- a real status
    /// frame pairs with the realtime slot, not the queued FIFO -- but
    /// `Classifier::classify` never actually returns it for a `<...>` line;
    /// it returns `Startup` instead, reproducing the reference mediator's
    /// classifier bug byte-for-byte. This case exists for the corrected
    /// contract and to document exactly where the quirk actually lives
    /// (in `Classifier::classify`, not here).
    pub fn receive(&mut self, line: &str) -> Reaction {
        let kind = self.classifier.classify(line);
        match kind {
            LineKind::Empty => {
                self.classifier.reset();
                Reaction::None
            }
            LineKind::Startup => {
                let lines = self.classifier.dump();
                Reaction::Startup { lines }
            }
            LineKind::Status => self.pair_response(true),
            LineKind::Push => {
                let lines = self.classifier.dump();
                Reaction::Push { lines }
            }
            LineKind::Alarm => {
                self.classifier.reset();
                self.alarm = true;
                Reaction::AlarmLatched
            }
            LineKind::Response | LineKind::MultilineDone | LineKind::Unknown => {
                self.pair_response(false)
            }
            LineKind::Multiline => {
                trace!("multiline continuation buffered");
                Reaction::None
            }
        }
    }

    /// Pair the just-classified line with its pending command. `realtime_only`
    /// is set for a status frame (`?`), which must pair with the realtime
    /// slot specifically rather than falling back to the queued FIFO --
    /// a status reply arriving with no realtime command in flight is
    /// dropped, not misattributed to an unrelated queued command.
    fn pair_response(&mut self, realtime_only: bool) -> Reaction {
        let pending = if realtime_only {
            self.realtime.take()
        } else if self.realtime.is_some() {
            self.realtime.take()
        } else {
            self.outgoing.pop_front()
        };

        let Some(pending) = pending else {
            debug!("response received with nothing pending; dropping");
            self.classifier.reset();
            return Reaction::None;
        };

        if pending.flags.planned == Planned::Planned {
            self.used = self.used.saturating_sub(pending.payload.len());
        }

        let clears = command::clears_alarm(pending.tag);
        if clears {
            self.clear_alarm();
        }

        let lines = self.classifier.dump();
        let freed = self.run(clears);
        Reaction::Paired { pending, lines, freed }
    }

    pub fn clear_alarm(&mut self) {
        self.alarm = false;
    }
}
