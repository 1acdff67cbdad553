//! Device registry and router: owns device lifecycle, relays hotplug events
//! into the owning `Machine`, and fans machine-emitted events out to
//! interested subscribers.
//!
//! Grounded on `context.cpp`/`context.hpp`'s `Context` actor: the
//! `DeviceMap`, `Operation` enum, subscriber bookkeeping, and the literal
//! subscribe/unsubscribe quirk all carry over; the `recognized_devices_`
//! sort-then-dedup does not, replaced by a plain ordered `Vec` deduped on
//! insert. Where the reference used a ZeroMQ
//! ROUTER socket to fan a reply back to a client identity, this port keeps
//! an explicit `ClientId -> Mailbox` table (`Message::RegisterClient`) since
//! there is no socket layer to learn identities from implicitly.

use crate::actor::{spawn_actor_with, ActorHandle, Mailbox};
use crate::machine;
use crate::message::{ClientId, Message};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

struct Device {
    handle: ActorHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Add,
    Remove,
}

pub struct Registry {
    self_mailbox: Mailbox,
    devices: HashMap<String, Device>,
    recognized_devices: Vec<String>,
    descriptions: HashMap<String, String>,
    device_subscribers: HashSet<ClientId>,
    machine_subscribers: HashMap<String, HashSet<ClientId>>,
    clients: HashMap<ClientId, Mailbox>,
}

impl Registry {
    fn new(self_mailbox: Mailbox) -> Self {
        Registry {
            self_mailbox,
            devices: HashMap::new(),
            recognized_devices: Vec::new(),
            descriptions: HashMap::new(),
            device_subscribers: HashSet::new(),
            machine_subscribers: HashMap::new(),
            clients: HashMap::new(),
        }
    }

    fn register_client(&mut self, id: ClientId, mailbox: Mailbox) {
        self.clients.insert(id, mailbox);
    }

    fn deliver(&self, to: ClientId, message: Message) {
        match self.clients.get(&to) {
            Some(mailbox) => {
                if mailbox.send(message).is_err() {
                    debug!(?to, "client mailbox closed; dropping push");
                }
            }
            None => warn!(?to, "push addressed to an unregistered client; dropping"),
        }
    }

    /// `ListDevices`: remember the requester as a device-lifecycle
    /// subscriber and reply with every recognized device's description.
    fn list_devices(&mut self, from: ClientId) {
        self.device_subscribers.insert(from);
        let devices: Vec<String> = self
            .recognized_devices
            .iter()
            .map(|id| self.descriptions.get(id).cloned().unwrap_or_else(|| id.clone()))
            .collect();
        self.deliver(from, Message::ListDevicesReply { to: from, devices });
    }

    /// `Subscribe{usb_id_1, ..}`: place `from` into `machine_subscribers`
    /// for the first id; for every later id, *remove* `from` instead. This
    /// reproduces a legacy wire quirk rather than a deliberate design --
    /// preserved literally.
    fn subscribe(&mut self, from: ClientId, usb_ids: &[String]) {
        for (i, usb_id) in usb_ids.iter().enumerate() {
            let set = self.machine_subscribers.entry(usb_id.clone()).or_default();
            if i == 0 {
                set.insert(from);
            } else {
                set.remove(&from);
            }
        }
    }

    fn unsubscribe(&mut self, from: ClientId, usb_ids: &[String]) {
        for usb_id in usb_ids {
            if let Some(set) = self.machine_subscribers.get_mut(usb_id) {
                set.remove(&from);
            }
        }
    }

    /// `DeviceIsSupported{usb_id, description}`: append to
    /// `recognized_devices`, deduping on insert so repeated identification
    /// events (e.g. after a reconnect) never produce a second entry -- an
    /// ordered set built directly, rather than the reference's
    /// sort-then-dedup no-op.
    fn mark_supported(&mut self, usb_id: &str, description: String) {
        if !self.recognized_devices.iter().any(|id| id == usb_id) {
            self.recognized_devices.push(usb_id.to_string());
        }
        self.descriptions.insert(usb_id.to_string(), description.clone());
        for to in self.device_subscribers.iter().copied().collect::<Vec<_>>() {
            self.deliver(
                to,
                Message::PushDeviceAdded {
                    to,
                    usb_id: usb_id.to_string(),
                    description: description.clone(),
                },
            );
        }
    }

    fn drop_recognized(&mut self, usb_id: &str) {
        self.recognized_devices.retain(|id| id != usb_id);
        self.descriptions.remove(usb_id);
    }

    fn subscribers_of(&self, usb_id: &str) -> Vec<ClientId> {
        self.machine_subscribers
            .get(usb_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn find_or_create(&mut self, usb_id: &str, port: &str, op: Operation) -> Mailbox {
        if op == Operation::Remove {
            self.drop_recognized(usb_id);
        }
        let self_mailbox = self.self_mailbox.clone();
        let device = self.devices.entry(usb_id.to_string()).or_insert_with(|| {
            info!(usb_id, port, "spawning machine actor for newly seen device");
            let handle = machine::spawn(usb_id.to_string(), self_mailbox);
            Device { handle }
        });
        device.handle.mailbox.clone()
    }

    fn forward_to_machine(&self, usb_id: &str, message: Message) {
        match self.devices.get(usb_id) {
            Some(device) => {
                if device.handle.mailbox.send(message).is_err() {
                    warn!(usb_id, "machine mailbox closed; dropping message");
                }
            }
            None => warn!(usb_id, "command addressed to unknown device; dropping"),
        }
    }
}

/// Spawn the registry as its own actor thread. This is the in-process
/// entry point: `Handle::sender()` (see `crate::handle`) returns a clone of
/// the mailbox this returns.
pub fn spawn() -> ActorHandle {
    spawn_actor_with(
        "registry",
        Registry::new,
        |registry, message| {
            dispatch(registry, message);
            true
        },
    )
}

fn dispatch(registry: &mut Registry, message: Message) {
    match message {
        Message::RegisterClient { id, mailbox } => registry.register_client(id, mailbox),
        Message::ListDevices { from } => registry.list_devices(from),
        Message::Subscribe { from, usb_ids } => registry.subscribe(from, &usb_ids),
        Message::Unsubscribe { from, usb_ids } => registry.unsubscribe(from, &usb_ids),
        Message::USBDeviceAdded { usb_id, port } => {
            let machine = registry.find_or_create(&usb_id, &port, Operation::Add);
            let _ = machine.send(Message::USBDeviceAdded { usb_id, port });
        }
        Message::USBDeviceRemoved { usb_id, port } => {
            for to in registry.device_subscribers.iter().copied().collect::<Vec<_>>() {
                registry.deliver(to, Message::PushDeviceRemoved { to, usb_id: usb_id.clone() });
            }
            let machine = registry.find_or_create(&usb_id, &port, Operation::Remove);
            let _ = machine.send(Message::USBDeviceRemoved { usb_id, port });
        }
        Message::DeviceIsSupported { usb_id, description } => {
            registry.mark_supported(&usb_id, description)
        }
        Message::SendGcode { from, usb_id, line } => {
            registry
                .machine_subscribers
                .entry(usb_id.clone())
                .or_default()
                .insert(from);
            registry.forward_to_machine(&usb_id, Message::SendGcode { from, usb_id, line });
        }
        Message::GrblCommand { from, usb_id, tag } => {
            registry
                .machine_subscribers
                .entry(usb_id.clone())
                .or_default()
                .insert(from);
            registry.forward_to_machine(&usb_id, Message::GrblCommand { from, usb_id, tag });
        }
        Message::ResponseReceived { usb_id, original, message_id, lines, .. } => {
            for to in registry.subscribers_of(&usb_id) {
                registry.deliver(
                    to,
                    Message::ResponseReceived {
                        to,
                        usb_id: usb_id.clone(),
                        original,
                        message_id,
                        lines: lines.clone(),
                    },
                );
            }
        }
        Message::GrblPushReceived { usb_id, lines, .. } => {
            for to in registry.subscribers_of(&usb_id) {
                registry.deliver(
                    to,
                    Message::GrblPushReceived { to, usb_id: usb_id.clone(), lines: lines.clone() },
                );
            }
        }
        Message::AlarmLatched { usb_id, .. } => {
            for to in registry.subscribers_of(&usb_id) {
                registry.deliver(to, Message::AlarmLatched { to, usb_id: usb_id.clone() });
            }
        }
        Message::CommandRejected { to, usb_id, reason } => {
            registry.deliver(to, Message::CommandRejected { to, usb_id, reason });
        }
        Message::Shutdown => {
            for (_, device) in registry.devices.drain() {
                let _ = device.handle.mailbox.send(Message::Shutdown);
                device.handle.join();
            }
        }
        _ => {}
    }
}
