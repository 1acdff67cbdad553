//! USB hotplug enumeration, abstracted behind a trait so a host can supply a
//! native platform notifier instead of the polling default.
//!
//! Grounded on `communication/usb/hotplug.cpp`'s `Hotplug` actor: the same
//! enumerate-then-diff loop against a `DeviceMap` keyed by serial number,
//! pushing `USBDeviceAdded`/`USBDeviceRemoved` for whatever changed between
//! two snapshots. The reference walked raw `libusbp` device descriptors at a
//! 100 microsecond cadence; this port enumerates through the `serialport`
//! crate this crate already depends on for the transport, and polls on a
//! coarser interval since there is no native hotplug callback to fall back
//! to cross-platform.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::serial;

/// One hotplug transition: a device appeared or disappeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Added { serial: String, port: String },
    Removed { serial: String, port: String },
}

/// A source of hotplug events. Implemented by [`PollingHotplug`]; a host
/// embedding this crate on a platform with a native USB notification API can
/// supply its own implementation instead.
pub trait HotplugSource {
    fn events(&self) -> Receiver<HotplugEvent>;
}

/// Polls `serialport::available_ports()` on an interval and diffs successive
/// snapshots against the last-seen `serial -> port` map, the same structure
/// as the reference's `device_list_`.
pub struct PollingHotplug {
    interval: Duration,
}

impl PollingHotplug {
    pub fn new(interval: Duration) -> Self {
        PollingHotplug { interval }
    }
}

impl Default for PollingHotplug {
    /// A coarser cadence than the reference's 100 microsecond spin: polling
    /// `serialport::available_ports()` is a syscall-heavy enumeration, not a
    /// descriptor walk, so this runs a few times a second instead.
    fn default() -> Self {
        PollingHotplug::new(Duration::from_millis(250))
    }
}

impl HotplugSource for PollingHotplug {
    fn events(&self) -> Receiver<HotplugEvent> {
        let (tx, rx) = mpsc::channel();
        let interval = self.interval;
        spawn_poller(tx, interval);
        rx
    }
}

fn spawn_poller(tx: Sender<HotplugEvent>, interval: Duration) -> JoinHandle<()> {
    thread::Builder::new()
        .name("hotplug-poll".to_string())
        .spawn(move || {
            let mut known: HashMap<String, String> = HashMap::new();
            loop {
                let snapshot = match enumerate() {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!(error = %e, "usb enumeration failed; retrying");
                        thread::sleep(interval);
                        continue;
                    }
                };

                for (serial, port) in &snapshot {
                    if !known.contains_key(serial) {
                        debug!(%serial, %port, "hotplug: device added");
                        if tx
                            .send(HotplugEvent::Added {
                                serial: serial.clone(),
                                port: port.clone(),
                            })
                            .is_err()
                        {
                            return;
                        }
                    }
                }

                for (serial, port) in &known {
                    if !snapshot.contains_key(serial) {
                        debug!(%serial, %port, "hotplug: device removed");
                        if tx
                            .send(HotplugEvent::Removed {
                                serial: serial.clone(),
                                port: port.clone(),
                            })
                            .is_err()
                        {
                            return;
                        }
                    }
                }

                known = snapshot;
                thread::sleep(interval);
            }
        })
        .expect("failed to spawn hotplug poller thread")
}

/// One enumeration pass: serial ports keyed by USB serial number, falling
/// back to the port name itself when the platform doesn't report one (e.g.
/// some virtual/loopback ports).
fn enumerate() -> crate::error::Result<HashMap<String, String>> {
    let ports = serial::list_ports()?;
    let mut map = HashMap::with_capacity(ports.len());
    for port in ports {
        let key = match &port.port_type {
            serialport::SerialPortType::UsbPort(info) => info
                .serial_number
                .clone()
                .unwrap_or_else(|| port.port_name.clone()),
            _ => port.port_name.clone(),
        };
        map.insert(key, port.port_name.clone());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn added_and_removed_events_are_distinct() {
        let added = HotplugEvent::Added {
            serial: "SN1".to_string(),
            port: "/dev/ttyUSB0".to_string(),
        };
        let removed = HotplugEvent::Removed {
            serial: "SN1".to_string(),
            port: "/dev/ttyUSB0".to_string(),
        };
        assert_ne!(added, removed);
    }

    #[test]
    fn default_polling_interval_is_sub_second() {
        let hotplug = PollingHotplug::default();
        assert!(hotplug.interval < Duration::from_secs(1));
    }
}
