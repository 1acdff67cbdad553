//! Blocking serial transport: the byte-level collaborator a `Machine` owns
//! exclusively.
//!
//! Descends from an earlier `communication/serial.rs` that
//! opened/configured/read/wrote a `serialport::SerialPort` behind an async
//! `Arc<Mutex<_>>` guard. This port keeps the same 115200-8-N-1 settings and
//! open/transmit shape but drops the `tokio` guard in favor of a
//! thread/mailbox actor model: a dedicated reader thread owns the port for
//! reads and line-frames inbound bytes into `Message::DataReceived`, while
//! writes happen synchronously from the owning `Machine`'s thread through a
//! cloned handle.

use crate::error::{MediationError, Result};
use crate::message::Message;
use serialport::SerialPort;
use std::io::Read;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Serial port configuration. The values here are fixed by the Grbl wire
/// contract; the type exists mainly so tests don't repeat five positional
/// arguments.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: serialport::DataBits,
    pub stop_bits: serialport::StopBits,
    pub parity: serialport::Parity,
    pub flow_control: serialport::FlowControl,
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            baud_rate: 115200,
            data_bits: serialport::DataBits::Eight,
            stop_bits: serialport::StopBits::One,
            parity: serialport::Parity::None,
            flow_control: serialport::FlowControl::None,
            timeout: Duration::from_millis(200),
        }
    }
}

/// Accumulates raw bytes into newline-terminated lines, discarding `\r` and
/// non-printable bytes.
#[derive(Default)]
struct LineFramer {
    buf: String,
}

impl LineFramer {
    /// Feed a chunk of raw bytes, returning every complete line it produced.
    fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            match byte {
                b'\n' => {
                    lines.push(std::mem::take(&mut self.buf));
                }
                b'\r' => {}
                0x20..=0x7e => self.buf.push(byte as char),
                _ => {}
            }
        }
        lines
    }
}

/// A device's serial connection. `None` when detached (no port open, e.g.
/// before the owning `Machine` has seen `USBDeviceAdded`, or in tests that
/// never touch real hardware).
pub struct SerialConnection {
    usb_id: String,
    config: SerialConfig,
    port: Option<Box<dyn SerialPort>>,
    port_name: Option<String>,
    reader: Option<JoinHandle<()>>,
    stop: Arc<Mutex<bool>>,
}

impl SerialConnection {
    /// A connection with no backing port: used by a freshly-constructed
    /// `Machine` before it has an address to open, and by unit tests that
    /// only exercise protocol state, never real I/O.
    pub fn detached(usb_id: impl Into<String>) -> Self {
        SerialConnection {
            usb_id: usb_id.into(),
            config: SerialConfig::default(),
            port: None,
            port_name: None,
            reader: None,
            stop: Arc::new(Mutex::new(false)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// Open `path` at the fixed Grbl settings and spawn a reader thread that
    /// line-frames inbound bytes and forwards each as
    /// `Message::DataReceived{usb_id, line}` to `to_machine`.
    pub fn connect(&mut self, path: &str, to_machine: Sender<Message>) -> Result<()> {
        let port = serialport::new(path, self.config.baud_rate)
            .data_bits(self.config.data_bits)
            .stop_bits(self.config.stop_bits)
            .parity(self.config.parity)
            .flow_control(self.config.flow_control)
            .timeout(self.config.timeout)
            .open()
            .map_err(|source| MediationError::SerialOpen {
                port: path.to_string(),
                source,
            })?;

        let reader_port = port.try_clone().map_err(|source| MediationError::SerialOpen {
            port: path.to_string(),
            source,
        })?;

        self.port = Some(port);
        self.port_name = Some(path.to_string());
        *self.stop.lock().expect("stop mutex poisoned") = false;

        let usb_id = self.usb_id.clone();
        let stop = Arc::clone(&self.stop);
        self.reader = Some(spawn_reader(usb_id, reader_port, to_machine, stop));

        Ok(())
    }

    pub fn disconnect(&mut self) {
        *self.stop.lock().expect("stop mutex poisoned") = true;
        self.port = None;
        self.port_name = None;
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }

    /// Write raw bytes (already the exact on-wire payload, e.g. from
    /// `command::wire_payload`) to the open port.
    pub fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(MediationError::NotConnected)?;
        std::io::Write::write_all(port, data).map_err(MediationError::SerialWrite)?;
        port.flush().map_err(MediationError::SerialWrite)
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn spawn_reader(
    usb_id: String,
    mut port: Box<dyn SerialPort>,
    to_machine: Sender<Message>,
    stop: Arc<Mutex<bool>>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("serial-reader-{usb_id}"))
        .spawn(move || {
            let mut framer = LineFramer::default();
            let mut chunk = [0u8; 256];
            loop {
                if *stop.lock().expect("stop mutex poisoned") {
                    break;
                }
                match port.read(&mut chunk) {
                    Ok(0) => continue,
                    Ok(n) => {
                        for line in framer.feed(&chunk[..n]) {
                            let message = Message::DataReceived {
                                usb_id: usb_id.clone(),
                                line,
                            };
                            if to_machine.send(message).is_err() {
                                debug!(%usb_id, "machine mailbox closed; stopping reader");
                                return;
                            }
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => {
                        warn!(%usb_id, error = %e, "serial read failed; stopping reader");
                        let _ = to_machine.send(Message::USBDeviceRemoved {
                            usb_id: usb_id.clone(),
                            port: String::new(),
                        });
                        return;
                    }
                }
            }
        })
        .expect("failed to spawn serial reader thread")
}

/// Enumerate ports visible to the host platform via `serialport`. Used by
/// `hotplug::PollingHotplug` to diff snapshots and by `Registry::find_or_create`
/// to pick a port when the caller supplied none.
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
    serialport::available_ports().map_err(MediationError::Enumerate)
}
