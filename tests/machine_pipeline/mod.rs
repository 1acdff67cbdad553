//! Drives a real, thread-backed `Machine` actor (`grbl_link::machine::spawn`)
//! over its mailbox and asserts on what it sends back to its parent -- the
//! handshake, identification, alarm, and rejection scenarios, reproduced
//! across an actual thread boundary rather than against the bare struct the
//! way `src/machine.rs`'s own unit tests do.

use std::sync::mpsc;
use std::time::Duration;

use grbl_link::command::CommandTag;
use grbl_link::machine;
use grbl_link::message::{ClientId, Message, RejectReason};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn expect(rx: &mpsc::Receiver<Message>) -> Message {
    rx.recv_timeout(RECV_TIMEOUT)
        .expect("expected a message from the machine actor within the timeout")
}

fn expect_none(rx: &mpsc::Receiver<Message>) {
    match rx.recv_timeout(Duration::from_millis(200)) {
        Err(mpsc::RecvTimeoutError::Timeout) => {}
        other => panic!("expected no message, got {other:?}"),
    }
}

/// Scenario 1 + 2: startup handshake followed by Ghost Gunner identification.
#[test]
fn startup_handshake_then_identification_reaches_parent() {
    let (parent_tx, parent_rx) = mpsc::channel();
    let handle = machine::spawn("SN1".to_string(), parent_tx);

    handle
        .mailbox
        .send(Message::USBDeviceAdded {
            usb_id: "SN1".to_string(),
            port: "/dev/does-not-exist".to_string(),
        })
        .unwrap();

    handle
        .mailbox
        .send(Message::DataReceived {
            usb_id: "SN1".to_string(),
            line: "Grbl 1.1h ['$' for help]".to_string(),
        })
        .unwrap();

    // The startup banner does not itself produce a parent-bound message --
    // it silently kicks off the $I version probe -- so nothing should have
    // arrived yet.
    expect_none(&parent_rx);

    handle
        .mailbox
        .send(Message::DataReceived {
            usb_id: "SN1".to_string(),
            line: "[VER:1.1h.20190825:DD GG3v1.2]".to_string(),
        })
        .unwrap();
    handle
        .mailbox
        .send(Message::DataReceived {
            usb_id: "SN1".to_string(),
            line: "ok".to_string(),
        })
        .unwrap();

    match expect(&parent_rx) {
        Message::DeviceIsSupported { usb_id, description } => {
            assert_eq!(usb_id, "SN1");
            assert!(
                description.starts_with("Ghost Gunner GG3v1 ("),
                "unexpected description: {description}"
            );
        }
        other => panic!("expected DeviceIsSupported, got {other:?}"),
    }

    handle.mailbox.send(Message::Shutdown).unwrap();
    handle.join();
}

/// Firmware below 0.9 is ignored (stays below `Grbl` state): a command sent
/// right after is still rejected as not-ready, proving the handshake never
/// advanced past `Connected`.
#[test]
fn unsupported_firmware_leaves_machine_not_ready() {
    let (parent_tx, parent_rx) = mpsc::channel();
    let handle = machine::spawn("SN2".to_string(), parent_tx);

    handle
        .mailbox
        .send(Message::USBDeviceAdded {
            usb_id: "SN2".to_string(),
            port: "/dev/does-not-exist".to_string(),
        })
        .unwrap();
    handle
        .mailbox
        .send(Message::DataReceived {
            usb_id: "SN2".to_string(),
            line: "Grbl 0.8c ['$' for help]".to_string(),
        })
        .unwrap();

    let from = ClientId::new();
    handle
        .mailbox
        .send(Message::SendGcode {
            from,
            usb_id: "SN2".to_string(),
            line: b"G0 X1\n".to_vec(),
        })
        .unwrap();

    match expect(&parent_rx) {
        Message::CommandRejected { to, reason, .. } => {
            assert_eq!(to, from);
            assert_eq!(reason, RejectReason::NotReady);
        }
        other => panic!("expected CommandRejected, got {other:?}"),
    }

    handle.mailbox.send(Message::Shutdown).unwrap();
    handle.join();
}

/// Scenario 7: a command addressed to a machine that never saw a USB attach
/// at all is rejected, not silently dropped.
#[test]
fn pre_grbl_command_rejected_not_silently_dropped() {
    let (parent_tx, parent_rx) = mpsc::channel();
    let handle = machine::spawn("SN3".to_string(), parent_tx);

    let from = ClientId::new();
    handle
        .mailbox
        .send(Message::GrblCommand {
            from,
            usb_id: "SN3".to_string(),
            tag: CommandTag::GrblStatus,
        })
        .unwrap();

    match expect(&parent_rx) {
        Message::CommandRejected { to, usb_id, reason } => {
            assert_eq!(to, from);
            assert_eq!(usb_id, "SN3");
            assert_eq!(reason, RejectReason::NotReady);
        }
        other => panic!("expected CommandRejected, got {other:?}"),
    }

    handle.mailbox.send(Message::Shutdown).unwrap();
    handle.join();
}

/// An ALARM line latches and is relayed to the parent as its own message
/// rather than only being visible as suppressed sends.
#[test]
fn alarm_latches_and_is_relayed_to_parent() {
    let (parent_tx, parent_rx) = mpsc::channel();
    let handle = machine::spawn("SN4".to_string(), parent_tx);

    handle
        .mailbox
        .send(Message::USBDeviceAdded {
            usb_id: "SN4".to_string(),
            port: "/dev/does-not-exist".to_string(),
        })
        .unwrap();
    handle
        .mailbox
        .send(Message::DataReceived {
            usb_id: "SN4".to_string(),
            line: "Grbl 1.1h ['$' for help]".to_string(),
        })
        .unwrap();
    handle
        .mailbox
        .send(Message::DataReceived {
            usb_id: "SN4".to_string(),
            line: "[VER:1.1h.20190825:DD GG3v1.2]".to_string(),
        })
        .unwrap();
    handle
        .mailbox
        .send(Message::DataReceived {
            usb_id: "SN4".to_string(),
            line: "ok".to_string(),
        })
        .unwrap();
    let _ = expect(&parent_rx); // DeviceIsSupported, asserted in another test

    handle
        .mailbox
        .send(Message::DataReceived {
            usb_id: "SN4".to_string(),
            line: "ALARM:1".to_string(),
        })
        .unwrap();

    match expect(&parent_rx) {
        Message::AlarmLatched { usb_id, .. } => assert_eq!(usb_id, "SN4"),
        other => panic!("expected AlarmLatched, got {other:?}"),
    }

    handle.mailbox.send(Message::Shutdown).unwrap();
    handle.join();
}

/// An unsolicited push arriving once identified is forwarded to the parent
/// unchanged, same as a response.
#[test]
fn push_message_is_forwarded_once_identified() {
    let (parent_tx, parent_rx) = mpsc::channel();
    let handle = machine::spawn("SN5".to_string(), parent_tx);

    handle
        .mailbox
        .send(Message::USBDeviceAdded {
            usb_id: "SN5".to_string(),
            port: "/dev/does-not-exist".to_string(),
        })
        .unwrap();
    handle
        .mailbox
        .send(Message::DataReceived {
            usb_id: "SN5".to_string(),
            line: "Grbl 1.1h ['$' for help]".to_string(),
        })
        .unwrap();
    handle
        .mailbox
        .send(Message::DataReceived {
            usb_id: "SN5".to_string(),
            line: "[VER:1.1h.20190825:DD GG3v1.2]".to_string(),
        })
        .unwrap();
    handle
        .mailbox
        .send(Message::DataReceived {
            usb_id: "SN5".to_string(),
            line: "ok".to_string(),
        })
        .unwrap();
    let _ = expect(&parent_rx); // DeviceIsSupported

    handle
        .mailbox
        .send(Message::DataReceived {
            usb_id: "SN5".to_string(),
            line: "[MSG:Reset to continue]".to_string(),
        })
        .unwrap();

    match expect(&parent_rx) {
        Message::GrblPushReceived { usb_id, lines, .. } => {
            assert_eq!(usb_id, "SN5");
            assert_eq!(lines, vec!["[MSG:Reset to continue]".to_string()]);
        }
        other => panic!("expected GrblPushReceived, got {other:?}"),
    }

    handle.mailbox.send(Message::Shutdown).unwrap();
    handle.join();
}
