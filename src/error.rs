//! Error taxonomy for the mediation pipeline.
//!
//! Anything representable as a typed failure a caller might reasonably
//! branch on lives here. Violations of an internal protocol invariant (a
//! response arriving with nothing pending, for instance) are not modeled as
//! `Result` at all -- they indicate a bug in this crate and panic via
//! `unreachable!`/`debug_assert!` at the call site instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediationError {
    #[error("failed to open serial port {port}: {source}")]
    SerialOpen {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("serial port not connected")]
    NotConnected,

    #[error("serial write failed: {0}")]
    SerialWrite(#[source] std::io::Error),

    #[error("serial read failed: {0}")]
    SerialRead(#[source] std::io::Error),

    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(#[source] serialport::Error),

    #[error("device {usb_id} is not ready to accept commands yet")]
    NotReady { usb_id: String },

    #[error("unknown device: {usb_id}")]
    UnknownDevice { usb_id: String },

    #[error("mailbox closed: {0}")]
    MailboxClosed(&'static str),
}

pub type Result<T> = std::result::Result<T, MediationError>;
