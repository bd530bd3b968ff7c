use std::io;
use std::time::Duration;

use nusb::transfer::TransferError;
use thiserror::Error;

use crate::profile::ProfileField;

/// Failures at the USB layer. Any of these ends the current session.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Unable to open USB device: {0}")]
    Open(#[source] io::Error),

    #[error("Opened device {vendor_id:04x}:{product_id:04x} is not the expected meter")]
    WrongDevice { vendor_id: u16, product_id: u16 },

    #[error("Unable to detach kernel driver from interface {interface}: {source}")]
    DetachDriver { interface: u8, source: io::Error },

    #[error("Unable to claim interface {interface}: {source}")]
    Claim { interface: u8, source: io::Error },

    #[error("Unable to clear halt on endpoint {endpoint:#04x}: {source}")]
    ClearHalt { endpoint: u8, source: io::Error },

    #[error("Control transfer failed: {0}")]
    Control(#[source] TransferError),

    #[error("Unable to read data: {0}")]
    Bulk(#[source] TransferError),

    #[error("Timeout during USB {operation} after {after:?}")]
    Timeout { operation: &'static str, after: Duration },

    #[error("Not all data was sent to device: {sent} of {expected} bytes")]
    PartialWrite { sent: usize, expected: usize },

    #[error("Interface {0} is not claimed")]
    NotClaimed(u8),

    #[error("Unable to release interface {interface}: {source}")]
    Release { interface: u8, source: io::Error },

    #[error("Unable to re-attach kernel driver to interface {interface}: {source}")]
    Reattach { interface: u8, source: io::Error },
}

/// The primary error type for the `optium-neo-lib` library.
#[derive(Error, Debug)]
pub enum MeterError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("No terminator in reply to {command} after {frames} frame(s)")]
    ParseTimeout { command: &'static str, frames: usize },

    #[error("Malformed {field} reply: {reason}")]
    MalformedField { field: ProfileField, reason: String },

    #[error("Session finished without a value for {0}")]
    MissingField(ProfileField),

    #[error("{0} was already written in this session")]
    FieldAlreadySet(ProfileField),

    #[error("No meter family registered for {vendor_id:04x}:{product_id:04x}")]
    UnsupportedDevice { vendor_id: u16, product_id: u16 },

    #[error("USB error: {0}")]
    Usb(#[from] nusb::Error),

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
