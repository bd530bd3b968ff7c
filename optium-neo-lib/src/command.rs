//! The fixed command sequence of the FreeStyle Optium Neo.
//!
//! Every command travels as one 64-byte HID output report:
//!
//! | offset | size | meaning                     |
//! |--------|------|-----------------------------|
//! | 0      | 1    | message type                |
//! | 1      | 1    | length of the text payload  |
//! | 2      | n    | text payload (may be empty) |
//! | 2 + n  | ..   | zero padding                |
//!
//! The four priming commands are bare message types whose binary replies are
//! discarded. Everything after them is a `$query?` text command answered with
//! CR/LF separated lines that end in `CMD OK`.

use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};

use crate::constants::{FRAME_SIZE, REPORT_HEADER_SIZE};
use crate::profile::ProfileField;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum MessageType {
    Ready = 0x01,
    Init = 0x04,
    Handshake = 0x05,
    Session = 0x15,
    /// Text sent by the meter in answer to a `$query?`
    TextReply = 0x06,
    /// `$query?` text sent to the meter
    Text = 0x60,

    #[num_enum(catch_all)]
    Unknown(u8),
}

/// Where the reply of a command ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Priming command, the reply is read and dropped.
    Discard,
    /// Single-line reply stored into one profile field.
    Field(ProfileField),
    /// The multi-frame measurement log.
    Measurements,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Diagnostic label used in logs
    pub label: &'static str,
    pub message_type: MessageType,
    /// Text carried after the report header, empty for priming commands
    pub text: &'static str,
    pub expect_multi: bool,
    pub route: Route,
}

impl CommandSpec {
    const fn prime(label: &'static str, message_type: MessageType) -> Self {
        Self {
            label,
            message_type,
            text: "",
            expect_multi: false,
            route: Route::Discard,
        }
    }

    const fn query(label: &'static str, text: &'static str, field: ProfileField) -> Self {
        Self {
            label,
            message_type: MessageType::Text,
            text,
            expect_multi: false,
            route: Route::Field(field),
        }
    }

    /// Build the output report for this command.
    pub fn payload(&self) -> Bytes {
        let text = self.text.as_bytes();
        let text = &text[..text.len().min(FRAME_SIZE - REPORT_HEADER_SIZE)];

        let mut report = BytesMut::with_capacity(FRAME_SIZE);
        report.put_u8(self.message_type.into());
        report.put_u8(text.len() as u8);
        report.put_slice(text);
        report.resize(FRAME_SIZE, 0);
        report.freeze()
    }
}

/// Session order. Date must come before time, both before the result log.
pub const OPTIUM_NEO_COMMANDS: &[CommandSpec] = &[
    CommandSpec::prime("init", MessageType::Init),
    CommandSpec::prime("handshake", MessageType::Handshake),
    CommandSpec::prime("session", MessageType::Session),
    CommandSpec::prime("ready", MessageType::Ready),
    CommandSpec::query("serlnum", "$serlnum?\r\n", ProfileField::SerialNumber),
    CommandSpec::query("swver", "$swver?\r\n", ProfileField::SoftwareVersion),
    CommandSpec::query("date", "$date?\r\n", ProfileField::Date),
    CommandSpec::query("time", "$time?\r\n", ProfileField::Time),
    CommandSpec::query("ptname", "$ptname?\r\n", ProfileField::PatientName),
    CommandSpec::query("ptid", "$ptid?\r\n", ProfileField::PatientId),
    CommandSpec {
        label: "result",
        message_type: MessageType::Text,
        text: "$result?\r\n",
        expect_multi: true,
        route: Route::Measurements,
    },
];
