//! Shared test fixtures: a scripted transport and a canned meter conversation

// Not every test file uses every helper
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};
use nusb::transfer::TransferError;

pub use optium_neo_lib::{
    ControlRequest, DriverState, ExportRecord, Exporter, MeterError, SessionConfig, Transport, TransportError,
};
use optium_neo_lib::command::MessageType;
use optium_neo_lib::constants::FRAME_SIZE;

/// A device reply frame: text reply type, length byte, text, zero padding.
pub fn text_frame(text: &str) -> Bytes {
    let mut frame = vec![MessageType::TextReply.into(), text.len() as u8];
    frame.extend_from_slice(text.as_bytes());
    if frame.len() < FRAME_SIZE {
        frame.resize(FRAME_SIZE, 0);
    }
    Bytes::from(frame)
}

/// Binary acknowledgement of a priming command, never carries the terminator.
pub fn ack_frame(message_type: u8) -> Bytes {
    let mut frame = vec![message_type, 0x00];
    frame.resize(FRAME_SIZE, 0);
    Bytes::from(frame)
}

/// Complete single-frame reply to a `$query?` command.
pub fn field_reply(payload: &str) -> VecDeque<Bytes> {
    VecDeque::from(vec![text_frame(&format!("{}\r\nCKSM:00000321\r\nCMD OK\r\n", payload))])
}

pub const SERIAL: &str = "JGXX123-T4567";
pub const SOFTWARE_VERSION: &str = "1.02";
pub const PATIENT_NAME: &str = "ANA";
pub const PATIENT_ID: &str = "PT-7";

pub fn result_reply() -> VecDeque<Bytes> {
    VecDeque::from(vec![
        text_frame("1,1,08,14,23,09,05,0,120,0\r\n"),
        text_frame("1,2,08,14,23,21,40,0,1,0\r\n"),
        text_frame("1,3,08,15,23,07,12,0,5.5,0\r\n"),
        text_frame("CKSM:0000ABCD\r\nCMD OK\r\n"),
    ])
}

/// Replies in command order for a full session.
pub fn neo_script() -> VecDeque<VecDeque<Bytes>> {
    VecDeque::from(vec![
        VecDeque::from(vec![ack_frame(0x34)]),
        VecDeque::from(vec![ack_frame(0x05)]),
        VecDeque::from(vec![ack_frame(0x35)]),
        VecDeque::from(vec![ack_frame(0x71)]),
        field_reply(SERIAL),
        field_reply(SOFTWARE_VERSION),
        field_reply("08,15,23"),
        field_reply("14,30"),
        field_reply(PATIENT_NAME),
        field_reply(PATIENT_ID),
        result_reply(),
    ])
}

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

/// Session timing without any waiting.
pub fn instant_config() -> SessionConfig {
    SessionConfig {
        settle_interval: Duration::ZERO,
        readiness_delay: Duration::ZERO,
        ..SessionConfig::default()
    }
}

/// Transport that plays back one queue of frames per control write.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: VecDeque<VecDeque<Bytes>>,
    current: VecDeque<Bytes>,
    pub writes: Vec<Bytes>,
    pub driver_attached: bool,
    pub claimed: bool,
    pub fail_claim: bool,
    pub fail_write_at: Option<usize>,
    pub short_write_at: Option<usize>,
    pub detach_calls: usize,
    pub release_calls: usize,
    pub reattach_calls: usize,
    pub reads: usize,
}

impl ScriptedTransport {
    pub fn new(script: VecDeque<VecDeque<Bytes>>) -> Self {
        Self {
            script,
            driver_attached: true,
            ..Self::default()
        }
    }

    pub fn neo() -> Self {
        Self::new(neo_script())
    }

    /// Already claimed, serving `frames` to the next reads.
    pub fn with_frames(frames: Vec<Bytes>) -> Self {
        Self {
            current: VecDeque::from(frames),
            claimed: true,
            ..Self::default()
        }
    }

    /// Replace the reply queued for the command at `index`.
    pub fn set_reply(&mut self, index: usize, frames: VecDeque<Bytes>) {
        self.script[index] = frames;
    }
}

impl Transport for ScriptedTransport {
    fn detach_kernel_driver(&mut self, _interface: u8) -> Result<DriverState, TransportError> {
        self.detach_calls += 1;
        if self.driver_attached {
            self.driver_attached = false;
            Ok(DriverState::Detached)
        } else {
            Ok(DriverState::NotAttached)
        }
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        if self.fail_claim {
            return Err(TransportError::Claim {
                interface,
                source: std::io::ErrorKind::ResourceBusy.into(),
            });
        }
        self.claimed = true;
        Ok(())
    }

    fn clear_halt(&mut self, _endpoint: u8) -> Result<(), TransportError> {
        Ok(())
    }

    async fn control_write(
        &mut self,
        _request: ControlRequest,
        payload: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        let index = self.writes.len();
        self.writes.push(Bytes::copy_from_slice(payload));
        if self.fail_write_at == Some(index) {
            return Err(TransportError::Control(TransferError::Stall));
        }
        self.current = self.script.pop_front().unwrap_or_default();
        if self.short_write_at == Some(index) {
            return Ok(payload.len() - 1);
        }
        Ok(payload.len())
    }

    async fn bulk_read(&mut self, _endpoint: u8, max_size: usize, timeout: Duration) -> Result<Bytes, TransportError> {
        if !self.claimed {
            return Err(TransportError::NotClaimed(0));
        }
        self.reads += 1;
        let mut frame = self.current.pop_front().ok_or(TransportError::Timeout {
            operation: "bulk read",
            after: timeout,
        })?;
        frame.truncate(max_size);
        Ok(frame)
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        self.release_calls += 1;
        if !self.claimed {
            return Err(TransportError::NotClaimed(interface));
        }
        self.claimed = false;
        Ok(())
    }

    fn reattach_kernel_driver(&mut self, _interface: u8) -> Result<(), TransportError> {
        self.reattach_calls += 1;
        self.driver_attached = true;
        Ok(())
    }
}

/// Exporter that keeps records in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryExporter {
    pub records: Arc<Mutex<Vec<ExportRecord>>>,
}

impl Exporter for MemoryExporter {
    async fn export(&self, record: &ExportRecord) -> Result<PathBuf, MeterError> {
        let mut records = self.records.lock().unwrap();
        records.push(record.clone());
        Ok(PathBuf::from(format!("memory/{}", records.len())))
    }
}
