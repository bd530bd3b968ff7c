// Protocol constants for the FreeStyle Optium Neo

use std::time::Duration;

/// Abbott Diabetes Care vendor ID
pub const VID: u16 = 0x1a61;

/// FreeStyle Optium Neo product ID
pub const PID: u16 = 0x3850;

/// The meter exposes a single HID interface
pub const INTERFACE: u8 = 0;

/// Interrupt/bulk IN endpoint the replies arrive on
pub const ENDPOINT_IN: u8 = 0x81;

/// Size of one HID report, both directions (64 bytes)
pub const FRAME_SIZE: usize = 64;

/// Marker the meter appends once a text reply is complete
pub const TERMINATOR: &str = "CMD OK";

/// HID class request SET_REPORT
pub const HID_SET_REPORT: u8 = 0x09;

/// wValue for SET_REPORT: report type Output (0x02), report ID 0
pub const OUTPUT_REPORT_VALUE: u16 = 0x0200;

/// Bytes in front of the text inside a report: message type and length
pub const REPORT_HEADER_SIZE: usize = 2;

/// Timeout applied to every single control or bulk transfer
pub const TRANSFER_TIMEOUT: Duration = Duration::from_millis(1000);

/// Wait between sending a command and the first read of its reply
pub const SETTLE_INTERVAL: Duration = Duration::from_millis(1000);

/// One-time wait after claiming the interface before the first command
pub const READINESS_DELAY: Duration = Duration::from_secs(5);

/// Minimum comma separated tokens a result line needs to carry a reading
pub const MIN_RESULT_TOKENS: usize = 9;
