use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::constants::{FRAME_SIZE, READINESS_DELAY, SETTLE_INTERVAL, TRANSFER_TIMEOUT};

/// Timing and interpretation knobs of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Wait after each command before its reply is read
    pub settle_interval: Duration,
    /// One-time wait after the interface is claimed
    pub readiness_delay: Duration,
    /// Timeout of every control write and bulk read
    pub transfer_timeout: Duration,
    pub frame_size: usize,
    /// Offset the meter's clock runs in
    pub device_offset: FixedOffset,
    /// Fail the session when a reply ends without the terminator instead of
    /// continuing with the partial text
    pub strict_terminator: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_interval: SETTLE_INTERVAL,
            readiness_delay: READINESS_DELAY,
            transfer_timeout: TRANSFER_TIMEOUT,
            frame_size: FRAME_SIZE,
            device_offset: Utc.fix(),
            strict_terminator: false,
        }
    }
}

impl SessionConfig {
    pub fn with_settle_ms(mut self, millis: u64) -> Self {
        self.settle_interval = Duration::from_millis(millis);
        self
    }

    /// Returns `None` when the offset is out of chrono's range (±24h).
    pub fn with_offset_minutes(mut self, minutes: i32) -> Option<Self> {
        self.device_offset = FixedOffset::east_opt(minutes.checked_mul(60)?)?;
        Some(self)
    }
}

/// Tuning of the hotplug monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Longest the event context blocks before it looks at the shutdown flag again
    pub poll_interval: Duration,
    /// Capacity of the event channel between event context and consumer
    pub channel_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            channel_capacity: 4,
        }
    }
}
