//! Collects the frames of one reply until the meter says `CMD OK`.

use std::time::Duration;

use tracing::debug;

use crate::command::MessageType;
use crate::constants::{ENDPOINT_IN, FRAME_SIZE, TERMINATOR, TRANSFER_TIMEOUT};
use crate::error::TransportError;
use crate::transport::Transport;

/// Decoded reply of one command.
#[derive(Debug, Clone, PartialEq)]
pub enum RawReply {
    /// Single-reply commands: the frame in which the terminator showed up.
    Text(String),
    /// Multi-frame commands: every frame read, in order, terminator frame included.
    Frames(Vec<String>),
}

impl RawReply {
    pub fn into_text(self) -> String {
        match self {
            RawReply::Text(text) => text,
            RawReply::Frames(frames) => frames.concat(),
        }
    }

    pub fn into_frames(self) -> Vec<String> {
        match self {
            RawReply::Text(text) => vec![text],
            RawReply::Frames(frames) => frames,
        }
    }
}

/// Why accumulation stopped.
#[derive(Debug)]
pub enum Termination {
    /// The terminator token was seen.
    Terminator,
    /// The transport gave up first. The reply holds whatever arrived before that.
    Truncated(TransportError),
}

#[derive(Debug)]
pub struct AccumulatedReply {
    pub reply: RawReply,
    pub frames_read: usize,
    pub termination: Termination,
}

impl AccumulatedReply {
    pub fn is_complete(&self) -> bool {
        matches!(self.termination, Termination::Terminator)
    }
}

/// Decode one frame as single-byte text.
pub fn decode_frame(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

#[derive(Debug, Clone)]
pub struct ResponseAccumulator {
    endpoint: u8,
    frame_size: usize,
    timeout: Duration,
    terminator: &'static str,
}

impl Default for ResponseAccumulator {
    fn default() -> Self {
        Self::new(FRAME_SIZE, TRANSFER_TIMEOUT)
    }
}

impl ResponseAccumulator {
    pub fn new(frame_size: usize, timeout: Duration) -> Self {
        Self {
            endpoint: ENDPOINT_IN,
            frame_size,
            timeout,
            terminator: TERMINATOR,
        }
    }

    /// Read frames until the accumulated text contains the terminator.
    ///
    /// A transport error never escapes from here: it ends the loop and the
    /// reply is returned as [`Termination::Truncated`]. When `expect_multi` is
    /// false a complete reply is only the frame that completed it, while a
    /// truncated one carries everything read so far.
    pub async fn read<T: Transport>(&self, transport: &mut T, expect_multi: bool) -> AccumulatedReply {
        let mut frames: Vec<String> = Vec::new();
        let mut accumulated = String::new();

        loop {
            let bytes = match transport.bulk_read(self.endpoint, self.frame_size, self.timeout).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    let frames_read = frames.len();
                    debug!(frames = frames_read, "Accumulation stopped by transport: {}", e);
                    let reply = if expect_multi {
                        RawReply::Frames(frames)
                    } else {
                        RawReply::Text(accumulated)
                    };
                    return AccumulatedReply {
                        reply,
                        frames_read,
                        termination: Termination::Truncated(e),
                    };
                }
            };

            debug!(
                bytes = hex::encode(&bytes),
                message_type = ?bytes.first().copied().map(MessageType::from),
                "USB Read"
            );
            let text = decode_frame(&bytes);
            accumulated.push_str(&text);
            frames.push(text);

            if accumulated.contains(self.terminator) {
                let frames_read = frames.len();
                let reply = if expect_multi {
                    RawReply::Frames(frames)
                } else {
                    // the loop only returns after pushing, so there is a last frame
                    RawReply::Text(frames.pop().unwrap_or_default())
                };
                return AccumulatedReply {
                    reply,
                    frames_read,
                    termination: Termination::Terminator,
                };
            }
        }
    }
}
