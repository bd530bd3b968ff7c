//! Field extraction from decoded replies.
//!
//! Every frame opens with the two report header bytes. The header is cut
//! before anything else looks at the text, since the length byte can itself
//! be a `,` or a `\n`. What follows is `\n` separated; the first line ends
//! with `\r` and carries a comma separated token list.

use chrono::NaiveDateTime;
use tracing::warn;

use crate::constants::{MIN_RESULT_TOKENS, REPORT_HEADER_SIZE};
use crate::error::MeterError;
use crate::profile::{DEVICE_TIMESTAMP_FORMAT, Measurement, ProfileField};

/// Text of a frame after the report header.
pub fn frame_body(frame: &str) -> &str {
    match frame.char_indices().nth(REPORT_HEADER_SIZE) {
        Some((start, _)) => &frame[start..],
        None => "",
    }
}

/// First payload line of a reply with its trailing byte cut off.
///
/// Returns `None` for replies too short to have that shape, which is what a
/// truncated reply usually looks like.
pub fn strip_line(reply: &str) -> Option<String> {
    let line = frame_body(reply).split('\n').next().unwrap_or_default();
    let mut chars = line.chars();
    chars.next_back()?;
    Some(chars.as_str().to_string())
}

/// Comma separated tokens of the first line's payload.
pub fn payload_tokens(reply: &str) -> Option<Vec<String>> {
    strip_line(reply).map(|payload| payload.split(',').map(str::to_string).collect())
}

/// Serial number, software version, patient name and id are stored verbatim.
/// A reply without the expected shape yields an empty value.
pub fn parse_text_field(reply: &str) -> String {
    strip_line(reply).unwrap_or_default()
}

fn join_tokens(reply: &str, field: ProfileField, count: usize, separator: &str) -> Result<String, MeterError> {
    let tokens = payload_tokens(reply).ok_or_else(|| MeterError::MalformedField {
        field,
        reason: format!("no payload in {:?}", frame_body(reply)),
    })?;
    if tokens.len() < count {
        return Err(MeterError::MalformedField {
            field,
            reason: format!("expected {} tokens, got {}", count, tokens.len()),
        });
    }
    Ok(tokens[..count].join(separator))
}

/// `MM,dd,yy` becomes the opaque token `MM-dd-yy`.
pub fn parse_date(reply: &str) -> Result<String, MeterError> {
    join_tokens(reply, ProfileField::Date, 3, "-")
}

/// `HH,mm` becomes the opaque token `HH:mm`.
pub fn parse_time(reply: &str) -> Result<String, MeterError> {
    join_tokens(reply, ProfileField::Time, 2, ":")
}

// Same whitespace rule as the meter's own tooling: anything up to and including space.
fn trim_token(token: &str) -> &str {
    token.trim_matches(|c: char| c <= ' ')
}

/// Parse one result line already split on commas.
///
/// Token layout: `[type, id, month, day, year, hour, minute, flags, value, ..]`,
/// with the report header already removed.
pub fn parse_reading(tokens: &[&str]) -> Result<Measurement, String> {
    if tokens.len() < MIN_RESULT_TOKENS {
        return Err(format!("{} tokens, need {}", tokens.len(), MIN_RESULT_TOKENS));
    }

    let stamp = format!(
        "{}-{}-{} {}:{}",
        trim_token(tokens[2]),
        trim_token(tokens[3]),
        trim_token(tokens[4]),
        trim_token(tokens[5]),
        trim_token(tokens[6])
    );
    let timestamp =
        NaiveDateTime::parse_from_str(&stamp, DEVICE_TIMESTAMP_FORMAT).map_err(|e| format!("{:?}: {}", stamp, e))?;

    let raw_value = trim_token(tokens[8]);
    let mut value: f64 = raw_value.parse().map_err(|e| format!("value {:?}: {}", raw_value, e))?;
    if !value.is_finite() {
        return Err(format!("value {:?} is not a number", raw_value));
    }
    // The meter reports 1 where no reading is stored. Kept as 0 until the
    // protocol documentation says otherwise.
    if value == 1.0 {
        value = 0.0;
    }

    Ok(Measurement { timestamp, value })
}

/// Extract the readings of the result log, in the order the meter sent them.
///
/// Lines with fewer than nine tokens (headers, checksum, terminator) are
/// skipped silently. Lines that look like readings but do not parse are
/// skipped with a warning; they never abort the batch.
pub fn parse_measurements<S: AsRef<str>>(frames: &[S]) -> Vec<Measurement> {
    let mut measurements = Vec::new();

    // Zero padding after the payload is not part of any line.
    let bodies = frames
        .iter()
        .map(|frame| frame_body(frame.as_ref()).split('\0').next().unwrap_or_default());
    for line in bodies.flat_map(|body| body.split('\n')) {
        let tokens: Vec<&str> = line.split(',').collect();
        if tokens.len() < MIN_RESULT_TOKENS {
            continue;
        }
        match parse_reading(&tokens) {
            Ok(measurement) => measurements.push(measurement),
            Err(reason) => warn!("Skipping malformed result line: {}", reason),
        }
    }

    measurements
}
