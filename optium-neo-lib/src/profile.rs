//! Session results: the profile filled while querying, and the record handed to exporters.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Serialize, Serializer};
use strum_macros::Display;

use crate::error::MeterError;

/// Wall-clock format the date and time tokens combine into.
pub const DEVICE_TIMESTAMP_FORMAT: &str = "%m-%d-%y %H:%M";

/// Timestamp format of exported records, e.g. `2023-08-15T14:30+0000`.
pub const EXPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M%z";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ProfileField {
    #[strum(serialize = "serial number")]
    SerialNumber,
    #[strum(serialize = "software version")]
    SoftwareVersion,
    #[strum(serialize = "date")]
    Date,
    #[strum(serialize = "time")]
    Time,
    #[strum(serialize = "patient name")]
    PatientName,
    #[strum(serialize = "patient id")]
    PatientId,
}

/// One reading from the result log, in the meter's wall clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

/// Fields collected over one session. Every field is written once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceProfile {
    serial_number: Option<String>,
    software_version: Option<String>,
    patient_name: Option<String>,
    patient_id: Option<String>,
    date_token: Option<String>,
    time_token: Option<String>,
}

impl DeviceProfile {
    fn slot(&mut self, field: ProfileField) -> &mut Option<String> {
        match field {
            ProfileField::SerialNumber => &mut self.serial_number,
            ProfileField::SoftwareVersion => &mut self.software_version,
            ProfileField::Date => &mut self.date_token,
            ProfileField::Time => &mut self.time_token,
            ProfileField::PatientName => &mut self.patient_name,
            ProfileField::PatientId => &mut self.patient_id,
        }
    }

    pub fn set(&mut self, field: ProfileField, value: String) -> Result<(), MeterError> {
        let slot = self.slot(field);
        if slot.is_some() {
            return Err(MeterError::FieldAlreadySet(field));
        }
        *slot = Some(value);
        Ok(())
    }

    pub fn get(&self, field: ProfileField) -> Option<&str> {
        let value = match field {
            ProfileField::SerialNumber => &self.serial_number,
            ProfileField::SoftwareVersion => &self.software_version,
            ProfileField::Date => &self.date_token,
            ProfileField::Time => &self.time_token,
            ProfileField::PatientName => &self.patient_name,
            ProfileField::PatientId => &self.patient_id,
        };
        value.as_deref()
    }

    fn take(&mut self, field: ProfileField) -> Result<String, MeterError> {
        self.slot(field).take().ok_or(MeterError::MissingField(field))
    }

    /// Freeze the profile and the readings into an [`ExportRecord`].
    ///
    /// The meter's wall clock is interpreted in `device_offset` and
    /// normalized to UTC.
    pub fn finalize(
        mut self,
        measurements: Vec<Measurement>,
        device_offset: FixedOffset,
    ) -> Result<ExportRecord, MeterError> {
        let date = self.take(ProfileField::Date)?;
        let time = self.take(ProfileField::Time)?;
        let timestamp = combine_timestamp(&date, &time, device_offset)?;

        let measurements = measurements
            .into_iter()
            .map(|m| {
                Ok(RecordedMeasurement {
                    timestamp: to_utc(m.timestamp, device_offset).ok_or_else(|| MeterError::MalformedField {
                        field: ProfileField::Date,
                        reason: format!("reading at {} is out of range", m.timestamp),
                    })?,
                    value: m.value,
                })
            })
            .collect::<Result<Vec<_>, MeterError>>()?;

        Ok(ExportRecord {
            software_version: self.take(ProfileField::SoftwareVersion)?,
            serial_number: self.take(ProfileField::SerialNumber)?,
            patient_name: self.take(ProfileField::PatientName)?,
            patient_id: self.take(ProfileField::PatientId)?,
            timestamp,
            measurements,
        })
    }
}

fn to_utc(naive: NaiveDateTime, offset: FixedOffset) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
}

/// Join the opaque date (`MM-dd-yy`) and time (`HH:mm`) tokens into one instant.
pub fn combine_timestamp(date: &str, time: &str, device_offset: FixedOffset) -> Result<DateTime<Utc>, MeterError> {
    let combined = format!("{} {}", date, time);
    let naive = NaiveDateTime::parse_from_str(&combined, DEVICE_TIMESTAMP_FORMAT).map_err(|e| {
        MeterError::MalformedField {
            field: ProfileField::Date,
            reason: format!("cannot combine {:?}: {}", combined, e),
        }
    })?;
    to_utc(naive, device_offset).ok_or_else(|| MeterError::MalformedField {
        field: ProfileField::Date,
        reason: format!("{:?} is out of range", combined),
    })
}

fn serialize_timestamp<S: Serializer>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&timestamp.format(EXPORT_TIMESTAMP_FORMAT))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RecordedMeasurement {
    #[serde(rename = "date", serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "measure")]
    pub value: f64,
}

/// Everything read from one meter. Field order is the serialized key order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRecord {
    #[serde(rename = "swver")]
    pub software_version: String,
    #[serde(rename = "serlnum")]
    pub serial_number: String,
    #[serde(rename = "ptname")]
    pub patient_name: String,
    #[serde(rename = "ptid")]
    pub patient_id: String,
    #[serde(rename = "date", serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "result")]
    pub measurements: Vec<RecordedMeasurement>,
}

impl ExportRecord {
    pub fn to_json(&self) -> Result<Vec<u8>, MeterError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(EXPORT_TIMESTAMP_FORMAT).to_string()
    }
}
