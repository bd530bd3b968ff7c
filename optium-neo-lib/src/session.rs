//! One complete run of the command sequence against an opened meter.

use std::mem;

use strum_macros::Display;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::accumulator::{RawReply, ResponseAccumulator, Termination};
use crate::command::{CommandSpec, Route};
use crate::config::SessionConfig;
use crate::constants::{ENDPOINT_IN, INTERFACE};
use crate::error::MeterError;
use crate::parser::{parse_date, parse_measurements, parse_text_field, parse_time};
use crate::profile::{DeviceProfile, ExportRecord, Measurement, ProfileField};
use crate::transport::{ControlRequest, DriverState, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    Opened,
    InterfaceClaimed,
    Initializing,
    QueryingFields,
    QueryingResult,
    Finalized,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Finalized | SessionState::Aborted)
    }
}

impl From<Route> for SessionState {
    fn from(route: Route) -> Self {
        match route {
            Route::Discard => SessionState::Initializing,
            Route::Field(_) => SessionState::QueryingFields,
            Route::Measurements => SessionState::QueryingResult,
        }
    }
}

/// Drives one opened device from claim to release.
///
/// Whatever happens in between, [`CommandSession::run`] releases the
/// interface and re-attaches a detached kernel driver before it returns.
pub struct CommandSession<'a, T: Transport> {
    transport: &'a mut T,
    commands: &'static [CommandSpec],
    config: SessionConfig,
    accumulator: ResponseAccumulator,
    state: SessionState,
    profile: DeviceProfile,
    measurements: Vec<Measurement>,
    interface_claimed: bool,
    driver_detached: bool,
}

impl<'a, T: Transport> CommandSession<'a, T> {
    pub fn new(transport: &'a mut T, commands: &'static [CommandSpec], config: SessionConfig) -> Self {
        let accumulator = ResponseAccumulator::new(config.frame_size, config.transfer_timeout);
        Self {
            transport,
            commands,
            config,
            accumulator,
            state: SessionState::Opened,
            profile: DeviceProfile::default(),
            measurements: Vec::new(),
            interface_claimed: false,
            driver_detached: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Session state");
            self.state = next;
        }
    }

    /// Run every command and build the record.
    pub async fn run(mut self) -> Result<ExportRecord, MeterError> {
        let outcome = self.drive().await;
        self.cleanup();

        match outcome {
            Ok(record) => {
                self.transition(SessionState::Finalized);
                info!(
                    serial = %record.serial_number,
                    readings = record.measurements.len(),
                    "Session finished"
                );
                Ok(record)
            }
            Err(e) => {
                self.transition(SessionState::Aborted);
                error!("Session aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<ExportRecord, MeterError> {
        match self.transport.detach_kernel_driver(INTERFACE)? {
            DriverState::Detached => {
                info!(interface = INTERFACE, "Kernel driver detached");
                self.driver_detached = true;
            }
            DriverState::NotAttached => debug!(interface = INTERFACE, "No kernel driver attached"),
        }

        self.transport.claim_interface(INTERFACE)?;
        self.interface_claimed = true;
        self.transition(SessionState::InterfaceClaimed);
        info!("Interface claimed successfully.");

        if let Err(e) = self.transport.clear_halt(ENDPOINT_IN) {
            warn!("Ignoring clear halt failure: {}", e);
        }

        info!("Waiting {:?} for the meter to get ready...", self.config.readiness_delay);
        sleep(self.config.readiness_delay).await;

        let commands = self.commands;
        for spec in commands {
            self.transition(SessionState::from(spec.route));
            self.execute(spec).await?;
        }

        let profile = mem::take(&mut self.profile);
        let measurements = mem::take(&mut self.measurements);
        profile.finalize(measurements, self.config.device_offset)
    }

    async fn execute(&mut self, spec: &CommandSpec) -> Result<(), MeterError> {
        info!(command = spec.label, "Sending command");
        let payload = spec.payload();
        self.transport
            .control_write_all(ControlRequest::SET_OUTPUT_REPORT, &payload, self.config.transfer_timeout)
            .await?;

        sleep(self.config.settle_interval).await;

        let accumulated = self.accumulator.read(&mut *self.transport, spec.expect_multi).await;
        if let Termination::Truncated(cause) = &accumulated.termination {
            let timeout = MeterError::ParseTimeout {
                command: spec.label,
                frames: accumulated.frames_read,
            };
            match spec.route {
                // binary acknowledgements never carry the terminator
                Route::Discard => debug!(command = spec.label, "{} ({})", timeout, cause),
                _ if self.config.strict_terminator => return Err(timeout),
                _ => warn!(command = spec.label, "{} ({}), using partial reply", timeout, cause),
            }
        }

        self.route(spec, accumulated.reply)
    }

    fn route(&mut self, spec: &CommandSpec, reply: RawReply) -> Result<(), MeterError> {
        match spec.route {
            Route::Discard => {
                debug!(command = spec.label, "Discarding priming reply");
            }
            Route::Field(field) => {
                let text = reply.into_text();
                let value = match field {
                    ProfileField::Date => parse_date(&text)?,
                    ProfileField::Time => parse_time(&text)?,
                    _ => parse_text_field(&text),
                };
                info!(command = spec.label, "{}: {}", field, value);
                self.profile.set(field, value)?;
            }
            Route::Measurements => {
                let frames = reply.into_frames();
                self.measurements = parse_measurements(&frames);
                info!(
                    command = spec.label,
                    frames = frames.len(),
                    "Parsed {} reading(s)",
                    self.measurements.len()
                );
            }
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        if self.interface_claimed {
            info!("Release interface");
            if let Err(e) = self.transport.release_interface(INTERFACE) {
                error!("{}", e);
            }
            self.interface_claimed = false;
        }
        if self.driver_detached {
            if let Err(e) = self.transport.reattach_kernel_driver(INTERFACE) {
                error!("{}", e);
            }
            self.driver_detached = false;
        }
    }
}
