//! Thin USB layer the protocol engine talks through.
//!
//! [`Transport`] knows nothing about the meter protocol. It moves opaque
//! payloads out through class control requests and pulls fixed-size frames
//! back in through the IN endpoint. [`NusbTransport`] is the real thing;
//! tests drive sessions through scripted implementations.

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use nusb::transfer::{ControlOut, ControlType, Recipient, RequestBuffer};
use nusb::{Device, DeviceInfo, Interface};
use tracing::{debug, info};

use crate::constants::{HID_SET_REPORT, INTERFACE, OUTPUT_REPORT_VALUE};
use crate::error::TransportError;
use crate::registry::DeviceIdentity;

/// Result of trying to take an interface away from the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// A kernel driver was bound and has been detached; it must be re-attached on release.
    Detached,
    /// Nothing to detach, or the platform does not support detaching.
    NotAttached,
}

/// A class-scoped request addressed to an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

impl ControlRequest {
    /// HID SET_REPORT carrying an output report to interface 0.
    pub const SET_OUTPUT_REPORT: Self = Self {
        request: HID_SET_REPORT,
        value: OUTPUT_REPORT_VALUE,
        index: INTERFACE as u16,
    };
}

pub trait Transport: Send {
    /// Detach a bound kernel driver. "Not supported" and "not found" are
    /// reported as [`DriverState::NotAttached`], everything else is an error.
    fn detach_kernel_driver(&mut self, interface: u8) -> Result<DriverState, TransportError>;

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError>;

    fn clear_halt(&mut self, endpoint: u8) -> Result<(), TransportError>;

    /// Send `payload` in the data stage of `request`, returning the number of bytes the device accepted.
    fn control_write(
        &mut self,
        request: ControlRequest,
        payload: &[u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<usize, TransportError>> + Send;

    /// Read at most `max_size` bytes from `endpoint`.
    fn bulk_read(
        &mut self,
        endpoint: u8,
        max_size: usize,
        timeout: Duration,
    ) -> impl Future<Output = Result<Bytes, TransportError>> + Send;

    fn release_interface(&mut self, interface: u8) -> Result<(), TransportError>;

    fn reattach_kernel_driver(&mut self, interface: u8) -> Result<(), TransportError>;

    /// Like [`Transport::control_write`], but a short write is an error.
    fn control_write_all(
        &mut self,
        request: ControlRequest,
        payload: &[u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        async move {
            let sent = self.control_write(request, payload, timeout).await?;
            if sent != payload.len() {
                return Err(TransportError::PartialWrite {
                    sent,
                    expected: payload.len(),
                });
            }
            Ok(())
        }
    }
}

/// usbfs reports ENODATA when no driver is bound to the interface.
#[cfg(target_os = "linux")]
const ENODATA: i32 = 61;

fn is_tolerated_detach_error(err: &io::Error) -> bool {
    #[cfg(target_os = "linux")]
    if err.raw_os_error() == Some(ENODATA) {
        return true;
    }
    matches!(err.kind(), io::ErrorKind::NotFound | io::ErrorKind::Unsupported)
}

/// [`Transport`] backed by an opened `nusb` device.
pub struct NusbTransport {
    device: Device,
    interface: Option<Interface>,
}

impl NusbTransport {
    /// Open `device_info`, refusing anything that is not `expected`.
    pub fn open(device_info: &DeviceInfo, expected: DeviceIdentity) -> Result<Self, TransportError> {
        let found = DeviceIdentity::new(device_info.vendor_id(), device_info.product_id());
        if found != expected {
            return Err(TransportError::WrongDevice {
                vendor_id: found.vendor_id,
                product_id: found.product_id,
            });
        }

        let device = device_info.open().map_err(TransportError::Open)?;
        info!(
            bus = device_info.bus_number(),
            addr = device_info.device_address(),
            "Opened {}",
            found
        );

        Ok(Self {
            device,
            interface: None,
        })
    }

    fn interface(&self) -> Result<&Interface, TransportError> {
        self.interface.as_ref().ok_or(TransportError::NotClaimed(INTERFACE))
    }
}

impl Transport for NusbTransport {
    fn detach_kernel_driver(&mut self, interface: u8) -> Result<DriverState, TransportError> {
        #[cfg(target_os = "linux")]
        let result = self.device.detach_kernel_driver(interface);
        #[cfg(not(target_os = "linux"))]
        let result: Result<(), io::Error> = Err(io::ErrorKind::Unsupported.into());

        match result {
            Ok(()) => Ok(DriverState::Detached),
            Err(e) if is_tolerated_detach_error(&e) => {
                debug!(interface, "No kernel driver to detach: {}", e);
                Ok(DriverState::NotAttached)
            }
            Err(source) => Err(TransportError::DetachDriver { interface, source }),
        }
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        let claimed = self
            .device
            .claim_interface(interface)
            .map_err(|source| TransportError::Claim { interface, source })?;
        self.interface = Some(claimed);
        Ok(())
    }

    fn clear_halt(&mut self, endpoint: u8) -> Result<(), TransportError> {
        self.interface()?
            .clear_halt(endpoint)
            .map_err(|source| TransportError::ClearHalt { endpoint, source })
    }

    async fn control_write(
        &mut self,
        request: ControlRequest,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let interface = self.interface()?;
        debug!(bytes = hex::encode(payload), "USB Write");
        let transfer = interface.control_out(ControlOut {
            control_type: ControlType::Class,
            recipient: Recipient::Interface,
            request: request.request,
            value: request.value,
            index: request.index,
            data: payload,
        });
        let completion = tokio::time::timeout(timeout, transfer)
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "control write",
                after: timeout,
            })?;
        let response = completion.into_result().map_err(TransportError::Control)?;
        Ok(response.actual_length())
    }

    async fn bulk_read(&mut self, endpoint: u8, max_size: usize, timeout: Duration) -> Result<Bytes, TransportError> {
        let interface = self.interface()?;
        let transfer = interface.bulk_in(endpoint, RequestBuffer::new(max_size));
        let completion = tokio::time::timeout(timeout, transfer)
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "bulk read",
                after: timeout,
            })?;
        let data = completion.into_result().map_err(TransportError::Bulk)?;
        Ok(Bytes::from(data))
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        // nusb releases the interface when the handle is dropped
        match self.interface.take() {
            Some(claimed) => {
                drop(claimed);
                Ok(())
            }
            None => Err(TransportError::NotClaimed(interface)),
        }
    }

    fn reattach_kernel_driver(&mut self, interface: u8) -> Result<(), TransportError> {
        #[cfg(target_os = "linux")]
        let result = self.device.attach_kernel_driver(interface);
        #[cfg(not(target_os = "linux"))]
        let result: Result<(), io::Error> = Ok(());

        result.map_err(|source| TransportError::Reattach { interface, source })
    }
}
