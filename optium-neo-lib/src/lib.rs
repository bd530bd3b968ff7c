pub mod accumulator;
pub mod command;
pub mod config;
pub mod constants;
pub mod error;
pub mod export;
pub mod monitor;
pub mod parser;
pub mod profile;
pub mod registry;
pub mod session;
pub mod transport;

pub use accumulator::{AccumulatedReply, RawReply, ResponseAccumulator, Termination};
pub use command::{CommandSpec, OPTIUM_NEO_COMMANDS, Route};
pub use config::{MonitorConfig, SessionConfig};
pub use error::{MeterError, TransportError};
pub use export::{Exporter, JsonFileExporter};
pub use monitor::{DeviceEvent, DeviceMonitor, DispatchStats, MonitorHandle, SessionDispatcher};
pub use profile::{DeviceProfile, ExportRecord, Measurement, ProfileField, RecordedMeasurement};
pub use registry::{DeviceIdentity, MeterFamily, Registry};
pub use session::{CommandSession, SessionState};
pub use transport::{ControlRequest, DriverState, NusbTransport, Transport};
