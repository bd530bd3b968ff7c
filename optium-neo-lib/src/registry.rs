//! Supported meter families, keyed by USB identity.

use std::collections::HashMap;
use std::fmt;

use strum_macros::Display;

use crate::command::{CommandSpec, OPTIUM_NEO_COMMANDS};
use crate::config::SessionConfig;
use crate::constants::{PID, VID};
use crate::error::MeterError;
use crate::profile::ExportRecord;
use crate::session::CommandSession;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentity {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self { vendor_id, product_id }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// A meter protocol the engine can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MeterFamily {
    #[strum(serialize = "FreeStyle Optium Neo")]
    FreeStyleOptiumNeo,
}

impl MeterFamily {
    pub const fn identity(&self) -> DeviceIdentity {
        match self {
            MeterFamily::FreeStyleOptiumNeo => DeviceIdentity::new(VID, PID),
        }
    }

    pub fn commands(&self) -> &'static [CommandSpec] {
        match self {
            MeterFamily::FreeStyleOptiumNeo => OPTIUM_NEO_COMMANDS,
        }
    }

    /// Run a fresh session against an opened transport.
    pub async fn run_session<T: Transport>(
        &self,
        transport: &mut T,
        config: &SessionConfig,
    ) -> Result<ExportRecord, MeterError> {
        CommandSession::new(transport, self.commands(), config.clone())
            .run()
            .await
    }
}

#[derive(Debug, Clone)]
pub struct Registry {
    families: HashMap<DeviceIdentity, MeterFamily>,
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(MeterFamily::FreeStyleOptiumNeo);
        registry
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            families: HashMap::new(),
        }
    }

    pub fn register(&mut self, family: MeterFamily) {
        self.families.insert(family.identity(), family);
    }

    pub fn lookup(&self, identity: DeviceIdentity) -> Option<MeterFamily> {
        self.families.get(&identity).copied()
    }

    pub fn identities(&self) -> impl Iterator<Item = DeviceIdentity> + '_ {
        self.families.keys().copied()
    }
}
