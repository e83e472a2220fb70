//! Port/transport abstraction for device drivers.
//!
//! A [`DevicePort`] is the only thing a driver knows about its physical
//! channel: open, close, write, timed read, and line-parameter changes.
//! Implementations cover serial lines ([`SerialDevicePort`]), TCP-attached
//! devices ([`TcpDevicePort`]) and a scriptable in-memory port for tests
//! ([`MockPort`]).
//!
//! Ports are owned by one device's worker thread; nothing here is shared.

pub mod mock;
pub mod serial;
pub mod tcp;

pub use mock::{MockPort, MockPortHandle};
pub use serial::SerialDevicePort;
pub use tcp::TcpDevicePort;

use moneta_core::Result;
use std::time::Duration;

/// Line discipline for serial-like transports. TCP ports ignore these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortParameters {
    pub baud_rate: u32,
    pub parity: Parity,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl Default for PortParameters {
    fn default() -> Self {
        Self {
            baud_rate: moneta_core::constants::BAUD_RATE_WORK,
            parity: Parity::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl PortParameters {
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Seven,
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    Hardware,
}

/// Blocking byte channel to one physical device.
///
/// `read` returns whatever arrived within the timeout; an empty buffer
/// means the device stayed silent, which callers treat as "no answer"
/// rather than an error.
pub trait DevicePort: Send {
    fn open(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    fn write(&mut self, data: &[u8]) -> Result<()>;

    fn read(&mut self, timeout: Duration) -> Result<Vec<u8>>;

    fn set_parameters(&mut self, parameters: &PortParameters) -> Result<()>;

    /// Line parameters currently in effect.
    fn parameters(&self) -> PortParameters;
}
