//! Simulated cash acceptor for driver development and integration tests.
//!
//! [`EmulatedAcceptor`] speaks the reference validator protocol behind a
//! [`moneta_port::DevicePort`], so drivers run against it unmodified.
//! The paired [`EmulatorHandle`] scripts the device from the test side:
//! note insertion, failures, silent polls and firmware-mode behavior.

pub mod acceptor;

pub use acceptor::{EmulatedAcceptor, EmulatorHandle};
