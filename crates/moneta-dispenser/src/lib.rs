//! Cash dispenser driver.
//!
//! Same engine composition as the acceptor, reduced to the dispenser's
//! concerns: a bitmap status register instead of a poll state byte, and
//! unit-count bookkeeping around the dispense operation.

pub mod driver;

pub use driver::{CashDispenser, CashDispenserHandle, DispenseUnit, status_bitmap_table};
