//! Cash acceptor driver.
//!
//! Composes the generic [`moneta_device::StatusEngine`] with the
//! reference validator protocol: par-table loading with currency
//! validation, acceptor status cleaning, the enable/disable state machine
//! with deferred disable, escrow handling and firmware updates.

pub mod driver;
pub mod par_table;
pub mod status_clean;
pub mod tables;

pub use driver::{CashAcceptor, CashAcceptorHandle};
pub use par_table::{parse_bill_table, validate_par_table};
pub use status_clean::clean_status_codes;
