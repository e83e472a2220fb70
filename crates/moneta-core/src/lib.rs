pub mod config;
pub mod constants;
pub mod error;
pub mod history;
pub mod par;
pub mod spec_table;
pub mod status;

pub use config::{DeviceConfig, Tristate};
pub use error::{Error, Result};
pub use history::HistoryList;
pub use par::{CashReceiver, Par};
pub use spec_table::{StatusCodeInfo, StatusSpec};
pub use status::{
    CurrencyError, OperationKind, RejectReason, SemanticStatus, StatusCode, StatusCodeSet,
    StatusCollection, WarningLevel,
};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
