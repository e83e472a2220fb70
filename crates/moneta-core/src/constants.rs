//! Timing, retry and sizing constants shared by the driver stack.
//!
//! Values follow the behavior of the deployed terminal fleet: polling
//! slows down while a device is disabled, communication failures are
//! tolerated up to [`MAX_BAD_ANSWERS`] cycles before the device is
//! declared unavailable, and state transitions retry a small fixed number
//! of times with a device reset in between.

use std::time::Duration;

/// Poll cadence while the device is enabled (accepting/printing).
pub const POLLING_INTERVAL_ENABLED: Duration = Duration::from_millis(250);

/// Poll cadence while the device is disabled.
pub const POLLING_INTERVAL_DISABLED: Duration = Duration::from_millis(1000);

/// Consecutive failed status requests tolerated before `NotAvailable`.
pub const MAX_BAD_ANSWERS: u32 = 4;

/// Attempts for enable/disable and reset command sequences.
pub const MAX_COMMAND_ATTEMPT: u32 = 3;

/// Attempts for the initialization sequence.
pub const INITIALIZE_REPEAT_COUNT: u32 = 3;

/// Per-block rewrite attempts during a firmware transfer.
pub const WRITE_FIRMWARE_MAX_REPEATS: u32 = 3;

/// Default answer timeout for a single command exchange.
pub const ANSWER_TIMEOUT: Duration = Duration::from_millis(500);

/// Bound for the device to acknowledge an enable/disable request.
pub const SET_ENABLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound for an in-flight note to leave the accepting phase.
pub const ESCROW_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound for a returned note to clear the escrow position.
pub const RETURN_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound for a full device reset to complete.
pub const RESET_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound for a dispense operation to finish moving notes.
pub const DISPENSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound for the initialization sequence.
pub const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(60);

/// Bound for the update-status register to report ready.
pub const UPDATE_READY_TIMEOUT: Duration = Duration::from_secs(20);

/// Settle pause after entering firmware update mode.
pub const UPDATE_SETTLE_PAUSE: Duration = Duration::from_millis(1500);

/// Raw status collections kept by the polling engine.
pub const STATUS_HISTORY_DEPTH: usize = 10;

/// Serial baud rates for normal work and firmware transfer.
pub const BAUD_RATE_WORK: u32 = 9600;
pub const BAUD_RATE_UPDATE: u32 = 115_200;
