//! Device events delivered to the application layer.
//!
//! Events are fired synchronously from the worker thread over an
//! unbounded channel and consumed asynchronously (see
//! [`crate::manager::DeviceManager`]). A closed receiver never blocks or
//! fails the driver; events are simply dropped once nobody listens.

use moneta_core::{Par, StatusCodeSet, WarningLevel};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    StatusChanged {
        level: WarningLevel,
        codes: StatusCodeSet,
    },
    Initialized(bool),
    Enabled,
    Disabled,
    /// A note is held in escrow pending stack/return.
    Escrow(Par),
    /// Notes committed to the cassette since the last report.
    Stacked(Vec<Par>),
    UnitEmpty {
        unit: usize,
    },
    Dispensed {
        unit: usize,
        count: u32,
    },
    /// Firmware update finished.
    Updated(bool),
}

/// Driver-side emitter.
#[derive(Debug, Clone)]
pub struct EventSender {
    device: String,
    tx: mpsc::UnboundedSender<DeviceEvent>,
}

impl EventSender {
    pub fn emit(&self, event: DeviceEvent) {
        debug!(device = %self.device, event = ?event, "event");
        let _ = self.tx.send(event);
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

pub fn event_channel(device: impl Into<String>) -> (EventSender, mpsc::UnboundedReceiver<DeviceEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSender {
            device: device.into(),
            tx,
        },
        rx,
    )
}
