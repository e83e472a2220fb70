//! Aggregation of device events into one application-facing stream.

use crate::event::DeviceEvent;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct NamedEvent {
    pub device: String,
    pub event: DeviceEvent,
}

/// Fans the event receivers of many devices into a single stream, each
/// event tagged with the device name it came from.
pub struct DeviceManager {
    tx: mpsc::UnboundedSender<NamedEvent>,
    rx: mpsc::UnboundedReceiver<NamedEvent>,
    pumps: JoinSet<()>,
}

impl DeviceManager {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            pumps: JoinSet::new(),
        }
    }

    /// Forward everything `events` produces, tagged with `device`.
    pub fn attach(&mut self, device: impl Into<String>, mut events: mpsc::UnboundedReceiver<DeviceEvent>) {
        let tx = self.tx.clone();
        let device = device.into();
        self.pumps.spawn(async move {
            while let Some(event) = events.recv().await {
                if tx.send(NamedEvent {
                    device: device.clone(),
                    event,
                })
                .is_err()
                {
                    break;
                }
            }
            debug!(device = %device, "device event stream closed");
        });
    }

    /// Next aggregated event. Pends while all attached devices are quiet.
    pub async fn next_event(&mut self) -> NamedEvent {
        // The manager holds its own sender, so recv can only pend, never
        // terminate.
        match self.rx.recv().await {
            Some(event) => event,
            None => unreachable!("manager keeps one sender alive"),
        }
    }

    /// Non-blocking variant for drain loops.
    pub fn try_next_event(&mut self) -> Option<NamedEvent> {
        self.rx.try_recv().ok()
    }

    pub async fn shutdown(mut self) {
        self.pumps.abort_all();
        while self.pumps.join_next().await.is_some() {}
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}
