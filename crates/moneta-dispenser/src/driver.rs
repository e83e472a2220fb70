//! The dispenser driver.
//!
//! Dispensers report their condition as a status bitmap rather than a
//! state byte, so polling decodes through a [`BitmapCodeTable`]. Unit
//! inventory lives driver-side: the device only moves notes, the driver
//! tracks how many remain per unit and raises `UnitEmpty` when one runs
//! dry.

use moneta_core::constants::{
    DISPENSE_TIMEOUT, INITIALIZE_REPEAT_COUNT, POLLING_INTERVAL_DISABLED,
    POLLING_INTERVAL_ENABLED, RESET_TIMEOUT,
};
use moneta_core::{
    DeviceConfig, Error, Result, SemanticStatus, StatusCode, StatusCodeSet, StatusSpec,
    WarningLevel,
};
use moneta_device::{
    BitmapCodeTable, DeviceEvent, EngineHooks, EventSender, PollingExpector, StatusEngine,
    WaitOutcome, WorkingThreadProxy, event_channel,
};
use moneta_port::DevicePort;
use moneta_protocol::{CcnetCodec, Codec, Command, VALIDATOR_ADDRESS};
use std::cell::RefCell;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

/// One denomination cassette and how many notes the driver believes it
/// still holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispenseUnit {
    pub nominal: u64,
    pub currency: String,
    pub count: u32,
}

impl DispenseUnit {
    pub fn new(nominal: u64, currency: impl Into<String>, count: u32) -> Self {
        Self {
            nominal,
            currency: currency.into(),
            count,
        }
    }
}

/// Status register layout of the reference dispenser.
pub fn status_bitmap_table() -> BitmapCodeTable {
    BitmapCodeTable::new()
        .add(0, StatusCode::DispenseJam, "note path jam")
        .add(1, StatusCode::UnitNearEmpty, "unit low on notes")
        .add(2, StatusCode::UnitEmpty, "unit exhausted")
        .add(3, StatusCode::StackerOpen, "cassette out of position")
        .add(4, StatusCode::Busy, "dispensing in progress")
        .add_inverted(7, StatusCode::PowerSupply, "power good bit clear")
}

struct DispenserIo {
    port: Box<dyn DevicePort>,
    codec: Box<dyn Codec>,
    table: BitmapCodeTable,
    /// Set while a dispense is waited on; the real register must show
    /// through instead of the status buffer.
    operation_active: bool,
}

impl DispenserIo {
    fn command(&mut self, command: Command, data: &[u8]) -> Result<Vec<u8>> {
        let answer = self
            .codec
            .process_command(self.port.as_mut(), command, data)?;
        Ok(answer.to_vec())
    }
}

impl EngineHooks for DispenserIo {
    fn request_status(&mut self) -> Result<StatusCodeSet> {
        let answer = self.command(Command::GetStatus, &[])?;
        Ok(self
            .table
            .decode(&answer)
            .into_iter()
            .map(|(_, spec)| spec.code)
            .collect())
    }

    fn can_apply_status_buffer(&self) -> bool {
        !self.operation_active
    }
}

struct Inner {
    io: DispenserIo,
    engine: StatusEngine,
    events: EventSender,
    config: DeviceConfig,
    proxy: Weak<WorkingThreadProxy>,
    units: Vec<DispenseUnit>,
    initialized: bool,
}

fn lock(inner: &Arc<Mutex<Inner>>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct CashDispenser;

impl CashDispenser {
    pub fn with_codec(
        name: impl Into<String>,
        port: Box<dyn DevicePort>,
        codec: Box<dyn Codec>,
        config: DeviceConfig,
        units: Vec<DispenseUnit>,
    ) -> (CashDispenserHandle, UnboundedReceiver<DeviceEvent>) {
        let name = name.into();
        let (events, rx) = event_channel(name.clone());
        let proxy = Arc::new(WorkingThreadProxy::new(format!("{name}-worker")));
        let engine = StatusEngine::new(StatusSpec::standard(), events.clone());

        let inner = Arc::new(Mutex::new(Inner {
            io: DispenserIo {
                port,
                codec,
                table: status_bitmap_table(),
                operation_active: false,
            },
            engine,
            events,
            config,
            proxy: Arc::downgrade(&proxy),
            units,
            initialized: false,
        }));

        let poll_inner = inner.clone();
        proxy.set_poll_callback(move || lock(&poll_inner).on_poll());

        (CashDispenserHandle { inner, proxy }, rx)
    }

    pub fn new(
        name: impl Into<String>,
        port: Box<dyn DevicePort>,
        config: DeviceConfig,
        units: Vec<DispenseUnit>,
    ) -> (CashDispenserHandle, UnboundedReceiver<DeviceEvent>) {
        Self::with_codec(
            name,
            port,
            Box::new(CcnetCodec::new(VALIDATOR_ADDRESS)),
            config,
            units,
        )
    }
}

#[derive(Clone)]
pub struct CashDispenserHandle {
    inner: Arc<Mutex<Inner>>,
    proxy: Arc<WorkingThreadProxy>,
}

impl CashDispenserHandle {
    pub fn initialize(&self) -> bool {
        let inner = self.inner.clone();
        self.proxy.invoke(move || lock(&inner).initialize())
    }

    /// Pay out `count` notes from `unit`. Returns false when the unit is
    /// unknown, short on notes, or the device reports an error.
    pub fn dispense(&self, unit: usize, count: u32) -> bool {
        let inner = self.inner.clone();
        self.proxy.invoke(move || lock(&inner).dispense(unit, count))
    }

    /// Record a refill of `unit`.
    pub fn set_unit_count(&self, unit: usize, count: u32) -> bool {
        let mut inner = lock(&self.inner);
        match inner.units.get_mut(unit) {
            Some(entry) => {
                entry.count = count;
                true
            }
            None => false,
        }
    }

    pub fn units(&self) -> Vec<DispenseUnit> {
        lock(&self.inner).units.clone()
    }

    pub fn level(&self) -> WarningLevel {
        lock(&self.inner).engine.level()
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.inner).initialized
    }
}

impl Inner {
    fn on_poll(&mut self) {
        if self.initialized {
            self.simple_poll();
        }
    }

    fn simple_poll(&mut self) {
        let _ = self.engine.poll(&mut self.io);
    }

    fn initialize(&mut self) -> bool {
        if self.initialized {
            return true;
        }
        if let Err(e) = self.io.port.open() {
            warn!(error = %e, "port open failed");
            self.events.emit(DeviceEvent::Initialized(false));
            return false;
        }

        let mut ok = false;
        for attempt in 1..=INITIALIZE_REPEAT_COUNT {
            match self.reset_device() {
                Ok(()) => {
                    ok = true;
                    break;
                }
                Err(e) => warn!(attempt, error = %e, "initialization attempt failed"),
            }
        }

        self.initialized = ok;
        if ok {
            info!(units = self.units.len(), "dispenser initialized");
            self.engine.set_environment_changed();
            let interval = if self.config.enabled() {
                POLLING_INTERVAL_ENABLED
            } else {
                POLLING_INTERVAL_DISABLED
            };
            if let Some(proxy) = self.proxy.upgrade() {
                proxy.start_polling(interval);
            }
        }
        self.events.emit(DeviceEvent::Initialized(ok));
        ok
    }

    fn reset_device(&mut self) -> Result<()> {
        self.io.command(Command::Reset, &[])?;
        // Observe the register at least once before judging readiness.
        self.simple_poll();
        let outcome = self.wait_condition(
            RESET_TIMEOUT,
            |inner| {
                !inner.engine.semantic_present(SemanticStatus::Busy)
                    && inner.engine.level() != WarningLevel::Error
            },
            |_| false,
        );
        if !outcome.is_satisfied() {
            return Err(Error::timeout("dispenser reset"));
        }
        Ok(())
    }

    fn dispense(&mut self, unit: usize, count: u32) -> bool {
        if !self.initialized {
            warn!("dispense on an uninitialized device");
            return false;
        }
        // The wire format carries the count in a single byte.
        if count == 0 || count > u32::from(u8::MAX) {
            warn!(count, "dispense count outside the single-command range");
            return false;
        }
        let Some(entry) = self.units.get(unit) else {
            warn!(unit, "dispense from an unknown unit");
            return false;
        };
        if entry.count < count {
            warn!(
                unit,
                requested = count,
                remaining = entry.count,
                "not enough notes in the unit"
            );
            return false;
        }
        if self.engine.level() == WarningLevel::Error {
            warn!("dispense refused while in error");
            return false;
        }

        let data = [unit as u8, count as u8];
        if let Err(e) = self.io.command(Command::Dispense, &data) {
            warn!(error = %e, "dispense command failed");
            return false;
        }

        self.io.operation_active = true;
        // The busy bit must be seen before "not busy" can mean finished.
        self.simple_poll();
        let outcome = self.wait_condition(
            DISPENSE_TIMEOUT,
            |inner| !inner.engine.semantic_present(SemanticStatus::Busy),
            |inner| inner.engine.level() == WarningLevel::Error,
        );
        self.io.operation_active = false;

        if !outcome.is_satisfied() {
            warn!(unit, count, outcome = ?outcome, "dispense did not complete");
            return false;
        }

        let entry = &mut self.units[unit];
        entry.count -= count;
        let emptied = entry.count == 0;
        info!(unit, count, remaining = entry.count, "dispensed");
        self.events.emit(DeviceEvent::Dispensed { unit, count });
        if emptied {
            self.events.emit(DeviceEvent::UnitEmpty { unit });
        }
        true
    }

    fn wait_condition(
        &mut self,
        timeout: Duration,
        condition: impl Fn(&Inner) -> bool,
        error_condition: impl Fn(&Inner) -> bool,
    ) -> WaitOutcome {
        let cell = RefCell::new(self);
        PollingExpector::new(POLLING_INTERVAL_ENABLED, timeout).wait(
            || cell.borrow_mut().simple_poll(),
            || condition(&cell.borrow()),
            || error_condition(&cell.borrow()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moneta_port::MockPort;
    use moneta_protocol::Frame;
    use std::sync::atomic::{AtomicU32, Ordering};

    const ALL_CLEAR: u8 = 0b1000_0000; // power-good bit set
    const BUSY: u8 = 0b1001_0000;

    fn answer(payload: &[u8]) -> Vec<u8> {
        Frame::pack_payload(VALIDATOR_ADDRESS, payload)
            .unwrap()
            .to_vec()
    }

    /// Device double: acks commands, reports busy for a few status reads
    /// after each dispense.
    fn scripted_device(busy_reads: u32) -> MockPort {
        let (port, handle) = MockPort::new();
        let busy_left = AtomicU32::new(0);
        handle.set_responder(move |request| {
            let frame = Frame::unpack(request).ok()?;
            let command = *frame.data.first()?;
            if command == Command::Ack.code() {
                return None;
            }
            if command == Command::GetStatus.code() {
                let register = if busy_left.load(Ordering::SeqCst) > 0 {
                    busy_left.fetch_sub(1, Ordering::SeqCst);
                    BUSY
                } else {
                    ALL_CLEAR
                };
                return Some(answer(&[register]));
            }
            if command == Command::Dispense.code() {
                busy_left.store(busy_reads, Ordering::SeqCst);
            }
            Some(answer(&[0x00]))
        });
        port
    }

    fn dispenser(
        port: MockPort,
        units: Vec<DispenseUnit>,
    ) -> (CashDispenserHandle, UnboundedReceiver<DeviceEvent>) {
        CashDispenser::new("dispenser", Box::new(port), DeviceConfig::new(), units)
    }

    fn drain(rx: &mut UnboundedReceiver<DeviceEvent>) -> Vec<DeviceEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn dispense_decrements_the_unit_and_emits() {
        let units = vec![
            DispenseUnit::new(100, "RUB", 50),
            DispenseUnit::new(500, "RUB", 20),
        ];
        let (handle, mut rx) = dispenser(scripted_device(2), units);

        assert!(handle.initialize());
        assert!(handle.dispense(1, 5));

        assert_eq!(handle.units()[1].count, 15);
        let events = drain(&mut rx);
        assert!(events.contains(&DeviceEvent::Dispensed { unit: 1, count: 5 }));
        assert!(!events.iter().any(|e| matches!(e, DeviceEvent::UnitEmpty { .. })));
    }

    #[test]
    fn emptied_unit_raises_unit_empty() {
        let units = vec![DispenseUnit::new(100, "RUB", 3)];
        let (handle, mut rx) = dispenser(scripted_device(1), units);

        assert!(handle.initialize());
        assert!(handle.dispense(0, 3));

        assert_eq!(handle.units()[0].count, 0);
        assert!(drain(&mut rx).contains(&DeviceEvent::UnitEmpty { unit: 0 }));
    }

    #[test]
    fn short_unit_refuses_without_touching_the_device() {
        let units = vec![DispenseUnit::new(100, "RUB", 2)];
        let (handle, mut rx) = dispenser(scripted_device(0), units);

        assert!(handle.initialize());
        assert!(!handle.dispense(0, 5));
        assert!(!handle.dispense(7, 1));
        assert!(!handle.dispense(0, 0));

        assert_eq!(handle.units()[0].count, 2);
        let events = drain(&mut rx);
        assert!(!events.iter().any(|e| matches!(e, DeviceEvent::Dispensed { .. })));
    }

    #[test]
    fn oversized_count_never_reaches_the_wire() {
        let (port, mock) = MockPort::new();
        mock.set_responder(move |request| {
            let frame = Frame::unpack(request).ok()?;
            if frame.data.first() == Some(&Command::Ack.code()) {
                return None;
            }
            if frame.data.first() == Some(&Command::GetStatus.code()) {
                return Some(answer(&[ALL_CLEAR]));
            }
            Some(answer(&[0x00]))
        });
        let units = vec![DispenseUnit::new(100, "RUB", 400)];
        let (handle, mut rx) =
            CashDispenser::new("dispenser", Box::new(port), DeviceConfig::new(), units);

        assert!(handle.initialize());
        assert!(!handle.dispense(0, 300));

        // A truncated byte count must not be sent and nothing is paid out.
        assert_eq!(handle.units()[0].count, 400);
        assert!(!mock.requests().iter().any(|request| {
            Frame::unpack(request)
                .is_ok_and(|frame| frame.data.first() == Some(&Command::Dispense.code()))
        }));
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| matches!(e, DeviceEvent::Dispensed { .. })));
    }

    #[test]
    fn refill_restores_the_count() {
        let units = vec![DispenseUnit::new(100, "RUB", 1)];
        let (handle, _rx) = dispenser(scripted_device(0), units);
        assert!(handle.initialize());
        assert!(handle.dispense(0, 1));
        assert_eq!(handle.units()[0].count, 0);

        assert!(handle.set_unit_count(0, 40));
        assert_eq!(handle.units()[0].count, 40);
        assert!(handle.dispense(0, 10));
        assert_eq!(handle.units()[0].count, 30);
    }
}
