//! The cash acceptor driver.
//!
//! All device I/O and state mutation happens on the acceptor's worker
//! thread; [`CashAcceptorHandle`] marshals control calls there through
//! the [`WorkingThreadProxy`] and exposes a few lock-protected reads
//! (par table, reported state) directly to the application thread.
//!
//! # Enable/disable
//!
//! `set_enable` follows the transition discipline of the terminal fleet:
//! short-circuit when already in the target state, wait out an in-flight
//! note before disabling, defer the disable entirely while a note sits in
//! escrow (`check_disable`, resolved by a later poll), and otherwise
//! command the device and poll-wait for the acknowledged state with a
//! bounded number of reset-and-retry rounds. Any error-level status
//! aborts the transition with a disable-biased result: a device that
//! cannot be cleanly disabled is still treated as disabled for flow
//! control, while a device that cannot be enabled reports failure.

use crate::par_table::{parse_bill_table, validate_par_table};
use crate::status_clean::clean_status_codes;
use crate::tables;
use moneta_core::config::keys;
use moneta_core::constants::{
    BAUD_RATE_UPDATE, ESCROW_TIMEOUT, INITIALIZE_REPEAT_COUNT, INITIALIZE_TIMEOUT,
    MAX_COMMAND_ATTEMPT, POLLING_INTERVAL_DISABLED, POLLING_INTERVAL_ENABLED, RESET_TIMEOUT,
    RETURN_TIMEOUT, SET_ENABLE_TIMEOUT, UPDATE_READY_TIMEOUT, UPDATE_SETTLE_PAUSE,
    WRITE_FIRMWARE_MAX_REPEATS,
};
use moneta_core::par::currency_numeric;
use moneta_core::{
    CurrencyError, DeviceConfig, Error, Par, Result, SemanticStatus, StatusCode, StatusCodeSet,
    StatusSpec, WarningLevel,
};
use moneta_device::{
    ByteCodeTable, DeviceEvent, EngineHooks, EventSender, PollOutcome, PollingExpector,
    StatusEngine, UpdateSession, WaitOutcome, WorkingThreadProxy, event_channel, parse_image,
};
use moneta_port::DevicePort;
use moneta_protocol::{CcnetCodec, Codec, Command, VALIDATOR_ADDRESS};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

/// Firmware transfer sub-commands carried in `Download` data.
const DOWNLOAD_EXIT: u8 = 0x00;
const DOWNLOAD_ENTER: u8 = 0x01;
const DOWNLOAD_WRITE: u8 = 0x02;

/// Largest section exponent a device may reasonably request.
const MAX_SECTION_EXPONENT: u8 = 12;

/// I/O side of the driver: everything the polling engine calls into.
struct AcceptorIo {
    port: Box<dyn DevicePort>,
    codec: Box<dyn Codec>,
    table: ByteCodeTable,
    intent_enabled: bool,
    currency_fault: Option<CurrencyError>,
    model_mismatch: bool,
    /// True during an enable/disable transition; vetoes the status
    /// buffer so waits see the device's real state.
    transition: bool,
    escrow_par: Option<u8>,
    stacked_par: Option<u8>,
}

impl AcceptorIo {
    fn command(&mut self, command: Command, data: &[u8]) -> Result<Vec<u8>> {
        let answer = self
            .codec
            .process_command(self.port.as_mut(), command, data)?;
        Ok(answer.to_vec())
    }
}

impl EngineHooks for AcceptorIo {
    fn request_status(&mut self) -> Result<StatusCodeSet> {
        let answer = self.command(Command::Poll, &[])?;
        match answer.first() {
            Some(&tables::ESCROW_CODE) => {
                self.escrow_par = answer.get(tables::ESCROW_PAR_POSITION).copied();
            }
            Some(&tables::STACKED_CODE) => {
                self.stacked_par = answer.get(tables::ESCROW_PAR_POSITION).copied();
            }
            _ => {}
        }
        Ok(self
            .table
            .decode(&answer)
            .into_iter()
            .map(|(_, spec)| spec.code)
            .collect())
    }

    fn clean_status_codes(&mut self, codes: &mut StatusCodeSet) {
        if self.model_mismatch {
            codes.insert(StatusCode::ModelNotVerified);
        }
        clean_status_codes(codes, self.intent_enabled, self.currency_fault);
    }

    fn can_apply_status_buffer(&self) -> bool {
        !self.transition
    }
}

struct Inner {
    io: AcceptorIo,
    engine: StatusEngine,
    events: EventSender,
    config: DeviceConfig,
    /// Weak because the worker's poll callback keeps `Inner` alive; a
    /// strong reference here would cycle and leak the worker thread.
    proxy: Weak<WorkingThreadProxy>,
    pars: BTreeMap<u8, Par>,
    model: String,
    initialized: bool,
    updatable: bool,
    process_enabling: bool,
    process_disabling: bool,
    check_disable: bool,
    pending_disabled_at: Option<Instant>,
    last_escrow: Option<Par>,
    last_stacked: Option<Vec<Par>>,
}

fn lock(inner: &Arc<Mutex<Inner>>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct CashAcceptor;

impl CashAcceptor {
    /// Build a driver over an explicit codec.
    pub fn with_codec(
        name: impl Into<String>,
        port: Box<dyn DevicePort>,
        codec: Box<dyn Codec>,
        config: DeviceConfig,
    ) -> (CashAcceptorHandle, UnboundedReceiver<DeviceEvent>) {
        let name = name.into();
        let (events, rx) = event_channel(name.clone());
        let proxy = Arc::new(WorkingThreadProxy::new(format!("{name}-worker")));
        let engine = StatusEngine::new(StatusSpec::standard(), events.clone());

        let inner = Arc::new(Mutex::new(Inner {
            io: AcceptorIo {
                port,
                codec,
                table: tables::poll_code_table(),
                intent_enabled: false,
                currency_fault: None,
                model_mismatch: false,
                transition: false,
                escrow_par: None,
                stacked_par: None,
            },
            engine,
            events,
            config,
            proxy: Arc::downgrade(&proxy),
            pars: BTreeMap::new(),
            model: String::new(),
            initialized: false,
            updatable: true,
            process_enabling: false,
            process_disabling: false,
            check_disable: false,
            pending_disabled_at: None,
            last_escrow: None,
            last_stacked: None,
        }));

        let poll_inner = inner.clone();
        proxy.set_poll_callback(move || lock(&poll_inner).on_poll());

        (CashAcceptorHandle { inner, proxy }, rx)
    }

    /// Build a driver with the reference codec on the standard address.
    pub fn new(
        name: impl Into<String>,
        port: Box<dyn DevicePort>,
        config: DeviceConfig,
    ) -> (CashAcceptorHandle, UnboundedReceiver<DeviceEvent>) {
        Self::with_codec(
            name,
            port,
            Box::new(CcnetCodec::new(VALIDATOR_ADDRESS)),
            config,
        )
    }
}

/// Application-side handle; cheap to clone.
#[derive(Clone)]
pub struct CashAcceptorHandle {
    inner: Arc<Mutex<Inner>>,
    proxy: Arc<WorkingThreadProxy>,
}

impl CashAcceptorHandle {
    /// Open the port, identify the device, load the par table and start
    /// polling. Retried internally; false means the device is unusable.
    pub fn initialize(&self) -> bool {
        let inner = self.inner.clone();
        self.proxy.invoke(move || lock(&inner).initialize())
    }

    /// Turn money acceptance on or off. See the module docs for the
    /// transition discipline and result bias.
    pub fn set_enable(&self, enabled: bool) -> bool {
        let inner = self.inner.clone();
        self.proxy.invoke(move || lock(&inner).set_enable(enabled))
    }

    /// Commit the escrowed note.
    pub fn stack(&self) -> bool {
        let inner = self.inner.clone();
        self.proxy.invoke(move || lock(&inner).escrow_action(Command::Stack))
    }

    /// Return the escrowed note to the customer and wait for it to
    /// leave the device.
    pub fn return_note(&self) -> bool {
        let inner = self.inner.clone();
        self.proxy.invoke(move || lock(&inner).return_note())
    }

    pub fn can_update_firmware(&self) -> bool {
        let inner = self.inner.clone();
        self.proxy.invoke(move || lock(&inner).can_update_firmware())
    }

    /// Transfer a firmware image. The device is force-reset afterwards
    /// regardless of the outcome and an `Updated` event is emitted.
    pub fn update_firmware(&self, image: Vec<u8>) -> bool {
        let inner = self.inner.clone();
        self.proxy.invoke(move || lock(&inner).update_firmware(&image))
    }

    /// Device-reported acceptance state (not the configured intent).
    pub fn is_enabled(&self) -> bool {
        lock(&self.inner).in_target_state(true)
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.inner).initialized
    }

    /// Current warning level as last reported to the application.
    pub fn level(&self) -> WarningLevel {
        lock(&self.inner).engine.level()
    }

    /// Snapshot of the denomination table.
    pub fn pars(&self) -> Vec<Par> {
        lock(&self.inner).pars.values().cloned().collect()
    }

    pub fn model(&self) -> String {
        lock(&self.inner).model.clone()
    }
}

impl Inner {
    // ----- lifecycle ---------------------------------------------------

    fn initialize(&mut self) -> bool {
        if self.initialized {
            return true;
        }
        if let Err(e) = self.io.port.open() {
            warn!(error = %e, "port open failed");
            self.events.emit(DeviceEvent::Initialized(false));
            return false;
        }

        let deadline = Instant::now()
            + self
                .config
                .get_ms(keys::INITIALIZE_TIMEOUT)
                .unwrap_or(INITIALIZE_TIMEOUT);
        let mut ok = false;
        for attempt in 1..=INITIALIZE_REPEAT_COUNT {
            match self.try_initialize() {
                Ok(()) => {
                    ok = true;
                    break;
                }
                Err(e) => warn!(attempt, error = %e, "initialization attempt failed"),
            }
            if Instant::now() >= deadline {
                warn!(attempt, "initialization deadline passed, giving up");
                break;
            }
        }

        self.initialized = ok;
        if ok {
            info!(model = %self.model, "acceptor initialized");
            self.io.intent_enabled = false;
            self.engine.set_environment_changed();
            self.apply_polling_interval();
        }
        self.events.emit(DeviceEvent::Initialized(ok));
        ok
    }

    fn try_initialize(&mut self) -> Result<()> {
        let answer = self.io.command(Command::Identification, &[])?;
        self.model = tables::parse_identification(&answer);
        if let Some(expected) = self.config.get_str(keys::MODEL_NAME)
            && expected != self.model
        {
            warn!(reported = %self.model, expected, "model mismatch");
            self.io.model_mismatch = true;
        }
        self.reset_device(true)?;
        self.update_parameters()?;
        Ok(())
    }

    /// Reload and validate the par table; a currency fault is remembered
    /// and injected into every status cycle until it clears.
    fn update_parameters(&mut self) -> Result<()> {
        match self.process_par_table() {
            Ok(()) => {
                self.io.currency_fault = None;
                Ok(())
            }
            Err(fault) => {
                warn!(fault = ?fault, "par table rejected");
                self.io.currency_fault = Some(fault);
                Err(Error::Currency(fault))
            }
        }
    }

    fn process_par_table(&mut self) -> std::result::Result<(), CurrencyError> {
        let answer = self
            .io
            .command(Command::GetBillTable, &[])
            .map_err(|_| CurrencyError::Loading)?;
        let mut table = parse_bill_table(&answer).map_err(|_| CurrencyError::Loading)?;
        let result = validate_par_table(
            &mut table,
            self.config.get_str(keys::SYSTEM_CURRENCY_ID),
        );
        self.pars = table;
        result
    }

    // ----- polling -----------------------------------------------------

    fn on_poll(&mut self) {
        if !self.initialized {
            return;
        }
        let outcome = self.engine.poll(&mut self.io);
        self.post_polling_action(outcome);
    }

    /// One engine cycle without post-polling side effects; used by wait
    /// loops inside transitions.
    fn simple_poll(&mut self) {
        let _ = self.engine.poll(&mut self.io);
    }

    fn post_polling_action(&mut self, outcome: PollOutcome) {
        if let Some(at) = self.pending_disabled_at
            && Instant::now() >= at
        {
            self.pending_disabled_at = None;
            self.events.emit(DeviceEvent::Disabled);
        }

        if outcome.collection.contains(StatusCode::Escrow) {
            if let Some(index) = self.io.escrow_par.take() {
                self.handle_escrow(index);
            }
        } else {
            self.io.escrow_par = None;
        }

        if let Some(index) = self.io.stacked_par.take() {
            self.handle_stacked(index);
        }

        if self.check_disable && self.can_disable() {
            debug!("resolving deferred disable");
            self.check_disable = false;
            self.io.transition = true;
            if self.process_and_wait(false) {
                self.finish_transition(false);
            } else {
                self.io.transition = false;
                warn!("deferred disable failed");
            }
        }

        if outcome.recovered_from_error {
            // Errors may have invalidated the billset; refresh and
            // re-assert the configured intent.
            let _ = self.update_parameters();
            let intent = self.config.enabled();
            if intent != self.in_target_state(true) {
                let _ = self.set_enable(intent);
            }
        }
    }

    fn handle_escrow(&mut self, index: u8) {
        match self.validate_escrow(index) {
            Ok(par) => {
                info!(nominal = par.nominal, currency = %par.currency, "note in escrow");
                self.last_escrow = Some(par.clone());
                self.events.emit(DeviceEvent::Escrow(par));
            }
            Err(reason) => {
                warn!(index, reason, "invalid escrow, returning note");
                let _ = self.io.command(Command::Return, &[]);
            }
        }
    }

    fn validate_escrow(&self, index: u8) -> std::result::Result<Par, &'static str> {
        let par = self.pars.get(&index).ok_or("unknown bill type")?;
        if par.nominal == 0 {
            return Err("zero nominal");
        }
        if currency_numeric(&par.currency).is_none() {
            return Err("unknown currency");
        }
        if !par.enabled || par.inhibit {
            return Err("denomination not enabled");
        }
        Ok(par.clone())
    }

    fn handle_stacked(&mut self, index: u8) {
        let par = self
            .last_escrow
            .take()
            .or_else(|| self.pars.get(&index).cloned());
        let Some(par) = par else {
            warn!(index, "stacked an unknown bill type");
            return;
        };
        let stacked = vec![par];

        let filter = self.config.get_bool(keys::STACKED_FILTER).unwrap_or(false);
        if filter && self.last_stacked.as_ref() == Some(&stacked) {
            debug!("duplicate stacked report filtered");
            return;
        }
        self.last_stacked = Some(stacked.clone());
        self.events.emit(DeviceEvent::Stacked(stacked));
    }

    // ----- predicates --------------------------------------------------

    fn in_target_state(&self, enabled: bool) -> bool {
        let Some(collection) = self.engine.last() else {
            return false;
        };
        if enabled {
            collection.contains(StatusCode::Enabled)
                || collection.contains(StatusCode::Accepting)
        } else {
            collection.contains(StatusCode::Disabled)
                || collection.contains(StatusCode::Inhibit)
        }
    }

    /// Stable means the device reports a plain acceptance state rather
    /// than an operation in progress.
    fn is_stable(&self) -> bool {
        self.engine
            .last()
            .is_some_and(|c| c.codes().iter().any(|code| code.is_ordinary()))
    }

    fn can_disable(&self) -> bool {
        !self.engine.semantic_present(SemanticStatus::Escrow)
            && !self.engine.semantic_present(SemanticStatus::BillOperation)
            && !self.engine.semantic_present(SemanticStatus::Busy)
    }

    // ----- enable/disable state machine --------------------------------

    fn set_enable(&mut self, enabled: bool) -> bool {
        if !self.initialized {
            warn!("set_enable on an uninitialized device");
            return !enabled;
        }
        if enabled && self.io.currency_fault.is_some() {
            warn!("enable refused: currency configuration fault");
            return false;
        }

        if self.in_target_state(enabled) {
            self.config.set_enabled(enabled);
            self.io.intent_enabled = enabled;
            self.apply_polling_interval();
            self.engine.restore_statuses(&mut self.io);
            return true;
        }

        if enabled {
            self.process_enabling = true;
        } else {
            self.process_disabling = true;
        }
        self.io.transition = true;

        let result = self.run_set_enable(enabled);

        self.process_enabling = false;
        self.process_disabling = false;
        self.io.transition = false;
        result
    }

    fn run_set_enable(&mut self, enabled: bool) -> bool {
        if !enabled {
            if self
                .engine
                .last()
                .is_some_and(|c| c.contains(StatusCode::Accepting))
            {
                let outcome = self.wait_condition(
                    ESCROW_TIMEOUT,
                    |inner| {
                        !inner
                            .engine
                            .last()
                            .is_some_and(|c| c.contains(StatusCode::Accepting))
                    },
                    |inner| inner.engine.level() == WarningLevel::Error,
                );
                if outcome == WaitOutcome::ErrorCondition {
                    return self.cancel_set_enable(enabled);
                }
            }

            if !self.can_disable() {
                // A note is held in escrow: the stack/return decision
                // belongs to the application, so the disable completes
                // asynchronously once the operation resolves.
                info!("disable deferred until the current operation resolves");
                self.check_disable = true;
                self.config.set_enabled(false);
                self.io.intent_enabled = false;
                self.process_disabling = false;
                self.io.transition = false;
                return true;
            }
        }

        if !self.process_and_wait(enabled) {
            return self.cancel_set_enable(enabled);
        }
        self.finish_transition(enabled);
        true
    }

    /// Command the target mode and poll-wait for the acknowledgment,
    /// resetting the device between attempts.
    fn process_and_wait(&mut self, enabled: bool) -> bool {
        for attempt in 1..=MAX_COMMAND_ATTEMPT {
            if attempt > 1 && self.reset_device(true).is_err() {
                continue;
            }
            if !self.process_enable_command(enabled) {
                continue;
            }
            let outcome = self.wait_condition(
                SET_ENABLE_TIMEOUT,
                |inner| inner.in_target_state(enabled),
                |inner| {
                    inner.engine.level() == WarningLevel::Error
                        || (!enabled && inner.engine.semantic_present(SemanticStatus::BillOperation))
                },
            );
            match outcome {
                WaitOutcome::Satisfied => return true,
                WaitOutcome::ErrorCondition => return false,
                WaitOutcome::TimedOut => {
                    warn!(attempt, enabled, "device did not acknowledge the mode change");
                }
            }
        }
        false
    }

    fn process_enable_command(&mut self, enabled: bool) -> bool {
        let data = acceptance_mask(&self.pars, enabled);
        match self.io.command(Command::EnableBillTypes, &data) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "enable command failed");
                false
            }
        }
    }

    /// Abort the transition: force-disable best effort and report the
    /// disable-biased result.
    fn cancel_set_enable(&mut self, enabled: bool) -> bool {
        warn!(enabled, "cancelling the enable transition");
        let _ = self.process_enable_command(false);
        self.config.set_enabled(false);
        self.io.intent_enabled = false;
        self.check_disable = false;
        self.process_enabling = false;
        self.process_disabling = false;
        self.io.transition = false;
        self.apply_polling_interval();
        self.engine.restore_statuses(&mut self.io);
        !enabled
    }

    fn finish_transition(&mut self, enabled: bool) {
        self.config.set_enabled(enabled);
        self.io.intent_enabled = enabled;
        self.process_enabling = false;
        self.process_disabling = false;
        self.io.transition = false;
        self.apply_polling_interval();

        if enabled {
            self.events.emit(DeviceEvent::Enabled);
        } else {
            match self.config.get_ms(keys::DISABLING_TIMEOUT) {
                Some(grace) if !grace.is_zero() => {
                    self.pending_disabled_at = Some(Instant::now() + grace);
                }
                _ => self.events.emit(DeviceEvent::Disabled),
            }
        }
        self.engine.restore_statuses(&mut self.io);
    }

    fn apply_polling_interval(&self) {
        let interval = if self.config.enabled() {
            POLLING_INTERVAL_ENABLED
        } else {
            POLLING_INTERVAL_DISABLED
        };
        if let Some(proxy) = self.proxy.upgrade() {
            proxy.start_polling(interval);
        }
    }

    /// Poll-wait with the driver's own cadence. The expector checks the
    /// conditions before the first poll, so an already-satisfied wait
    /// costs nothing.
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

    fn reset_device(&mut self, wait: bool) -> Result<()> {
        self.io.command(Command::Reset, &[])?;
        if wait {
            let outcome = self.wait_condition(RESET_TIMEOUT, Inner::is_stable, |_| false);
            if !outcome.is_satisfied() {
                return Err(Error::timeout("device reset"));
            }
        }
        Ok(())
    }

    fn escrow_action(&mut self, command: Command) -> bool {
        if !self
            .engine
            .last()
            .is_some_and(|c| c.contains(StatusCode::Escrow))
        {
            warn!(command = ?command, "no note in escrow");
            return false;
        }
        self.io.command(command, &[]).is_ok()
    }

    fn return_note(&mut self) -> bool {
        if !self.escrow_action(Command::Return) {
            return false;
        }
        self.wait_condition(
            RETURN_TIMEOUT,
            |inner| !inner.engine.semantic_present(SemanticStatus::Escrow),
            |inner| inner.engine.level() == WarningLevel::Error,
        )
        .is_satisfied()
    }

    // ----- firmware update ---------------------------------------------

    fn can_update_firmware(&mut self) -> bool {
        if !(self.updatable && self.initialized && self.engine.level() != WarningLevel::Error) {
            return false;
        }
        // Updates run only off the enabled state.
        !self.config.enabled() || self.set_enable(false)
    }

    fn update_firmware(&mut self, image: &[u8]) -> bool {
        if !self.can_update_firmware() {
            warn!("firmware update refused");
            self.events.emit(DeviceEvent::Updated(false));
            return false;
        }

        let result = self.perform_update(image);
        if let Err(e) = &result {
            warn!(error = %e, "firmware update failed");
        }

        // The device returns to a known state regardless of the outcome.
        if self.reset_device(true).is_err() {
            warn!("post-update reset failed");
        }
        self.engine.set_environment_changed();

        let ok = result.is_ok();
        self.events.emit(DeviceEvent::Updated(ok));
        ok
    }

    fn perform_update(&mut self, image: &[u8]) -> Result<()> {
        // Captured so the working line discipline comes back after the
        // high-speed transfer, whatever it was.
        let work_parameters = self.io.port.parameters();
        self.io.command(Command::Download, &[DOWNLOAD_ENTER])?;
        self.io
            .port
            .set_parameters(&work_parameters.with_baud_rate(BAUD_RATE_UPDATE))?;
        std::thread::sleep(UPDATE_SETTLE_PAUSE);

        let transfer = self.transfer_image(image);

        // Baud and mode are restored even when the transfer failed.
        let restore = self.io.port.set_parameters(&work_parameters);
        let exit = self.io.command(Command::Download, &[DOWNLOAD_EXIT]);
        transfer?;
        restore?;

        let answer = exit?;
        let status = answer.first().copied().unwrap_or(0xFF);
        let decoded = tables::update_answer_table().decode(&[status]);
        let spec = &decoded[0].1;
        match self.engine.spec().level_of(spec.code) {
            WarningLevel::Ok => Ok(()),
            WarningLevel::Warning => {
                warn!(status, description = %spec.description, "update finished with a warning");
                Ok(())
            }
            WarningLevel::Error => Err(Error::firmware(spec.description.clone())),
        }
    }

    fn transfer_image(&mut self, image: &[u8]) -> Result<()> {
        self.wait_update_ready()?;

        let answer = self.io.command(Command::BlockSize, &[])?;
        let exponent = *answer.first().ok_or(Error::AnswerTooShort {
            expected: 1,
            actual: 0,
        })?;
        if !(2..=MAX_SECTION_EXPONENT).contains(&exponent) {
            return Err(Error::firmware(format!(
                "device requested an implausible section exponent {exponent}"
            )));
        }
        let section = 1usize << exponent;

        let blocks = parse_image(image, section)?;
        info!(blocks = blocks.len(), section, "starting firmware transfer");
        let mut session = UpdateSession::new(blocks, WRITE_FIRMWARE_MAX_REPEATS);

        while let Some(block) = session.current().cloned() {
            let mut data = Vec::with_capacity(block.data.len() + 4);
            data.push(DOWNLOAD_WRITE);
            data.extend_from_slice(&[
                (block.address >> 16) as u8,
                (block.address >> 8) as u8,
                block.address as u8,
            ]);
            data.extend_from_slice(&block.data);

            match self.io.command(Command::Download, &data) {
                Ok(answer) => {
                    let status = answer.first().copied().unwrap_or(0x00);
                    if status != 0x00 {
                        let decoded = tables::update_answer_table().decode(&[status]);
                        return Err(Error::firmware(format!(
                            "block {:#08x} rejected: {}",
                            block.address, decoded[0].1.description
                        )));
                    }
                    session.advance();
                }
                Err(Error::NoAnswer) => {
                    if !session.retry() {
                        return Err(Error::firmware(format!(
                            "no answer writing block {:#08x}",
                            block.address
                        )));
                    }
                    debug!(address = block.address, "silent block write, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        info!(written = session.written(), "firmware transfer complete");
        Ok(())
    }

    fn wait_update_ready(&mut self) -> Result<()> {
        let deadline = Instant::now() + UPDATE_READY_TIMEOUT;
        loop {
            match self.io.command(Command::UpdateStatus, &[]) {
                Ok(answer) => match answer.first() {
                    Some(&tables::UPDATE_READY) => return Ok(()),
                    Some(&tables::UPDATE_BUSY) | None => {}
                    Some(&other) => {
                        return Err(Error::firmware(format!(
                            "update refused, status {other:#04x}"
                        )));
                    }
                },
                // The device may stay silent while switching modes.
                Err(Error::NoAnswer) => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(Error::timeout("update mode ready"));
            }
            std::thread::sleep(Duration::from_millis(200));
        }
    }
}

/// Bill-type bitmask for the enable command: three bytes of acceptance
/// flags followed by the same three bytes of escrow-mode flags. Bit
/// layout follows the wire convention: position 0 lives in the last
/// mask byte's lowest bit.
fn acceptance_mask(pars: &BTreeMap<u8, Par>, enabled: bool) -> Vec<u8> {
    let mut mask = [0u8; 3];
    if enabled {
        for (&position, par) in pars {
            if !(par.enabled && par.acceptable()) || position >= 24 {
                continue;
            }
            let index = 2 - (position / 8) as usize;
            mask[index] |= 1 << (position % 8);
        }
    }
    let mut data = mask.to_vec();
    data.extend_from_slice(&mask);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn par(nominal: u64, enabled: bool) -> Par {
        let mut par = Par::new(nominal, "RUB");
        par.inhibit = false;
        par.enabled = enabled;
        par
    }

    #[test]
    fn acceptance_mask_sets_bits_for_enabled_pars() {
        let mut pars = BTreeMap::new();
        pars.insert(0u8, par(100, true));
        pars.insert(9u8, par(500, true));
        pars.insert(3u8, par(1000, false));

        let data = acceptance_mask(&pars, true);
        assert_eq!(data.len(), 6);
        assert_eq!(data[2], 0b0000_0001); // position 0
        assert_eq!(data[1], 0b0000_0010); // position 9
        assert_eq!(data[0], 0);
        assert_eq!(&data[..3], &data[3..]);
    }

    #[test]
    fn disable_mask_is_all_zero() {
        let mut pars = BTreeMap::new();
        pars.insert(0u8, par(100, true));
        assert_eq!(acceptance_mask(&pars, false), vec![0u8; 6]);
    }

    #[test]
    fn inhibited_pars_stay_masked_out() {
        let mut pars = BTreeMap::new();
        let mut blocked = par(100, true);
        blocked.inhibit = true;
        pars.insert(0u8, blocked);
        assert_eq!(acceptance_mask(&pars, true), vec![0u8; 6]);
    }
}
