//! The emulated validator proper.
//!
//! # Acceptance state machine
//!
//! ```text
//! PowerUp ──reset──▶ Initializing ──▶ Disabled ⟷ Enabled
//!                                                  │ insert_note
//!                                                  ▼
//!                         Escrow ◀── Accepting ────┘
//!                        │      │
//!                  stack │      │ return
//!                        ▼      ▼
//!                  Stacking    Returning ──▶ Returned ──▶ idle
//!                        │
//!                        ▼
//!                     Stacked ──▶ idle
//! ```
//!
//! Transient phases (`Accepting`, `Stacking`, `Returning`) hold for a
//! configurable number of polls, and the one-shot `Stacked`/`Returned`
//! reports appear for exactly one poll, the way real validators report
//! note movement.

use moneta_core::{Error, Result};
use moneta_port::{DevicePort, PortParameters};
use moneta_protocol::{Command, Frame, VALIDATOR_ADDRESS};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

const ACK: u8 = 0x00;
const NAK: u8 = 0xFF;

/// Firmware transfer sub-commands (first `Download` data byte).
const DOWNLOAD_EXIT: u8 = 0x00;
const DOWNLOAD_ENTER: u8 = 0x01;
const DOWNLOAD_WRITE: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    PowerUp,
    Initializing(u32),
    Disabled,
    Enabled,
    Accepting { bill: u8, polls: u32 },
    Escrow(u8),
    Stacking { bill: u8, polls: u32 },
    Stacked(u8),
    Returning(u32),
    Returned,
}

struct UpdateMode {
    busy_remaining: u32,
    silent_remaining: u32,
    blocks: Vec<(u32, Vec<u8>)>,
}

struct Shared {
    open: bool,
    state: State,
    intent_enabled: bool,
    model: String,
    bill_table: Vec<u8>,
    failure: Option<u8>,
    silent_polls: u32,
    pending: Option<Vec<u8>>,
    parameters: Option<PortParameters>,
    update: Option<UpdateMode>,
    written_blocks: Vec<(u32, Vec<u8>)>,
    section_exponent: u8,
    update_busy_polls: u32,
    silent_per_block: u32,
    update_exit_status: u8,
}

impl Shared {
    fn idle_state(&self) -> State {
        if self.intent_enabled {
            State::Enabled
        } else {
            State::Disabled
        }
    }

    /// Status payload for the current state, then advance transient
    /// phases.
    fn poll_answer(&mut self) -> Option<Vec<u8>> {
        if self.silent_polls > 0 {
            self.silent_polls -= 1;
            return None;
        }
        if let Some(code) = self.failure {
            return Some(vec![code]);
        }

        let (answer, next) = match self.state {
            State::PowerUp => (vec![0x10], State::PowerUp),
            State::Initializing(0) => (vec![0x13], self.idle_state()),
            State::Initializing(n) => (vec![0x13], State::Initializing(n - 1)),
            State::Disabled => (vec![0x19], State::Disabled),
            State::Enabled => (vec![0x14], State::Enabled),
            State::Accepting { bill, polls: 0 } => (vec![0x15], State::Escrow(bill)),
            State::Accepting { bill, polls } => {
                (vec![0x15], State::Accepting { bill, polls: polls - 1 })
            }
            State::Escrow(bill) => (vec![0x80, bill], State::Escrow(bill)),
            State::Stacking { bill, polls: 0 } => (vec![0x17], State::Stacked(bill)),
            State::Stacking { bill, polls } => {
                (vec![0x17], State::Stacking { bill, polls: polls - 1 })
            }
            State::Stacked(bill) => (vec![0x81, bill], self.idle_state()),
            State::Returning(0) => (vec![0x18], State::Returned),
            State::Returning(n) => (vec![0x18], State::Returning(n - 1)),
            State::Returned => (vec![0x82], self.idle_state()),
        };
        self.state = next;
        Some(answer)
    }

    /// Run one request payload through the device; None means silence.
    fn execute(&mut self, payload: &[u8]) -> Option<Vec<u8>> {
        let (&command, data) = payload.split_first()?;
        // The host's trailing ACK carries no command.
        if command == ACK && data.is_empty() {
            return None;
        }

        match command {
            code if code == Command::Reset.code() => {
                self.state = State::Initializing(1);
                self.intent_enabled = false;
                self.failure = None;
                self.update = None;
                Some(vec![ACK])
            }
            code if code == Command::Poll.code() => self.poll_answer(),
            code if code == Command::GetStatus.code() => match self.state {
                State::Escrow(bill) => Some(vec![0x80, bill]),
                _ => self.poll_answer(),
            },
            code if code == Command::EnableBillTypes.code() => {
                self.intent_enabled = data.iter().any(|&b| b != 0);
                if matches!(self.state, State::Disabled | State::Enabled) {
                    self.state = self.idle_state();
                }
                Some(vec![ACK])
            }
            code if code == Command::Stack.code() => {
                if let State::Escrow(bill) = self.state {
                    self.state = State::Stacking { bill, polls: 1 };
                }
                Some(vec![ACK])
            }
            code if code == Command::Return.code() => {
                if let State::Escrow(_) = self.state {
                    self.state = State::Returning(1);
                }
                Some(vec![ACK])
            }
            code if code == Command::Identification.code() => {
                Some(self.model.as_bytes().to_vec())
            }
            code if code == Command::GetBillTable.code() => Some(self.bill_table.clone()),
            code if code == Command::Download.code() => self.execute_download(data),
            code if code == Command::UpdateStatus.code() => match &mut self.update {
                Some(update) if update.busy_remaining > 0 => {
                    update.busy_remaining -= 1;
                    Some(vec![0x00])
                }
                Some(_) => Some(vec![0x01]),
                None => Some(vec![0x00]),
            },
            code if code == Command::BlockSize.code() => Some(vec![self.section_exponent]),
            code => {
                warn!(code, "unrecognized command");
                Some(vec![NAK])
            }
        }
    }

    fn execute_download(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        match data.first() {
            Some(&DOWNLOAD_ENTER) => {
                self.update = Some(UpdateMode {
                    busy_remaining: self.update_busy_polls,
                    silent_remaining: self.silent_per_block,
                    blocks: Vec::new(),
                });
                Some(vec![ACK])
            }
            Some(&DOWNLOAD_WRITE) => {
                let Some(update) = &mut self.update else {
                    return Some(vec![NAK]);
                };
                if update.silent_remaining > 0 {
                    update.silent_remaining -= 1;
                    debug!("staying silent on block write");
                    return None;
                }
                if data.len() < 4 {
                    return Some(vec![NAK]);
                }
                let address =
                    u32::from(data[1]) << 16 | u32::from(data[2]) << 8 | u32::from(data[3]);
                update.blocks.push((address, data[4..].to_vec()));
                update.silent_remaining = self.silent_per_block;
                Some(vec![ACK])
            }
            Some(&DOWNLOAD_EXIT) => {
                if let Some(update) = self.update.take() {
                    self.written_blocks = update.blocks;
                }
                Some(vec![self.update_exit_status])
            }
            _ => Some(vec![NAK]),
        }
    }
}

fn default_bill_table() -> Vec<u8> {
    // Positions 0..6: 10..5000 RUB.
    [
        (1u8, 1u8),
        (5, 1),
        (1, 2),
        (5, 2),
        (1, 3),
        (5, 3),
    ]
    .iter()
    .flat_map(|&(digits, exponent)| {
        let mut entry = vec![digits];
        entry.extend_from_slice(b"RUB");
        entry.push(exponent);
        entry
    })
    .collect()
}

/// The device side: hand this to a driver as its port.
pub struct EmulatedAcceptor {
    shared: Arc<Mutex<Shared>>,
}

/// The test side: scripts the device while a driver talks to it.
#[derive(Clone)]
pub struct EmulatorHandle {
    shared: Arc<Mutex<Shared>>,
}

fn lock(shared: &Arc<Mutex<Shared>>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EmulatedAcceptor {
    pub fn new() -> (EmulatedAcceptor, EmulatorHandle) {
        let shared = Arc::new(Mutex::new(Shared {
            open: false,
            state: State::PowerUp,
            intent_enabled: false,
            model: "SM-2072".to_string(),
            bill_table: default_bill_table(),
            failure: None,
            silent_polls: 0,
            pending: None,
            parameters: None,
            update: None,
            written_blocks: Vec::new(),
            section_exponent: 5,
            update_busy_polls: 1,
            silent_per_block: 0,
            update_exit_status: 0x00,
        }));
        (
            EmulatedAcceptor {
                shared: shared.clone(),
            },
            EmulatorHandle { shared },
        )
    }
}

impl DevicePort for EmulatedAcceptor {
    fn open(&mut self) -> Result<()> {
        lock(&self.shared).open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        lock(&self.shared).open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        lock(&self.shared).open
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut shared = lock(&self.shared);
        if !shared.open {
            return Err(Error::PortClosed);
        }
        let Ok(frame) = Frame::unpack(data) else {
            warn!("discarding a malformed request frame");
            return Ok(());
        };
        if frame.address != VALIDATOR_ADDRESS {
            return Ok(());
        }
        shared.pending = shared
            .execute(&frame.data)
            .map(|payload| {
                Frame::pack_payload(VALIDATOR_ADDRESS, &payload).map(|frame| frame.to_vec())
            })
            .transpose()?;
        Ok(())
    }

    fn read(&mut self, _timeout: Duration) -> Result<Vec<u8>> {
        let mut shared = lock(&self.shared);
        if !shared.open {
            return Err(Error::PortClosed);
        }
        Ok(shared.pending.take().unwrap_or_default())
    }

    fn set_parameters(&mut self, parameters: &PortParameters) -> Result<()> {
        lock(&self.shared).parameters = Some(*parameters);
        Ok(())
    }

    fn parameters(&self) -> PortParameters {
        lock(&self.shared).parameters.unwrap_or_default()
    }
}

impl EmulatorHandle {
    /// Feed a note of the given bill type; only an enabled device starts
    /// accepting.
    pub fn insert_note(&self, bill_type: u8) -> bool {
        let mut shared = lock(&self.shared);
        if shared.state != State::Enabled {
            warn!(state = ?shared.state, "note fed while not accepting");
            return false;
        }
        shared.state = State::Accepting {
            bill: bill_type,
            polls: 1,
        };
        true
    }

    /// Report this raw status byte on every poll until cleared or reset.
    pub fn set_failure(&self, code: u8) {
        lock(&self.shared).failure = Some(code);
    }

    pub fn clear_failure(&self) {
        lock(&self.shared).failure = None;
    }

    /// Swallow the next `count` polls without answering.
    pub fn silence_polls(&self, count: u32) {
        lock(&self.shared).silent_polls = count;
    }

    pub fn set_model(&self, model: impl Into<String>) {
        lock(&self.shared).model = model.into();
    }

    /// Replace the bill table with raw five-byte entries.
    pub fn set_bill_table(&self, table: Vec<u8>) {
        lock(&self.shared).bill_table = table;
    }

    pub fn set_section_exponent(&self, exponent: u8) {
        lock(&self.shared).section_exponent = exponent;
    }

    /// Polls of `UpdateStatus` answered busy before ready.
    pub fn set_update_busy_polls(&self, polls: u32) {
        lock(&self.shared).update_busy_polls = polls;
    }

    /// Consecutive silent answers before each block write is accepted.
    pub fn set_silent_block_answers(&self, count: u32) {
        lock(&self.shared).silent_per_block = count;
    }

    /// Final status byte the exit-update answer carries.
    pub fn set_update_exit_status(&self, status: u8) {
        lock(&self.shared).update_exit_status = status;
    }

    /// Blocks received during the last completed firmware transfer.
    pub fn written_blocks(&self) -> Vec<(u32, Vec<u8>)> {
        lock(&self.shared).written_blocks.clone()
    }

    /// Device-side acceptance state.
    pub fn reports_enabled(&self) -> bool {
        lock(&self.shared).state == State::Enabled
    }

    /// A note currently sits in escrow.
    pub fn in_escrow(&self) -> bool {
        matches!(lock(&self.shared).state, State::Escrow(_))
    }

    /// Line parameters last applied by the driver.
    pub fn parameters(&self) -> Option<PortParameters> {
        lock(&self.shared).parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moneta_protocol::{CcnetCodec, Codec};

    fn device() -> (EmulatedAcceptor, EmulatorHandle, CcnetCodec) {
        let (mut port, handle) = EmulatedAcceptor::new();
        port.open().unwrap();
        (port, handle, CcnetCodec::new(VALIDATOR_ADDRESS))
    }

    fn poll(port: &mut EmulatedAcceptor, codec: &mut CcnetCodec) -> Vec<u8> {
        codec
            .process_command(port, Command::Poll, &[])
            .unwrap()
            .to_vec()
    }

    #[test]
    fn reset_leads_to_disabled() {
        let (mut port, _handle, mut codec) = device();
        assert_eq!(poll(&mut port, &mut codec), vec![0x10]);

        codec.process_command(&mut port, Command::Reset, &[]).unwrap();
        assert_eq!(poll(&mut port, &mut codec), vec![0x13]);
        assert_eq!(poll(&mut port, &mut codec), vec![0x13]);
        assert_eq!(poll(&mut port, &mut codec), vec![0x19]);
    }

    #[test]
    fn enable_then_note_walks_the_escrow_cycle() {
        let (mut port, handle, mut codec) = device();
        codec.process_command(&mut port, Command::Reset, &[]).unwrap();
        poll(&mut port, &mut codec);
        poll(&mut port, &mut codec);

        codec
            .process_command(&mut port, Command::EnableBillTypes, &[0x3F, 0, 0, 0x3F, 0, 0])
            .unwrap();
        assert_eq!(poll(&mut port, &mut codec), vec![0x14]);

        assert!(handle.insert_note(2));
        assert_eq!(poll(&mut port, &mut codec), vec![0x15]);
        assert_eq!(poll(&mut port, &mut codec), vec![0x15]);
        assert_eq!(poll(&mut port, &mut codec), vec![0x80, 2]);
        assert!(handle.in_escrow());

        codec.process_command(&mut port, Command::Stack, &[]).unwrap();
        assert_eq!(poll(&mut port, &mut codec), vec![0x17]);
        assert_eq!(poll(&mut port, &mut codec), vec![0x17]);
        assert_eq!(poll(&mut port, &mut codec), vec![0x81, 2]);
        assert_eq!(poll(&mut port, &mut codec), vec![0x14]);
    }

    #[test]
    fn returned_note_reports_once_then_idle() {
        let (mut port, handle, mut codec) = device();
        codec.process_command(&mut port, Command::Reset, &[]).unwrap();
        codec
            .process_command(&mut port, Command::EnableBillTypes, &[0xFF, 0xFF, 0xFF, 0, 0, 0])
            .unwrap();
        while poll(&mut port, &mut codec) != vec![0x14] {}
        assert!(handle.insert_note(0));
        while poll(&mut port, &mut codec) != vec![0x80, 0] {}

        codec.process_command(&mut port, Command::Return, &[]).unwrap();
        assert_eq!(poll(&mut port, &mut codec), vec![0x18]);
        assert_eq!(poll(&mut port, &mut codec), vec![0x18]);
        assert_eq!(poll(&mut port, &mut codec), vec![0x82]);
        assert_eq!(poll(&mut port, &mut codec), vec![0x14]);
    }

    #[test]
    fn silent_polls_surface_as_no_answer() {
        let (mut port, handle, mut codec) = device();
        handle.silence_polls(2);
        for _ in 0..2 {
            assert!(matches!(
                codec.process_command(&mut port, Command::Poll, &[]),
                Err(Error::NoAnswer)
            ));
        }
        assert_eq!(poll(&mut port, &mut codec), vec![0x10]);
    }

    #[test]
    fn failure_overrides_the_state_answer() {
        let (mut port, handle, mut codec) = device();
        handle.set_failure(0x43);
        assert_eq!(poll(&mut port, &mut codec), vec![0x43]);
        handle.clear_failure();
        assert_eq!(poll(&mut port, &mut codec), vec![0x10]);
    }

    #[test]
    fn firmware_blocks_record_address_and_data() {
        let (mut port, handle, mut codec) = device();
        handle.set_update_busy_polls(0);
        codec
            .process_command(&mut port, Command::Download, &[DOWNLOAD_ENTER])
            .unwrap();
        let status = codec
            .process_command(&mut port, Command::UpdateStatus, &[])
            .unwrap();
        assert_eq!(status.as_ref(), &[0x01]);

        codec
            .process_command(
                &mut port,
                Command::Download,
                &[DOWNLOAD_WRITE, 0x01, 0xC0, 0x00, 0xAA, 0xBB],
            )
            .unwrap();
        codec
            .process_command(&mut port, Command::Download, &[DOWNLOAD_EXIT])
            .unwrap();

        assert_eq!(
            handle.written_blocks(),
            vec![(0x01C000, vec![0xAA, 0xBB])]
        );
    }

    #[test]
    fn silent_block_budget_swallows_then_accepts() {
        let (mut port, handle, mut codec) = device();
        handle.set_silent_block_answers(2);
        codec
            .process_command(&mut port, Command::Download, &[DOWNLOAD_ENTER])
            .unwrap();

        let block = [DOWNLOAD_WRITE, 0x00, 0x00, 0x00, 0x11];
        for _ in 0..2 {
            assert!(matches!(
                codec.process_command(&mut port, Command::Download, &block),
                Err(Error::NoAnswer)
            ));
        }
        assert!(codec.process_command(&mut port, Command::Download, &block).is_ok());
    }
}
