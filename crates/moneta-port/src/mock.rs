//! Scriptable in-memory port for driver tests.
//!
//! A [`MockPort`] answers each written request either from a scripted
//! answer queue or from a responder function installed through its
//! [`MockPortHandle`]. The handle side also records every request for
//! later inspection.

use crate::{DevicePort, PortParameters};
use moneta_core::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

#[derive(Default)]
struct Shared {
    open: bool,
    scripted: VecDeque<Vec<u8>>,
    pending: VecDeque<Vec<u8>>,
    requests: Vec<Vec<u8>>,
    responder: Option<Responder>,
    parameters: Option<PortParameters>,
    fail_writes: bool,
}

/// Test-side controller for a [`MockPort`].
#[derive(Clone)]
pub struct MockPortHandle {
    shared: Arc<Mutex<Shared>>,
}

impl MockPortHandle {
    /// Queue one canned answer; answers are consumed in FIFO order, one
    /// per written request, before the responder is consulted.
    pub fn push_answer(&self, answer: impl Into<Vec<u8>>) {
        self.lock().scripted.push_back(answer.into());
    }

    /// Install a responder called for requests with no scripted answer.
    /// Returning `None` leaves the device silent for that request.
    pub fn set_responder(&self, responder: impl FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static) {
        self.lock().responder = Some(Box::new(responder));
    }

    /// Every request written so far, oldest first.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Line parameters from the latest `set_parameters` call.
    pub fn parameters(&self) -> Option<PortParameters> {
        self.lock().parameters
    }

    /// Make subsequent writes fail, simulating a yanked cable.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct MockPort {
    shared: Arc<Mutex<Shared>>,
}

impl MockPort {
    pub fn new() -> (Self, MockPortHandle) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            Self {
                shared: shared.clone(),
            },
            MockPortHandle { shared },
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DevicePort for MockPort {
    fn open(&mut self) -> Result<()> {
        self.lock().open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.lock().open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut shared = self.lock();
        if !shared.open {
            return Err(Error::PortClosed);
        }
        if shared.fail_writes {
            return Err(Error::port("simulated write failure"));
        }
        shared.requests.push(data.to_vec());

        let answer = if let Some(scripted) = shared.scripted.pop_front() {
            Some(scripted)
        } else if let Some(responder) = shared.responder.as_mut() {
            responder(data)
        } else {
            None
        };
        if let Some(answer) = answer {
            shared.pending.push_back(answer);
        }
        Ok(())
    }

    fn read(&mut self, _timeout: Duration) -> Result<Vec<u8>> {
        let mut shared = self.lock();
        if !shared.open {
            return Err(Error::PortClosed);
        }
        Ok(shared.pending.pop_front().unwrap_or_default())
    }

    fn set_parameters(&mut self, parameters: &PortParameters) -> Result<()> {
        self.lock().parameters = Some(*parameters);
        Ok(())
    }

    fn parameters(&self) -> PortParameters {
        self.lock().parameters.unwrap_or_default()
    }
}
