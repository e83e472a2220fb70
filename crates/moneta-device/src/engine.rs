//! The polling / status-history engine.
//!
//! One [`StatusEngine`] lives inside each driver and turns raw status
//! observations into application-level status-change events:
//!
//! 1. request status through the driver's [`EngineHooks`];
//! 2. clean the code set through the driver's device-class rules;
//! 3. tolerate communication drops via the bad-answer counter and the
//!    status buffer (the previous good collection stands in while the
//!    counter is within bounds);
//! 4. push the collection into the bounded history;
//! 5. hold back codes that still need consecutive confirmations;
//! 6. emit `StatusChanged` when the visible picture materially differs
//!    from the last emitted one.
//!
//! Leaving an `Error` level while the device reports itself mid-operation
//! (busy, returning a note, rejecting) suppresses emission and holds the
//! reported level at `Error` until the operation clears, which keeps the
//! application from flapping during resets and bill returns.
//!
//! Suppressed or superseded snapshots stay in the history as an
//! unprocessed tail; [`StatusEngine::restore_statuses`] replays that tail
//! after an enable/disable transition so the application never sees a
//! stale picture.

use crate::event::{DeviceEvent, EventSender};
use moneta_core::constants::{MAX_BAD_ANSWERS, STATUS_HISTORY_DEPTH};
use moneta_core::{
    HistoryList, Result, SemanticStatus, StatusCode, StatusCodeSet, StatusCollection, StatusSpec,
    WarningLevel,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Driver-side hooks the engine calls during a poll cycle.
pub trait EngineHooks {
    /// Request and decode the device status. Errors count as bad answers.
    fn request_status(&mut self) -> Result<StatusCodeSet>;

    /// Device-class specific filtering of the fresh code set.
    fn clean_status_codes(&mut self, codes: &mut StatusCodeSet) {
        let _ = codes;
    }

    /// Whether the previous good collection may stand in for a bad
    /// answer right now. Transitions veto this to see the real picture.
    fn can_apply_status_buffer(&self) -> bool {
        true
    }
}

/// What one poll cycle produced; drivers run their post-polling logic
/// off this.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub collection: StatusCollection,
    /// A status-change event was emitted this cycle.
    pub emitted: bool,
    /// Emission was withheld by busy-suppression.
    pub suppressed: bool,
    /// This cycle left the `Error` level behind.
    pub recovered_from_error: bool,
}

pub struct StatusEngine {
    spec: StatusSpec,
    events: EventSender,
    history: HistoryList<StatusCollection>,
    confirmations: BTreeMap<StatusCode, usize>,
    streaks: BTreeMap<StatusCode, usize>,
    bad_answers: u32,
    max_bad_answers: u32,
    last_good: Option<StatusCollection>,
    emitted: Option<StatusCollection>,
    reported_level: WarningLevel,
    environment_changed: bool,
}

impl StatusEngine {
    pub fn new(spec: StatusSpec, events: EventSender) -> Self {
        Self {
            spec,
            events,
            history: HistoryList::new(STATUS_HISTORY_DEPTH),
            confirmations: BTreeMap::new(),
            streaks: BTreeMap::new(),
            bad_answers: 0,
            max_bad_answers: MAX_BAD_ANSWERS,
            last_good: None,
            emitted: None,
            reported_level: WarningLevel::Ok,
            environment_changed: false,
        }
    }

    pub fn with_max_bad_answers(mut self, max_bad_answers: u32) -> Self {
        self.max_bad_answers = max_bad_answers;
        self
    }

    /// Require `count` consecutive observations of `code` before it
    /// becomes visible to the application.
    pub fn require_confirmations(&mut self, code: StatusCode, count: usize) {
        self.confirmations.insert(code, count.max(1));
    }

    pub fn spec(&self) -> &StatusSpec {
        &self.spec
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    /// Warning level as the application currently sees it.
    pub fn level(&self) -> WarningLevel {
        self.reported_level
    }

    /// Latest accepted collection.
    pub fn last(&self) -> Option<&StatusCollection> {
        self.history.last()
    }

    pub fn contains(&self, code: StatusCode) -> bool {
        self.history.last().is_some_and(|c| c.contains(code))
    }

    /// True when any current code carries the given semantic status.
    pub fn semantic_present(&self, semantic: SemanticStatus) -> bool {
        self.history.last().is_some_and(|collection| {
            collection
                .codes()
                .iter()
                .any(|&code| self.spec.semantic_of(code) == semantic)
        })
    }

    /// Force emission on the next cycle even without a material diff.
    pub fn set_environment_changed(&mut self) {
        self.environment_changed = true;
    }

    pub fn bad_answers(&self) -> u32 {
        self.bad_answers
    }

    /// Communication is still within the bad-answer tolerance window.
    pub fn is_available(&self) -> bool {
        self.bad_answers <= self.max_bad_answers
    }

    /// Run one poll cycle.
    pub fn poll(&mut self, hooks: &mut dyn EngineHooks) -> PollOutcome {
        let mut codes = match hooks.request_status() {
            Ok(codes) => codes,
            Err(e) => {
                warn!(error = %e, "status request failed");
                StatusCodeSet::from([StatusCode::NotAvailable])
            }
        };
        hooks.clean_status_codes(&mut codes);
        if codes.is_empty() {
            codes.insert(StatusCode::Ok);
        }

        let fresh = StatusCollection::classify(codes, |code| self.spec.level_of(code));
        let collection = self.apply_status_buffer(fresh, hooks.can_apply_status_buffer());

        if self.history.last() != Some(&collection) {
            self.history.push(collection.clone());
        }

        self.process_statuses(collection)
    }

    /// Substitute the previous good collection while the bad-answer
    /// counter is within bounds.
    fn apply_status_buffer(
        &mut self,
        fresh: StatusCollection,
        can_apply: bool,
    ) -> StatusCollection {
        let replaceable = fresh
            .codes()
            .iter()
            .any(|code| code.is_replaceable());
        if !replaceable {
            self.bad_answers = 0;
            self.last_good = Some(fresh.clone());
            return fresh;
        }

        self.bad_answers = self.bad_answers.saturating_add(1);
        if can_apply
            && self.bad_answers <= self.max_bad_answers
            && let Some(previous) = self.last_good.clone()
        {
            debug!(
                bad_answers = self.bad_answers,
                "bad answer, keeping previous statuses"
            );
            return previous;
        }
        fresh
    }

    fn process_statuses(&mut self, collection: StatusCollection) -> PollOutcome {
        // Consecutive-observation streaks are tracked per code; the
        // history cannot serve here since identical snapshots dedup.
        for &code in self.confirmations.keys() {
            let streak = self.streaks.entry(code).or_insert(0);
            if collection.contains(code) {
                *streak += 1;
            } else {
                *streak = 0;
            }
        }

        // Codes still waiting for consecutive confirmations stay hidden.
        let mut visible = collection.clone();
        visible.retain(|code| match self.confirmations.get(&code) {
            Some(&count) => self.streaks.get(&code).copied().unwrap_or(0) >= count,
            None => true,
        });
        if visible.is_empty() {
            visible.insert(WarningLevel::Ok, StatusCode::Ok);
        }

        let level = visible.level();
        let mid_operation = visible.codes().iter().any(|&code| {
            matches!(
                self.spec.semantic_of(code),
                SemanticStatus::Busy | SemanticStatus::BillOperation | SemanticStatus::Rejected
            )
        });

        // Busy-suppression: an error must not clear while the device is
        // still working a note or a reset through.
        if self.reported_level == WarningLevel::Error && level < WarningLevel::Error && mid_operation
        {
            debug!("holding error level while device is mid-operation");
            return PollOutcome {
                collection,
                emitted: false,
                suppressed: true,
                recovered_from_error: false,
            };
        }

        let changed = match &self.emitted {
            None => true,
            Some(previous) => previous.codes() != visible.codes() || previous.level() != level,
        };
        if !(changed || self.environment_changed) {
            return PollOutcome {
                collection,
                emitted: false,
                suppressed: false,
                recovered_from_error: false,
            };
        }

        let recovered = self.reported_level == WarningLevel::Error && level < WarningLevel::Error;
        self.environment_changed = false;
        self.reported_level = level;
        self.emitted = Some(visible.clone());
        self.history.mark_all_processed();
        self.events.emit(DeviceEvent::StatusChanged {
            level,
            codes: visible.codes(),
        });

        PollOutcome {
            collection,
            emitted: true,
            suppressed: false,
            recovered_from_error: recovered,
        }
    }

    /// Replay the unprocessed history tail after a transition so
    /// suppressed-but-still-relevant statuses reach the application.
    /// Transient per-note codes are not replayed.
    pub fn restore_statuses(&mut self, hooks: &mut dyn EngineHooks) {
        let pending: Vec<StatusCollection> = self.history.unprocessed().cloned().collect();
        let mut seen: Vec<StatusCodeSet> = Vec::new();

        for snapshot in pending {
            let mut codes = snapshot.codes();
            hooks.clean_status_codes(&mut codes);
            codes.retain(|code| {
                !matches!(
                    code,
                    StatusCode::Escrow | StatusCode::Stacked | StatusCode::Returned
                )
            });
            if codes.is_empty() || seen.contains(&codes) {
                continue;
            }
            seen.push(codes.clone());

            let collection =
                StatusCollection::classify(codes, |code| self.spec.level_of(code));
            let level = collection.level();
            self.reported_level = level;
            self.emitted = Some(collection.clone());
            self.events.emit(DeviceEvent::StatusChanged {
                level,
                codes: collection.codes(),
            });
        }
        self.history.mark_all_processed();
    }
}
