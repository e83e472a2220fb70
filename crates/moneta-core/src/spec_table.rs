//! Status-code specification: the single source of truth mapping every
//! [`StatusCode`] to its warning level, semantic status and description.
//!
//! Tables are plain immutable values handed to the components that need
//! them at construction time. Lookups never fail; unknown codes fall back
//! to the table's default entry (`Error` / `Unknown`).

use crate::status::{
    CurrencyError, OperationKind, RejectReason, SemanticStatus, StatusCode, WarningLevel,
};
use std::collections::BTreeMap;

/// Classification of one status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCodeInfo {
    pub level: WarningLevel,
    pub semantic: SemanticStatus,
    pub description: &'static str,
}

impl StatusCodeInfo {
    const fn new(level: WarningLevel, semantic: SemanticStatus, description: &'static str) -> Self {
        Self {
            level,
            semantic,
            description,
        }
    }
}

/// Immutable code → classification table with a default fallback.
#[derive(Debug, Clone)]
pub struct StatusSpec {
    entries: BTreeMap<StatusCode, StatusCodeInfo>,
    default: StatusCodeInfo,
}

impl StatusSpec {
    /// The platform-wide standard table covering the whole code space.
    pub fn standard() -> Self {
        use SemanticStatus as S;
        use StatusCode as C;
        use WarningLevel as W;

        let mut entries = BTreeMap::new();
        let mut add = |code: C, level: W, semantic: S, description: &'static str| {
            entries.insert(code, StatusCodeInfo::new(level, semantic, description));
        };

        add(C::Ok, W::Ok, S::Ok, "OK");
        add(C::Busy, W::Ok, S::Busy, "device is busy");
        add(C::Initializing, W::Ok, S::Busy, "initializing");
        add(C::PowerUp, W::Ok, S::Busy, "power up");
        add(C::NotAvailable, W::Error, S::Error, "device is not available");
        add(C::Unknown, W::Error, S::Unknown, "unknown device state");

        add(C::Enabled, W::Ok, S::Enabled, "accepting enabled");
        add(C::Disabled, W::Ok, S::Disabled, "accepting disabled");
        add(C::Inhibit, W::Ok, S::Inhibit, "all denominations inhibited");

        add(C::Accepting, W::Ok, S::BillOperation, "accepting a note");
        add(C::Escrow, W::Ok, S::Escrow, "note in escrow");
        add(C::Stacked, W::Ok, S::Stacked, "note stacked");
        add(C::Returning, W::Ok, S::BillOperation, "returning a note");
        add(C::Returned, W::Ok, S::BillOperation, "note returned");

        for (reason, description) in [
            (RejectReason::Unknown, "note rejected"),
            (RejectReason::Identification, "rejected: identification failed"),
            (RejectReason::Verification, "rejected: verification failed"),
            (RejectReason::Transport, "rejected: transport problem"),
            (RejectReason::Inhibit, "rejected: denomination inhibited"),
            (RejectReason::Cheated, "rejected: cheat suspected"),
            (RejectReason::Length, "rejected: wrong note length"),
            (RejectReason::DoubleNote, "rejected: two notes together"),
        ] {
            add(C::Rejected(reason), W::Ok, S::Rejected, description);
        }

        add(C::StackerNearFull, W::Warning, S::Warning, "stacker is almost full");
        add(C::Cheated, W::Warning, S::Cheated, "cheat attempt detected");
        add(C::FirmwareMismatch, W::Warning, S::Warning, "firmware version mismatch");
        add(C::NeedReboot, W::Warning, S::Warning, "device requires a reboot");
        add(C::ModelNotVerified, W::Warning, S::Warning, "model is not verified");

        add(C::InitializationError, W::Error, S::Error, "initialization failed");
        add(C::MemoryStorage, W::Error, S::Error, "memory storage failure");
        add(C::JammedInValidator, W::Error, S::MechanicFailure, "note jammed in validator");
        add(C::JammedInStacker, W::Error, S::MechanicFailure, "note jammed in stacker");
        add(C::StickInExitChannel, W::Error, S::MechanicFailure, "note stuck in exit channel");
        add(C::StackerFull, W::Error, S::Error, "stacker is full");
        add(C::StackerOpen, W::Error, S::Error, "stacker is open or removed");
        add(C::MechanicFailure, W::Error, S::MechanicFailure, "mechanic failure");
        add(C::PowerSupply, W::Error, S::Error, "power supply out of range");

        for (kind, description) in [
            (OperationKind::Accept, "accept operation failed"),
            (OperationKind::Stack, "stack operation failed"),
            (OperationKind::Return, "return operation failed"),
            (OperationKind::Dispense, "dispense operation failed"),
        ] {
            add(C::OperationError(kind), W::Error, S::OperationError, description);
        }

        for (fault, description) in [
            (CurrencyError::Config, "currency configuration error"),
            (CurrencyError::Loading, "par table loading error"),
            (CurrencyError::Billset, "incompatible billset"),
            (CurrencyError::NoAvailable, "no available denominations"),
        ] {
            add(C::Currency(fault), W::Error, S::Error, description);
        }

        add(C::UnitEmpty, W::Warning, S::Warning, "dispenser unit is empty");
        add(C::UnitNearEmpty, W::Warning, S::Warning, "dispenser unit is almost empty");
        add(C::DispenseJam, W::Error, S::MechanicFailure, "item jammed while dispensing");

        Self {
            entries,
            default: StatusCodeInfo::new(W::Error, S::Unknown, "unknown status code"),
        }
    }

    pub fn get(&self, code: StatusCode) -> &StatusCodeInfo {
        self.entries.get(&code).unwrap_or(&self.default)
    }

    pub fn level_of(&self, code: StatusCode) -> WarningLevel {
        self.get(code).level
    }

    pub fn semantic_of(&self, code: StatusCode) -> SemanticStatus {
        self.get(code).semantic
    }

    pub fn describe(&self, code: StatusCode) -> &'static str {
        self.get(code).description
    }
}

impl Default for StatusSpec {
    fn default() -> Self {
        Self::standard()
    }
}
