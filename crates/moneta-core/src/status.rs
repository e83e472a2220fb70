//! Normalized status-code model shared by every device driver.
//!
//! Vendor answers are decoded into [`StatusCode`] values, each of which maps
//! to exactly one ([`WarningLevel`], [`SemanticStatus`], description) triple
//! through the [`crate::spec_table::StatusSpec`] table. Poll cycles collect
//! codes into a [`StatusCollection`], classified per warning level.
//!
//! ```text
//! raw answer bytes ──decode──▶ StatusCodeSet ──classify──▶ StatusCollection
//!                                                              │
//!                                              max level ◀─────┘
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Severity ordering used for aggregation and emission decisions.
///
/// `Ok < Warning < Error`; a collection reports the maximum level across
/// its contained codes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum WarningLevel {
    #[default]
    Ok,
    Warning,
    Error,
}

impl fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WarningLevel::Ok => write!(f, "OK"),
            WarningLevel::Warning => write!(f, "warning"),
            WarningLevel::Error => write!(f, "error"),
        }
    }
}

/// Coarse device condition used by driver predicates and debounce history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SemanticStatus {
    Ok,
    Enabled,
    Disabled,
    Inhibit,
    Busy,
    BillOperation,
    Escrow,
    Stacked,
    Rejected,
    Cheated,
    Warning,
    OperationError,
    Error,
    MechanicFailure,
    Unknown,
}

/// Why a note was rejected, as reported by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    Unknown,
    Identification,
    Verification,
    Transport,
    Inhibit,
    Cheated,
    Length,
    DoubleNote,
}

/// Device operation a failure code can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Accept,
    Stack,
    Return,
    Dispense,
}

impl OperationKind {
    /// The in-progress status code this operation failure supersedes.
    pub fn progress_code(self) -> Option<StatusCode> {
        match self {
            OperationKind::Accept => Some(StatusCode::Accepting),
            OperationKind::Stack => Some(StatusCode::Stacked),
            OperationKind::Return => Some(StatusCode::Returning),
            OperationKind::Dispense => None,
        }
    }
}

/// Currency/par-table configuration failures. These block enabling until
/// the configuration is corrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CurrencyError {
    /// System currency id missing or mismatched with the loaded billset.
    Config,
    /// Par table could not be loaded or came back empty.
    Loading,
    /// The billset contains a currency the platform does not know.
    Billset,
    /// The table loaded, but no denomination is available for acceptance.
    NoAvailable,
}

/// A normalized status tag.
///
/// The enumerated space covers general device codes plus the cash-receiver
/// extensions. Every variant has a classification in
/// [`StatusSpec::standard`](crate::spec_table::StatusSpec::standard).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    // General
    Ok,
    Busy,
    Initializing,
    PowerUp,
    NotAvailable,
    Unknown,

    // Acceptance state
    Enabled,
    Disabled,
    Inhibit,

    // Bill operations
    Accepting,
    Escrow,
    Stacked,
    Returning,
    Returned,
    Rejected(RejectReason),

    // Warnings
    StackerNearFull,
    Cheated,
    FirmwareMismatch,
    NeedReboot,
    ModelNotVerified,

    // Errors
    InitializationError,
    MemoryStorage,
    JammedInValidator,
    JammedInStacker,
    StickInExitChannel,
    StackerFull,
    StackerOpen,
    MechanicFailure,
    PowerSupply,
    OperationError(OperationKind),
    Currency(CurrencyError),

    // Dispenser
    UnitEmpty,
    UnitNearEmpty,
    DispenseJam,
}

impl StatusCode {
    /// Codes describing the plain enabled/disabled/inhibited acceptance
    /// state. At most one of them is meaningful at a time.
    pub fn is_ordinary(self) -> bool {
        matches!(
            self,
            StatusCode::Enabled | StatusCode::Disabled | StatusCode::Inhibit
        )
    }

    /// Placeholder codes a previous good status may substitute while the
    /// bad-answer counter has not yet run out.
    pub fn is_replaceable(self) -> bool {
        matches!(self, StatusCode::NotAvailable | StatusCode::Unknown)
    }

    /// Codes that clear on their own once communication recovers.
    pub fn is_recoverable(self) -> bool {
        matches!(self, StatusCode::NotAvailable | StatusCode::Unknown)
    }

    /// Codes under which dropping a recoverable error would be unsafe.
    pub fn is_unsafe(self) -> bool {
        matches!(
            self,
            StatusCode::Initializing | StatusCode::PowerUp | StatusCode::Busy
        )
    }
}

/// Unique set of codes observed in one poll cycle.
pub type StatusCodeSet = BTreeSet<StatusCode>;

/// Per-cycle classification result: codes grouped by warning level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCollection {
    levels: BTreeMap<WarningLevel, StatusCodeSet>,
}

impl StatusCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collection by classifying `codes` through the given lookup.
    pub fn classify<I>(codes: I, level_of: impl Fn(StatusCode) -> WarningLevel) -> Self
    where
        I: IntoIterator<Item = StatusCode>,
    {
        let mut collection = Self::new();
        for code in codes {
            collection.insert(level_of(code), code);
        }
        collection
    }

    pub fn insert(&mut self, level: WarningLevel, code: StatusCode) {
        self.levels.entry(level).or_default().insert(code);
    }

    pub fn remove(&mut self, code: StatusCode) {
        for set in self.levels.values_mut() {
            set.remove(&code);
        }
        self.levels.retain(|_, set| !set.is_empty());
    }

    pub fn contains(&self, code: StatusCode) -> bool {
        self.levels.values().any(|set| set.contains(&code))
    }

    pub fn is_empty(&self) -> bool {
        self.levels.values().all(BTreeSet::is_empty)
    }

    /// Maximum warning level across all contained codes.
    pub fn level(&self) -> WarningLevel {
        self.levels
            .keys()
            .next_back()
            .copied()
            .unwrap_or(WarningLevel::Ok)
    }

    /// Codes registered at exactly `level`.
    pub fn at(&self, level: WarningLevel) -> StatusCodeSet {
        self.levels.get(&level).cloned().unwrap_or_default()
    }

    /// Union of all codes regardless of level.
    pub fn codes(&self) -> StatusCodeSet {
        self.levels.values().flatten().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (WarningLevel, StatusCode)> + '_ {
        self.levels
            .iter()
            .flat_map(|(level, set)| set.iter().map(move |code| (*level, *code)))
    }

    /// Drop every code failing the predicate, pruning emptied levels.
    pub fn retain(&mut self, mut keep: impl FnMut(StatusCode) -> bool) {
        for set in self.levels.values_mut() {
            set.retain(|code| keep(*code));
        }
        self.levels.retain(|_, set| !set.is_empty());
    }
}

impl FromIterator<(WarningLevel, StatusCode)> for StatusCollection {
    fn from_iter<I: IntoIterator<Item = (WarningLevel, StatusCode)>>(iter: I) -> Self {
        let mut collection = Self::new();
        for (level, code) in iter {
            collection.insert(level, code);
        }
        collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_levels_are_ordered() {
        assert!(WarningLevel::Ok < WarningLevel::Warning);
        assert!(WarningLevel::Warning < WarningLevel::Error);
    }

    #[test]
    fn collection_reports_max_level() {
        let mut collection = StatusCollection::new();
        collection.insert(WarningLevel::Ok, StatusCode::Enabled);
        assert_eq!(collection.level(), WarningLevel::Ok);

        collection.insert(WarningLevel::Warning, StatusCode::StackerNearFull);
        assert_eq!(collection.level(), WarningLevel::Warning);

        collection.insert(WarningLevel::Error, StatusCode::StackerFull);
        assert_eq!(collection.level(), WarningLevel::Error);
    }

    #[test]
    fn remove_prunes_emptied_levels() {
        let mut collection = StatusCollection::new();
        collection.insert(WarningLevel::Error, StatusCode::StackerFull);
        collection.remove(StatusCode::StackerFull);
        assert!(collection.is_empty());
        assert_eq!(collection.level(), WarningLevel::Ok);
    }

    #[test]
    fn codes_union_is_deduplicated() {
        let mut collection = StatusCollection::new();
        collection.insert(WarningLevel::Ok, StatusCode::Enabled);
        collection.insert(WarningLevel::Ok, StatusCode::Enabled);
        collection.insert(WarningLevel::Warning, StatusCode::Cheated);
        assert_eq!(collection.codes().len(), 2);
    }
}
