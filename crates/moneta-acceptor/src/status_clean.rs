//! Acceptor-specific status cleaning.
//!
//! Validator poll answers routinely carry contradictory or redundant
//! codes. One cleaning pass per cycle keeps the picture coherent before
//! it reaches the history and the application.

use moneta_core::{CurrencyError, StatusCode, StatusCodeSet};

/// Clean one fresh code set.
///
/// Rules, in order:
/// - a pending currency fault is injected so it stays visible every cycle;
/// - the ordinary set {Enabled, Disabled, Inhibit} collapses to the one
///   matching the last commanded intent when several are present, and any
///   non-ordinary operation code beats all of them;
/// - `StackerFull` supersedes `StackerNearFull`;
/// - a failed operation supersedes its own in-progress code;
/// - a note on its way back supersedes reject codes;
/// - `Ok` disappears as soon as anything else is reported.
pub fn clean_status_codes(
    codes: &mut StatusCodeSet,
    intent_enabled: bool,
    currency_fault: Option<CurrencyError>,
) {
    if let Some(fault) = currency_fault {
        codes.insert(StatusCode::Currency(fault));
    }

    let ordinary: Vec<StatusCode> = codes.iter().copied().filter(|c| c.is_ordinary()).collect();
    if ordinary.len() > 1 {
        let preferred = if intent_enabled {
            StatusCode::Enabled
        } else {
            StatusCode::Disabled
        };
        if ordinary.contains(&preferred) {
            codes.retain(|c| !c.is_ordinary() || *c == preferred);
        } else {
            // Intent not among the candidates; keep the most restrictive.
            let keep = if ordinary.contains(&StatusCode::Inhibit) {
                StatusCode::Inhibit
            } else {
                StatusCode::Disabled
            };
            codes.retain(|c| !c.is_ordinary() || *c == keep);
        }
    }

    if codes.contains(&StatusCode::StackerFull) {
        codes.remove(&StatusCode::StackerNearFull);
    }

    let failed_kinds: Vec<_> = codes
        .iter()
        .filter_map(|code| match code {
            StatusCode::OperationError(kind) => Some(*kind),
            _ => None,
        })
        .collect();
    for kind in failed_kinds {
        if let Some(progress) = kind.progress_code() {
            codes.remove(&progress);
        }
    }

    if codes.contains(&StatusCode::Returning) || codes.contains(&StatusCode::Returned) {
        codes.retain(|code| !matches!(code, StatusCode::Rejected(_)));
    }

    if codes.len() > 1 {
        codes.remove(&StatusCode::Ok);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moneta_core::{OperationKind, RejectReason};

    fn set(codes: &[StatusCode]) -> StatusCodeSet {
        codes.iter().copied().collect()
    }

    #[test]
    fn ordinary_collapse_follows_enabled_intent() {
        let mut codes = set(&[StatusCode::Enabled, StatusCode::Disabled]);
        clean_status_codes(&mut codes, true, None);
        assert_eq!(codes, set(&[StatusCode::Enabled]));
    }

    #[test]
    fn ordinary_collapse_follows_disabled_intent() {
        let mut codes = set(&[StatusCode::Enabled, StatusCode::Disabled, StatusCode::Inhibit]);
        clean_status_codes(&mut codes, false, None);
        assert_eq!(codes, set(&[StatusCode::Disabled]));
    }

    #[test]
    fn missing_intent_keeps_the_restrictive_code() {
        let mut codes = set(&[StatusCode::Disabled, StatusCode::Inhibit]);
        clean_status_codes(&mut codes, true, None);
        assert_eq!(codes, set(&[StatusCode::Inhibit]));
    }

    #[test]
    fn single_ordinary_code_is_untouched() {
        let mut codes = set(&[StatusCode::Disabled]);
        clean_status_codes(&mut codes, true, None);
        assert_eq!(codes, set(&[StatusCode::Disabled]));
    }

    #[test]
    fn stacker_full_beats_near_full() {
        let mut codes = set(&[StatusCode::StackerNearFull, StatusCode::StackerFull]);
        clean_status_codes(&mut codes, false, None);
        assert_eq!(codes, set(&[StatusCode::StackerFull]));
    }

    #[test]
    fn failed_operation_replaces_its_progress_code() {
        let mut codes = set(&[
            StatusCode::Stacked,
            StatusCode::OperationError(OperationKind::Stack),
        ]);
        clean_status_codes(&mut codes, true, None);
        assert_eq!(codes, set(&[StatusCode::OperationError(OperationKind::Stack)]));
    }

    #[test]
    fn returning_clears_reject_codes() {
        let mut codes = set(&[
            StatusCode::Returning,
            StatusCode::Rejected(RejectReason::Verification),
        ]);
        clean_status_codes(&mut codes, true, None);
        assert_eq!(codes, set(&[StatusCode::Returning]));
    }

    #[test]
    fn ok_yields_to_anything_else() {
        let mut codes = set(&[StatusCode::Ok, StatusCode::Cheated]);
        clean_status_codes(&mut codes, true, None);
        assert_eq!(codes, set(&[StatusCode::Cheated]));
    }

    #[test]
    fn currency_fault_is_injected() {
        let mut codes = set(&[StatusCode::Disabled]);
        clean_status_codes(&mut codes, false, Some(CurrencyError::Config));
        assert!(codes.contains(&StatusCode::Currency(CurrencyError::Config)));
    }
}
