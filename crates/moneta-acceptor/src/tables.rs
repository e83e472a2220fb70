//! Decode tables for the reference validator protocol.

use moneta_core::{OperationKind, RejectReason, StatusCode};
use moneta_device::ByteCodeTable;

/// Poll answer byte announcing a note in escrow; the bill type index
/// follows at [`ESCROW_PAR_POSITION`].
pub const ESCROW_CODE: u8 = 0x80;
pub const STACKED_CODE: u8 = 0x81;
pub const ESCROW_PAR_POSITION: usize = 1;

/// Update-status register values.
pub const UPDATE_BUSY: u8 = 0x00;
pub const UPDATE_READY: u8 = 0x01;

/// Status decoding for poll answers.
pub fn poll_code_table() -> ByteCodeTable {
    ByteCodeTable::new()
        .add(0x10, StatusCode::PowerUp, "power up")
        .add(0x11, StatusCode::PowerUp, "power up with note in validator")
        .add(0x13, StatusCode::Initializing, "initialize")
        .add(0x14, StatusCode::Enabled, "idling")
        .add(0x15, StatusCode::Accepting, "accepting")
        .add(0x17, StatusCode::Busy, "stacking")
        .add(0x18, StatusCode::Returning, "returning")
        .add(0x19, StatusCode::Disabled, "unit disabled")
        .add(0x1A, StatusCode::Inhibit, "holding")
        .add(0x1B, StatusCode::Busy, "device busy")
        .add(0x1C, StatusCode::Rejected(RejectReason::Unknown), "rejecting")
        .add_extra(0x1C, 0x60, StatusCode::Rejected(RejectReason::Identification), "rejecting: insertion error")
        .add_extra(0x1C, 0x61, StatusCode::Rejected(RejectReason::Cheated), "rejecting: magnetic pattern")
        .add_extra(0x1C, 0x62, StatusCode::Rejected(RejectReason::Identification), "rejecting: head pattern")
        .add_extra(0x1C, 0x63, StatusCode::Rejected(RejectReason::Transport), "rejecting: multiplying factor")
        .add_extra(0x1C, 0x64, StatusCode::Rejected(RejectReason::Transport), "rejecting: transport problem")
        .add_extra(0x1C, 0x65, StatusCode::Rejected(RejectReason::Identification), "rejecting: identification failed")
        .add_extra(0x1C, 0x66, StatusCode::Rejected(RejectReason::Verification), "rejecting: verification failed")
        .add_extra(0x1C, 0x67, StatusCode::Rejected(RejectReason::Inhibit), "rejecting: denomination inhibited")
        .add_extra(0x1C, 0x68, StatusCode::Rejected(RejectReason::DoubleNote), "rejecting: two notes together")
        .add_extra(0x1C, 0x6C, StatusCode::Rejected(RejectReason::Length), "rejecting: wrong length")
        .add(0x25, StatusCode::Cheated, "cheat attempt")
        .add(0x29, StatusCode::StackerNearFull, "drop cassette almost full")
        .add(0x41, StatusCode::StackerFull, "drop cassette full")
        .add(0x42, StatusCode::StackerOpen, "drop cassette out of position")
        .add(0x43, StatusCode::JammedInValidator, "note jammed in validator")
        .add(0x44, StatusCode::JammedInStacker, "note jammed in drop cassette")
        .add(0x45, StatusCode::Cheated, "cheated")
        .add(0x46, StatusCode::PowerSupply, "supply voltage out of range")
        .add(0x47, StatusCode::MechanicFailure, "generic failure")
        .add_extra(0x47, 0x50, StatusCode::OperationError(OperationKind::Stack), "stack motor failure")
        .add_extra(0x47, 0x51, StatusCode::OperationError(OperationKind::Accept), "transport motor speed failure")
        .add_extra(0x47, 0x52, StatusCode::OperationError(OperationKind::Return), "transport motor failure")
        .add_extra(0x47, 0x54, StatusCode::MemoryStorage, "EEPROM failure")
        .add_extra(0x47, 0x5F, StatusCode::MechanicFailure, "optical path blocked")
        .add(ESCROW_CODE, StatusCode::Escrow, "note in escrow")
        .add(STACKED_CODE, StatusCode::Stacked, "note stacked")
        .add(0x82, StatusCode::Returned, "note returned")
}

/// Final status byte of a firmware update.
pub fn update_answer_table() -> ByteCodeTable {
    ByteCodeTable::new()
        .add(0x00, StatusCode::Ok, "firmware accepted")
        .add(0x10, StatusCode::FirmwareMismatch, "firmware already installed")
        .add(0x11, StatusCode::FirmwareMismatch, "firmware for a different model")
        .add(0x20, StatusCode::MemoryStorage, "flash write failed")
        .add(0x21, StatusCode::Unknown, "firmware checksum rejected")
}

/// Identification answers carry an ASCII part number padded with spaces.
pub fn parse_identification(answer: &[u8]) -> String {
    answer
        .iter()
        .copied()
        .take_while(|&b| b != 0)
        .map(char::from)
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_reason_decodes_through_the_nested_branch() {
        let decoded = poll_code_table().decode(&[0x1C, 0x68]);
        assert_eq!(
            decoded[0].1.code,
            StatusCode::Rejected(RejectReason::DoubleNote)
        );
    }

    #[test]
    fn escrow_code_keeps_the_par_byte_out_of_decoding() {
        // 0x80 has no nested branch: the second byte is the bill type.
        let decoded = poll_code_table().decode(&[ESCROW_CODE, 0x05]);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].1.code, StatusCode::Escrow);
    }

    #[test]
    fn identification_is_trimmed_ascii() {
        assert_eq!(parse_identification(b"SM-2072  \0\0"), "SM-2072");
    }
}
