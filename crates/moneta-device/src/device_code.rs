//! Vendor answer decoding: raw device codes to normalized status codes.
//!
//! Two table shapes cover the device families in the field:
//!
//! - [`ByteCodeTable`]: the first answer byte selects an entry; entries
//!   flagged as prefixes consume a second byte from a nested table
//!   (e.g. "generic failure" + detail byte).
//! - [`BitmapCodeTable`]: each configured bit position contributes one
//!   status when set (or clear, for inverted bits).
//!
//! Decoding is pure: the same bytes always produce the same result. Each
//! produced specification is keyed by the hex of the consumed input so
//! poll diffing can compare raw observations across cycles.
//!
//! Truncated answers fail closed: a bitmap entry pointing past the end of
//! the buffer yields a single `Unknown` error specification and decoding
//! stops. Bitmap decoding is only trusted after a device-identity check;
//! an impostor device degenerates to `NotAvailable` there, not here.

use moneta_core::StatusCode;
use std::collections::{BTreeMap, BTreeSet};

/// One decoded observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCodeSpec {
    pub code: StatusCode,
    pub description: String,
}

impl DeviceCodeSpec {
    pub fn new(code: StatusCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    fn unknown(description: impl Into<String>) -> Self {
        Self::new(StatusCode::Unknown, description)
    }
}

fn hex_key(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02X}")).collect()
}

/// Byte-keyed decode table with an optional nested branch per prefix.
#[derive(Debug, Clone, Default)]
pub struct ByteCodeTable {
    entries: BTreeMap<u8, DeviceCodeSpec>,
    extra: BTreeMap<u8, BTreeMap<u8, DeviceCodeSpec>>,
}

impl ByteCodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, byte: u8, code: StatusCode, description: &str) -> Self {
        self.entries
            .insert(byte, DeviceCodeSpec::new(code, description));
        self
    }

    /// Register a nested code: when `prefix` arrives with a second byte,
    /// the pair decodes through this branch instead of the main table.
    pub fn add_extra(mut self, prefix: u8, byte: u8, code: StatusCode, description: &str) -> Self {
        self.extra
            .entry(prefix)
            .or_default()
            .insert(byte, DeviceCodeSpec::new(code, description));
        self
    }

    /// Decode one answer. Exactly one specification per call.
    pub fn decode(&self, raw: &[u8]) -> Vec<(String, DeviceCodeSpec)> {
        let Some(&first) = raw.first() else {
            return vec![(String::new(), DeviceCodeSpec::unknown("empty answer"))];
        };

        if raw.len() > 1
            && let Some(branch) = self.extra.get(&first)
        {
            let second = raw[1];
            let spec = branch.get(&second).cloned().unwrap_or_else(|| {
                DeviceCodeSpec::unknown(format!("unknown device code {first:02X} {second:02X}"))
            });
            return vec![(hex_key(&raw[..2]), spec)];
        }

        let spec = self
            .entries
            .get(&first)
            .cloned()
            .unwrap_or_else(|| DeviceCodeSpec::unknown(format!("unknown device code {first:02X}")));
        vec![(hex_key(&raw[..1]), spec)]
    }
}

/// Bit-position decode table with per-bit inversion.
#[derive(Debug, Clone, Default)]
pub struct BitmapCodeTable {
    entries: BTreeMap<usize, DeviceCodeSpec>,
    inverted: BTreeSet<usize>,
}

impl BitmapCodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a status at absolute bit position `shift`
    /// (byte = shift / 8, bit = shift % 8).
    pub fn add(mut self, shift: usize, code: StatusCode, description: &str) -> Self {
        self.entries
            .insert(shift, DeviceCodeSpec::new(code, description));
        self
    }

    /// An inverted bit reports its status while the bit is clear.
    pub fn add_inverted(mut self, shift: usize, code: StatusCode, description: &str) -> Self {
        self.inverted.insert(shift);
        self.add(shift, code, description)
    }

    /// Decode one answer; every matching bit contributes a specification.
    pub fn decode(&self, raw: &[u8]) -> Vec<(String, DeviceCodeSpec)> {
        let mut result = Vec::new();
        for (&shift, spec) in &self.entries {
            let byte = shift / 8;
            let bit = shift % 8;
            let Some(&value) = raw.get(byte) else {
                return vec![(
                    format!("bit{shift}"),
                    DeviceCodeSpec::unknown("answer size is too small"),
                )];
            };
            let set = (value >> bit) & 1 != 0;
            if set != self.inverted.contains(&shift) {
                result.push((format!("{value:02X}.{shift}"), spec.clone()));
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moneta_core::RejectReason;
    use rstest::rstest;

    fn byte_table() -> ByteCodeTable {
        ByteCodeTable::new()
            .add(0x14, StatusCode::Enabled, "idling")
            .add(0x19, StatusCode::Disabled, "unit disabled")
            .add(0x41, StatusCode::StackerFull, "drop cassette full")
            .add_extra(0x1C, 0x60, StatusCode::Rejected(RejectReason::Verification), "rejected: verification")
            .add_extra(0x1C, 0x6C, StatusCode::Rejected(RejectReason::Length), "rejected: length")
    }

    #[test]
    fn simple_byte_lookup() {
        let decoded = byte_table().decode(&[0x14]);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].0, "14");
        assert_eq!(decoded[0].1.code, StatusCode::Enabled);
    }

    #[test]
    fn prefix_byte_consumes_nested_code() {
        let decoded = byte_table().decode(&[0x1C, 0x6C]);
        assert_eq!(decoded[0].0, "1C6C");
        assert_eq!(decoded[0].1.code, StatusCode::Rejected(RejectReason::Length));
    }

    #[test]
    fn prefix_without_second_byte_uses_main_table() {
        let decoded = byte_table().decode(&[0x1C]);
        assert_eq!(decoded[0].1.code, StatusCode::Unknown);
    }

    #[test]
    fn decode_is_idempotent() {
        let table = byte_table();
        for answer in [&[0x14u8][..], &[0x1C, 0x60], &[0x99], &[]] {
            assert_eq!(table.decode(answer), table.decode(answer));
        }
    }

    fn bitmap_table() -> BitmapCodeTable {
        BitmapCodeTable::new()
            .add(0, StatusCode::StackerOpen, "cassette removed")
            .add(3, StatusCode::JammedInValidator, "jam in acceptor")
            .add(9, StatusCode::StackerFull, "cassette full")
            .add_inverted(12, StatusCode::PowerSupply, "power good bit clear")
    }

    #[test]
    fn set_bits_emit_their_statuses() {
        let decoded = bitmap_table().decode(&[0b0000_1001, 0b0001_0010]);
        let codes: Vec<StatusCode> = decoded.iter().map(|(_, spec)| spec.code).collect();
        assert_eq!(
            codes,
            vec![
                StatusCode::StackerOpen,
                StatusCode::JammedInValidator,
                StatusCode::StackerFull,
            ]
        );
    }

    #[test]
    fn inverted_bit_fires_when_clear() {
        let decoded = bitmap_table().decode(&[0x00, 0x00]);
        let codes: Vec<StatusCode> = decoded.iter().map(|(_, spec)| spec.code).collect();
        assert!(codes.contains(&StatusCode::PowerSupply));
    }

    #[rstest]
    #[case(0)]
    #[case(3)]
    #[case(9)]
    fn flipping_one_bit_changes_exactly_that_membership(#[case] shift: usize) {
        let table = bitmap_table();
        // Power-good bit kept set so the inverted entry stays quiet.
        let baseline = [0b0000_0000u8, 0b0001_0000];
        let mut flipped = baseline;
        flipped[shift / 8] ^= 1 << (shift % 8);

        let codes = |raw: &[u8]| -> BTreeSet<StatusCode> {
            table.decode(raw).into_iter().map(|(_, s)| s.code).collect()
        };
        let before = codes(&baseline);
        let after = codes(&flipped);
        let expected = table.entries[&shift].code;

        assert!(!before.contains(&expected));
        assert!(after.contains(&expected));
        assert_eq!(
            after.symmetric_difference(&before).collect::<Vec<_>>(),
            vec![&expected]
        );
    }

    #[test]
    fn truncated_answer_fails_closed() {
        let decoded = bitmap_table().decode(&[0b0000_0001]);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].1.code, StatusCode::Unknown);
        assert_eq!(decoded[0].1.description, "answer size is too small");
    }

    #[test]
    fn empty_byte_answer_is_unknown() {
        let decoded = byte_table().decode(&[]);
        assert_eq!(decoded[0].1.code, StatusCode::Unknown);
    }
}
