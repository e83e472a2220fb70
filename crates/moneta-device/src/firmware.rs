//! Firmware image parsing and transfer bookkeeping.
//!
//! Images are text blobs of CRLF-, LF- or CR-delimited records. Two
//! record shapes are accepted:
//!
//! - plain addressed: six hex digits of address followed by hex data,
//!   `01C000<data...>`;
//! - Intel-HEX: `:LLAAAATT<data>CC` with extended-linear-address support.
//!
//! Records are cut into device sections and padded with `0xFF` (flash
//! erased state) so every block written to the device is exactly one
//! section long.

use moneta_core::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareBlock {
    pub address: u32,
    pub data: Vec<u8>,
}

fn decode_hex(text: &str) -> Result<Vec<u8>> {
    if text.len() % 2 != 0 {
        return Err(Error::firmware("odd hex digit count in record"));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&text[i..i + 2], 16)
                .map_err(|_| Error::firmware(format!("bad hex byte '{}'", &text[i..i + 2])))
        })
        .collect()
}

/// Split the image into records using whichever line separator it uses.
fn split_records(text: &str) -> Vec<&str> {
    let separator = if text.contains("\r\n") {
        "\r\n"
    } else if text.contains('\n') {
        "\n"
    } else {
        "\r"
    };
    text.split(separator)
        .map(str::trim)
        .filter(|record| !record.is_empty())
        .collect()
}

/// Parse one Intel-HEX record; returns the next extended base address and
/// optionally an emitted data chunk.
fn parse_hex_record(record: &str, base: u32) -> Result<(u32, Option<(u32, Vec<u8>)>)> {
    let bytes = decode_hex(&record[1..])?;
    if bytes.len() < 5 {
        return Err(Error::firmware("short hex record"));
    }
    let length = bytes[0] as usize;
    if bytes.len() != length + 5 {
        return Err(Error::firmware("hex record length mismatch"));
    }
    let checksum: u8 = bytes.iter().fold(0u8, |sum, &b| sum.wrapping_add(b));
    if checksum != 0 {
        return Err(Error::firmware("hex record checksum mismatch"));
    }

    let offset = u32::from(bytes[1]) << 8 | u32::from(bytes[2]);
    let record_type = bytes[3];
    let data = &bytes[4..4 + length];
    match record_type {
        0x00 => Ok((base, Some((base + offset, data.to_vec())))),
        0x01 => Ok((base, None)),
        0x04 => {
            if length != 2 {
                return Err(Error::firmware("bad extended address record"));
            }
            let upper = u32::from(data[0]) << 8 | u32::from(data[1]);
            Ok((upper << 16, None))
        }
        // Segment/start-address records carry nothing we transfer.
        _ => Ok((base, None)),
    }
}

/// Parse a firmware image into device-sized blocks.
pub fn parse_image(image: &[u8], section_size: usize) -> Result<Vec<FirmwareBlock>> {
    if section_size == 0 {
        return Err(Error::firmware("section size must be positive"));
    }
    let text = std::str::from_utf8(image)
        .map_err(|_| Error::firmware("firmware image is not a text blob"))?;

    let mut chunks: Vec<(u32, Vec<u8>)> = Vec::new();
    let mut base = 0u32;
    for record in split_records(text) {
        if record.starts_with(':') {
            let (next_base, chunk) = parse_hex_record(record, base)?;
            base = next_base;
            if let Some(chunk) = chunk {
                chunks.push(chunk);
            }
        } else {
            if record.len() < 6 {
                return Err(Error::firmware(format!("record too short: '{record}'")));
            }
            let address = u32::from_str_radix(&record[..6], 16)
                .map_err(|_| Error::firmware(format!("bad record address '{}'", &record[..6])))?;
            chunks.push((address, decode_hex(&record[6..])?));
        }
    }
    if chunks.is_empty() {
        return Err(Error::firmware("image contains no data records"));
    }

    let mut blocks = Vec::new();
    for (address, data) in chunks {
        for (index, section) in data.chunks(section_size).enumerate() {
            let mut padded = section.to_vec();
            padded.resize(section_size, 0xFF);
            blocks.push(FirmwareBlock {
                address: address + (index * section_size) as u32,
                data: padded,
            });
        }
    }
    Ok(blocks)
}

/// Transfer cursor: which block is next and how often the current one
/// was already rewritten after silent answers.
#[derive(Debug)]
pub struct UpdateSession {
    blocks: Vec<FirmwareBlock>,
    index: usize,
    repeats: u32,
    max_repeats: u32,
}

impl UpdateSession {
    pub fn new(blocks: Vec<FirmwareBlock>, max_repeats: u32) -> Self {
        Self {
            blocks,
            index: 0,
            repeats: 0,
            max_repeats,
        }
    }

    pub fn current(&self) -> Option<&FirmwareBlock> {
        self.blocks.get(self.index)
    }

    pub fn advance(&mut self) {
        self.index += 1;
        self.repeats = 0;
    }

    /// Account one silent answer. False once the retry budget for the
    /// current block is spent.
    pub fn retry(&mut self) -> bool {
        self.repeats += 1;
        self.repeats < self.max_repeats
    }

    pub fn total(&self) -> usize {
        self.blocks.len()
    }

    pub fn written(&self) -> usize {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("\n")]
    #[case("\r\n")]
    #[case("\r")]
    fn plain_records_with_any_separator(#[case] separator: &str) {
        let image = ["01C000AABBCC", "01C010DDEE"].join(separator);
        let blocks = parse_image(image.as_bytes(), 4).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].address, 0x01C000);
        assert_eq!(blocks[0].data, vec![0xAA, 0xBB, 0xCC, 0xFF]);
        assert_eq!(blocks[1].address, 0x01C010);
        assert_eq!(blocks[1].data, vec![0xDD, 0xEE, 0xFF, 0xFF]);
    }

    #[test]
    fn long_record_is_split_into_sections() {
        let image = b"000000AABBCCDDEEFF0011";
        let blocks = parse_image(image, 4).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].data, vec![0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(blocks[1].address, 4);
        assert_eq!(blocks[1].data, vec![0xEE, 0xFF, 0x00, 0x11]);
    }

    #[test]
    fn intel_hex_records_with_extended_address() {
        // :020000040001F9 sets base 0x10000, then 4 data bytes at 0x0100.
        let image = b":020000040001F9\n:04010000AABBCCDDED\n:00000001FF";
        let blocks = parse_image(image, 4).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].address, 0x10100);
        assert_eq!(blocks[0].data, vec![0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn corrupted_hex_checksum_is_rejected() {
        let image = b":04010000AABBCCDD00";
        assert!(parse_image(image, 4).is_err());
    }

    #[rstest]
    #[case(b"01C0".as_slice())]
    #[case(b"01C000AABBC".as_slice())]
    #[case(b"zzzzzzAABB".as_slice())]
    fn malformed_records_are_rejected(#[case] image: &[u8]) {
        assert!(parse_image(image, 4).is_err());
    }

    #[test]
    fn empty_image_is_rejected() {
        assert!(parse_image(b"\n\n", 4).is_err());
    }

    #[test]
    fn session_retry_budget() {
        let blocks = vec![FirmwareBlock {
            address: 0,
            data: vec![0x00],
        }];
        let mut session = UpdateSession::new(blocks, 3);
        assert!(session.retry());
        assert!(session.retry());
        assert!(!session.retry());
    }

    #[test]
    fn session_walks_blocks_in_order() {
        let blocks = parse_image(b"000000AABB\n000010CCDD", 2).unwrap();
        let mut session = UpdateSession::new(blocks, 3);
        assert_eq!(session.current().unwrap().address, 0);
        session.advance();
        assert_eq!(session.current().unwrap().address, 0x10);
        session.advance();
        assert!(session.current().is_none());
        assert_eq!(session.written(), session.total());
    }
}
