//! Frame packing and unpacking.

use crate::crc::crc16;
use bytes::{BufMut, Bytes, BytesMut};
use moneta_core::{Error, Result};

pub const SYNC: u8 = 0x02;
/// Peripheral address of a bill validator on the shared bus.
pub const VALIDATOR_ADDRESS: u8 = 0x03;

/// SYNC + ADDR + LEN + CRC16.
const OVERHEAD: usize = 5;
/// LEN is a single byte covering the whole frame.
const MAX_DATA: usize = u8::MAX as usize - OVERHEAD;

/// One parsed answer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub address: u8,
    pub data: Bytes,
}

impl Frame {
    /// Pack a request frame: command byte followed by its data.
    pub fn pack(address: u8, command: u8, data: &[u8]) -> Result<Bytes> {
        Self::pack_payload(address, &{
            let mut payload = Vec::with_capacity(data.len() + 1);
            payload.push(command);
            payload.extend_from_slice(data);
            payload
        })
    }

    /// Pack a raw payload without a leading command byte (answers, ACK).
    pub fn pack_payload(address: u8, payload: &[u8]) -> Result<Bytes> {
        if payload.len() > MAX_DATA {
            return Err(Error::protocol(format!(
                "payload of {} bytes exceeds frame capacity",
                payload.len()
            )));
        }
        let mut frame = BytesMut::with_capacity(payload.len() + OVERHEAD);
        frame.put_u8(SYNC);
        frame.put_u8(address);
        frame.put_u8((payload.len() + OVERHEAD) as u8);
        frame.put_slice(payload);
        frame.put_u16_le(crc16(&frame));
        Ok(frame.freeze())
    }

    /// Parse and verify one frame; returns the payload.
    pub fn unpack(raw: &[u8]) -> Result<Frame> {
        if raw.len() < OVERHEAD {
            return Err(Error::AnswerTooShort {
                expected: OVERHEAD,
                actual: raw.len(),
            });
        }
        if raw[0] != SYNC {
            return Err(Error::protocol(format!("bad sync byte {:#04x}", raw[0])));
        }
        let declared = raw[2] as usize;
        if declared != raw.len() {
            return Err(Error::protocol(format!(
                "frame length mismatch: declared {declared}, received {}",
                raw.len()
            )));
        }
        let body = &raw[..raw.len() - 2];
        let expected = crc16(body);
        let actual = u16::from_le_bytes([raw[raw.len() - 2], raw[raw.len() - 1]]);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
        Ok(Frame {
            address: raw[1],
            data: Bytes::copy_from_slice(&raw[3..raw.len() - 2]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trip() {
        let packed = Frame::pack(VALIDATOR_ADDRESS, 0x33, &[0x01, 0x02]).unwrap();
        let frame = Frame::unpack(&packed).unwrap();
        assert_eq!(frame.address, VALIDATOR_ADDRESS);
        assert_eq!(frame.data.as_ref(), &[0x33, 0x01, 0x02]);
    }

    #[test]
    fn corrupted_crc_is_rejected() {
        let packed = Frame::pack(VALIDATOR_ADDRESS, 0x33, &[]).unwrap();
        let mut corrupted = packed.to_vec();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;
        assert!(matches!(
            Frame::unpack(&corrupted),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let packed = Frame::pack(VALIDATOR_ADDRESS, 0x33, &[0x01]).unwrap();
        assert!(Frame::unpack(&packed[..packed.len() - 1]).is_err());
        assert!(Frame::unpack(&[0x02, 0x03]).is_err());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let data = vec![0u8; 300];
        assert!(Frame::pack(VALIDATOR_ADDRESS, 0x50, &data).is_err());
    }
}
