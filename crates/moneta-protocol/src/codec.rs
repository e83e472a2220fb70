//! Command execution over a [`DevicePort`].

use crate::command::Command;
use crate::frame::Frame;
use bytes::Bytes;
use moneta_core::{Error, Result};
use moneta_port::DevicePort;
use tracing::{debug, warn};

/// One retry after a NAK before the exchange is declared failed.
const NAK_RETRIES: u32 = 2;

const ACK_BYTE: u8 = 0x00;
const NAK_BYTE: u8 = 0xFF;

/// Vendor codec seam: "send command, return the answer payload".
///
/// An empty device answer surfaces as [`Error::NoAnswer`] so callers can
/// apply their own retry policy (firmware block writes do).
pub trait Codec: Send {
    fn process_command(
        &mut self,
        port: &mut dyn DevicePort,
        command: Command,
        data: &[u8],
    ) -> Result<Bytes>;
}

/// Reference CCNet-flavored codec.
pub struct CcnetCodec {
    address: u8,
}

impl CcnetCodec {
    pub fn new(address: u8) -> Self {
        Self { address }
    }

    fn exchange(
        &mut self,
        port: &mut dyn DevicePort,
        command: Command,
        data: &[u8],
    ) -> Result<Bytes> {
        let request = Frame::pack(self.address, command.code(), data)?;
        debug!(command = ?command, request = ?request.as_ref(), "-> device");
        port.write(&request)?;

        if !command.expects_answer() {
            return Ok(Bytes::new());
        }

        let raw = port.read(command.timeout())?;
        if raw.is_empty() {
            return Err(Error::NoAnswer);
        }
        let frame = Frame::unpack(&raw)?;
        debug!(command = ?command, answer = ?frame.data.as_ref(), "<- device");

        if frame.address != self.address {
            return Err(Error::protocol(format!(
                "answer from address {:#04x}, expected {:#04x}",
                frame.address, self.address
            )));
        }
        if frame.data.as_ref() == [NAK_BYTE] {
            return Err(Error::Nak);
        }

        // Data answers are acknowledged so the device can drop its
        // transmit buffer.
        if frame.data.as_ref() != [ACK_BYTE] {
            let ack = Frame::pack(self.address, Command::Ack.code(), &[])?;
            port.write(&ack)?;
        }
        Ok(frame.data)
    }
}

impl Codec for CcnetCodec {
    fn process_command(
        &mut self,
        port: &mut dyn DevicePort,
        command: Command,
        data: &[u8],
    ) -> Result<Bytes> {
        let mut attempt = 0;
        loop {
            match self.exchange(port, command, data) {
                Err(Error::Nak) if attempt < NAK_RETRIES => {
                    attempt += 1;
                    warn!(command = ?command, attempt, "device answered NAK, retrying");
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::VALIDATOR_ADDRESS;
    use moneta_port::MockPort;

    fn answer(payload: &[u8]) -> Vec<u8> {
        Frame::pack_payload(VALIDATOR_ADDRESS, payload)
            .unwrap()
            .to_vec()
    }

    #[test]
    fn data_answer_is_returned_and_acked() {
        let (mut port, handle) = MockPort::new();
        port.open().unwrap();
        handle.push_answer(answer(&[0x14, 0x00]));

        let mut codec = CcnetCodec::new(VALIDATOR_ADDRESS);
        let payload = codec
            .process_command(&mut port, Command::Poll, &[])
            .unwrap();
        assert_eq!(payload.as_ref(), &[0x14, 0x00]);

        // Poll request plus the trailing ACK.
        assert_eq!(handle.request_count(), 2);
        let ack = Frame::unpack(&handle.requests()[1]).unwrap();
        assert_eq!(ack.data.as_ref(), &[Command::Ack.code()]);
    }

    #[test]
    fn silence_is_no_answer() {
        let (mut port, _handle) = MockPort::new();
        port.open().unwrap();
        let mut codec = CcnetCodec::new(VALIDATOR_ADDRESS);
        assert!(matches!(
            codec.process_command(&mut port, Command::Poll, &[]),
            Err(Error::NoAnswer)
        ));
    }

    #[test]
    fn nak_is_retried_then_surfaced() {
        let (mut port, handle) = MockPort::new();
        port.open().unwrap();
        for _ in 0..=NAK_RETRIES {
            handle.push_answer(answer(&[NAK_BYTE]));
        }

        let mut codec = CcnetCodec::new(VALIDATOR_ADDRESS);
        assert!(matches!(
            codec.process_command(&mut port, Command::Poll, &[]),
            Err(Error::Nak)
        ));
        assert_eq!(handle.request_count() as u32, NAK_RETRIES + 1);
    }

    #[test]
    fn nak_then_success_recovers() {
        let (mut port, handle) = MockPort::new();
        port.open().unwrap();
        handle.push_answer(answer(&[NAK_BYTE]));
        handle.push_answer(answer(&[0x19]));

        let mut codec = CcnetCodec::new(VALIDATOR_ADDRESS);
        let payload = codec
            .process_command(&mut port, Command::Poll, &[])
            .unwrap();
        assert_eq!(payload.as_ref(), &[0x19]);
    }

    #[test]
    fn wrong_address_is_a_protocol_error() {
        let (mut port, handle) = MockPort::new();
        port.open().unwrap();
        handle.push_answer(Frame::pack_payload(0x01, &[0x14]).unwrap().to_vec());

        let mut codec = CcnetCodec::new(VALIDATOR_ADDRESS);
        assert!(matches!(
            codec.process_command(&mut port, Command::Poll, &[]),
            Err(Error::Protocol(_))
        ));
    }
}
