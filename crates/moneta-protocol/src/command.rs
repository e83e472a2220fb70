//! Command set of the reference validator protocol.

use moneta_core::constants::ANSWER_TIMEOUT;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Reset,
    GetStatus,
    Poll,
    EnableBillTypes,
    Stack,
    Return,
    Identification,
    GetBillTable,
    /// Pay out notes: unit index plus count.
    Dispense,
    /// Firmware transfer: enter/leave update mode and write blocks.
    Download,
    UpdateStatus,
    BlockSize,
    Ack,
    Nak,
}

impl Command {
    pub fn code(self) -> u8 {
        match self {
            Command::Reset => 0x30,
            Command::GetStatus => 0x31,
            Command::Poll => 0x33,
            Command::EnableBillTypes => 0x34,
            Command::Stack => 0x35,
            Command::Return => 0x36,
            Command::Identification => 0x37,
            Command::GetBillTable => 0x41,
            Command::Dispense => 0x3C,
            Command::Download => 0x50,
            Command::UpdateStatus => 0x52,
            Command::BlockSize => 0x53,
            Command::Ack => 0x00,
            Command::Nak => 0xFF,
        }
    }

    /// Answer wait bound for this command. Mechanical and transfer
    /// commands take longer than a status poll.
    pub fn timeout(self) -> Duration {
        match self {
            Command::Reset => Duration::from_secs(2),
            Command::Dispense => Duration::from_secs(5),
            Command::Download => Duration::from_secs(5),
            Command::Identification | Command::GetBillTable => Duration::from_secs(1),
            _ => ANSWER_TIMEOUT,
        }
    }

    /// Whether the device answers with a data frame at all. Pure control
    /// strobes (ACK) are fire-and-forget.
    pub fn expects_answer(self) -> bool {
        !matches!(self, Command::Ack | Command::Nak)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique() {
        let all = [
            Command::Reset,
            Command::GetStatus,
            Command::Poll,
            Command::EnableBillTypes,
            Command::Stack,
            Command::Return,
            Command::Identification,
            Command::GetBillTable,
            Command::Dispense,
            Command::Download,
            Command::UpdateStatus,
            Command::BlockSize,
            Command::Ack,
            Command::Nak,
        ];
        let codes: std::collections::BTreeSet<u8> = all.iter().map(|c| c.code()).collect();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn ack_is_fire_and_forget() {
        assert!(!Command::Ack.expects_answer());
        assert!(Command::Poll.expects_answer());
    }
}
