//! Per-vendor frame codec layer.
//!
//! Drivers talk to devices exclusively through a [`Codec`]: "send this
//! command with this data, give me the answer payload". The codec owns
//! framing, checksums, the ACK/NAK handshake and NAK retries; drivers own
//! meaning.
//!
//! The reference codec implements a CCNet-flavored wire format:
//!
//! ```text
//! request:  SYNC  ADDR  LEN  CMD  DATA...  CRC16lo CRC16hi
//! answer:   SYNC  ADDR  LEN  DATA...       CRC16lo CRC16hi
//! ```
//!
//! `LEN` covers the whole frame including the checksum. A one-byte data
//! answer of `0x00` is an ACK, `0xFF` a NAK.

pub mod codec;
pub mod command;
pub mod crc;
pub mod frame;

pub use codec::{CcnetCodec, Codec};
pub use command::Command;
pub use frame::{Frame, SYNC, VALIDATOR_ADDRESS};
