//! Generic device engine: answer decoding, polling with bounded history,
//! event emission, firmware image handling and the per-device worker
//! thread.
//!
//! # Architecture
//!
//! ```text
//!  application thread                 worker thread (one per device)
//!  ──────────────────                 ──────────────────────────────
//!  handle.set_enable() ──invoke()──▶ ┌──────────────────────────────┐
//!  handle.update_firmware() ───────▶ │ task queue ⟷ polling timer  │
//!                                    │   driver ── StatusEngine     │
//!                                    │     │            │           │
//!                                    │   codec ─────▶ port          │
//!                                    └──────┬───────────────────────┘
//!              DeviceManager ◀─ events ─────┘
//! ```
//!
//! Drivers compose a [`StatusEngine`] with their own I/O hooks instead of
//! inheriting from a base class; the [`WorkingThreadProxy`] guarantees all
//! device I/O happens on one designated thread.

pub mod device_code;
pub mod engine;
pub mod event;
pub mod expector;
pub mod firmware;
pub mod manager;
pub mod worker;

pub use device_code::{BitmapCodeTable, ByteCodeTable, DeviceCodeSpec};
pub use engine::{EngineHooks, PollOutcome, StatusEngine};
pub use event::{DeviceEvent, EventSender, event_channel};
pub use expector::{PollingExpector, WaitOutcome};
pub use firmware::{FirmwareBlock, UpdateSession, parse_image};
pub use manager::{DeviceManager, NamedEvent};
pub use worker::WorkingThreadProxy;
