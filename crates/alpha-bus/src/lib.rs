//! Alpha Bus
//! =========
//! Cross-process audio routing over shared memory. Sources deposit processed
//! stereo blocks into one of 32 numbered channels; sinks drain a channel once
//! per audio callback. The read and write paths use only atomic loads and
//! stores on per-channel cursors: no locks, no allocation, no system calls.
//!
//! The bus is best-effort. A reader that asks for more than is buffered gets
//! silence, a writer that laps its reader overwrites the oldest frames, and a
//! bus whose segment could not be mapped behaves as a silent null bus.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod layout;
pub mod registry;
pub mod segment;
pub mod slot;
pub mod stats;
pub mod table;

pub use config::{BusConfig, WriterPolicy};
pub use endpoint::{BusReturn, BusSend, WriterGauge};
pub use error::BusError;
pub use layout::{LayoutError, CHANNEL_COUNT, SLOT_CAPACITY};
pub use registry::BusRegistry;
pub use segment::Segment;
pub use slot::ChannelSlot;
pub use stats::ChannelStats;
pub use table::{ChannelId, ChannelTable};

#[cfg(feature = "fuzzing")]
pub use layout::fuzz_validate_header;
