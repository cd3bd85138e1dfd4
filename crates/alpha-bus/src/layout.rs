//! Shared-memory layout of the channel bus.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ SegmentHeader (64 bytes): magic, version, geometry, state │
//! ├──────────────────────────────────────────────────────────┤
//! │ ChannelTable: 32 × ChannelSlot                            │
//! │   cursor lines (write / read, one cache line each)        │
//! │   telemetry counters                                      │
//! │   left[SLOT_CAPACITY], right[SLOT_CAPACITY]               │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every process attaching to the segment must be built against the same
//! layout. The header is checked before anything behind it is interpreted.

use std::mem::size_of;
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

use crate::table::ChannelTable;

/// Number of routable channels. Channel IDs run `1..=CHANNEL_COUNT`.
pub const CHANNEL_COUNT: usize = 32;

/// Frames stored per channel, roughly 5.9 seconds at 44.1 kHz.
pub const SLOT_CAPACITY: usize = 262_144;

/// Bitmask applied to positions to obtain ring indices.
pub const SLOT_MASK: usize = SLOT_CAPACITY - 1;

/// Magic bytes identifying an alpha-bus segment.
pub const MAGIC: [u8; 8] = *b"ALPHABUS";

/// Bumped whenever anything in [`SharedLayout`] changes shape.
pub const LAYOUT_VERSION: u32 = 1;

/// Total mapped size of a segment.
pub const SEGMENT_SIZE: usize = size_of::<SharedLayout>();

const STATE_INITIALISING: u32 = 0;
const STATE_READY: u32 = 1;

const _: () = assert!(SLOT_CAPACITY.is_power_of_two());
const _: () = assert!(size_of::<SegmentHeader>() == 64);

/// Layout tag at the start of every segment.
#[repr(C, align(64))]
pub struct SegmentHeader {
    magic: [u8; 8],
    version: u32,
    state: AtomicU32,
    channel_count: u32,
    slot_capacity: u32,
    total_size: u64,
    creator_pid: u32,
    _reserved: [u8; 28],
}

impl SegmentHeader {
    /// Writes the layout tag. Only the creating process calls this, before
    /// [`publish`](Self::publish).
    pub(crate) fn init(&mut self) {
        self.magic = MAGIC;
        self.version = LAYOUT_VERSION;
        self.channel_count = CHANNEL_COUNT as u32;
        self.slot_capacity = SLOT_CAPACITY as u32;
        self.total_size = SEGMENT_SIZE as u64;
        self.creator_pid = std::process::id();
        self.state.store(STATE_INITIALISING, Ordering::Relaxed);
    }

    /// Makes the initialised header visible to attaching processes.
    pub(crate) fn publish(&self) {
        self.state.store(STATE_READY, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_READY
    }

    pub fn creator_pid(&self) -> u32 {
        self.creator_pid
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Checks that the segment was laid out by a compatible build.
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.magic != MAGIC {
            return Err(LayoutError::InvalidMagic);
        }
        if self.version != LAYOUT_VERSION {
            return Err(LayoutError::IncompatibleVersion {
                expected: LAYOUT_VERSION,
                found: self.version,
            });
        }
        if self.channel_count as usize != CHANNEL_COUNT
            || self.slot_capacity as usize != SLOT_CAPACITY
        {
            return Err(LayoutError::Geometry {
                channels: self.channel_count,
                capacity: self.slot_capacity,
            });
        }
        if self.total_size != SEGMENT_SIZE as u64 {
            return Err(LayoutError::SizeMismatch {
                expected: SEGMENT_SIZE as u64,
                found: self.total_size,
            });
        }
        Ok(())
    }
}

/// Reasons an existing segment is refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("invalid magic bytes")]
    InvalidMagic,
    #[error("incompatible layout version {found} (expected {expected})")]
    IncompatibleVersion { expected: u32, found: u32 },
    #[error(
        "segment holds {channels} channels of {capacity} frames, expected {want_channels} of {want_capacity}",
        want_channels = CHANNEL_COUNT,
        want_capacity = SLOT_CAPACITY
    )]
    Geometry { channels: u32, capacity: u32 },
    #[error("segment size {found} does not match expected {expected}")]
    SizeMismatch { expected: u64, found: u64 },
}

/// The complete contents of a mapped segment.
#[repr(C)]
pub struct SharedLayout {
    pub header: SegmentHeader,
    pub table: ChannelTable,
}

/// Validates an arbitrary byte image as if it were the head of a segment.
#[cfg(feature = "fuzzing")]
pub fn fuzz_validate_header(data: &[u8]) {
    if data.len() < size_of::<SegmentHeader>() {
        return;
    }
    // SAFETY: the slice holds at least one header's worth of bytes and every
    // field is an integer or byte array, so any bit pattern is a valid value.
    let header = unsafe { std::ptr::read_unaligned(data.as_ptr().cast::<SegmentHeader>()) };
    let _ = header.validate();
    let _ = header.is_ready();
}
