//! Per-channel ring storage.
//!
//! A slot holds two fixed arrays of samples plus a pair of cursors. Cursors
//! are unbounded 64-bit frame positions; the ring index of a position is
//! `position & SLOT_MASK`. The writer publishes its position with `Release`
//! after copying, the reader acquires it before copying, and the reader
//! publishes its own position the same way.
//!
//! The slot tolerates several writers and several readers without any
//! mutual exclusion. Two writers on one channel race on the same write
//! position and storage, so their blocks can interleave or overwrite each
//! other. Readers share one read position, so each block is delivered to
//! whichever reader asks first. Consumed samples are left in place until a
//! writer overwrites them.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use atomic_float::AtomicF32;

use crate::layout::{SLOT_CAPACITY, SLOT_MASK};

const CAPACITY: u64 = SLOT_CAPACITY as u64;

/// A cursor alone on its cache line.
#[repr(C, align(64))]
struct CursorLine {
    position: AtomicU64,
}

/// Diagnostic counters. These never take part in the read/write protocol
/// and are only touched with `Relaxed` ordering.
#[repr(C, align(64))]
struct SlotCounters {
    active_writers: AtomicI32,
    total_written: AtomicU64,
    total_read: AtomicU64,
}

/// One channel's circular stereo buffer.
///
/// Slots only ever live inside a mapped segment; the all-zero byte pattern
/// is an empty slot with both cursors at zero.
#[repr(C)]
pub struct ChannelSlot {
    write: CursorLine,
    read: CursorLine,
    counters: SlotCounters,
    left: [AtomicF32; SLOT_CAPACITY],
    right: [AtomicF32; SLOT_CAPACITY],
}

#[inline]
fn ring_index(position: u64) -> usize {
    (position as usize) & SLOT_MASK
}

/// Read position to copy from and how many frames it may take.
///
/// A reader that has been lapped resumes at the oldest frame still in the
/// ring. A read position ahead of the write position (only possible when
/// writers race or a clear overlaps a read) counts as empty; `read` moves
/// such a position back to the writer.
#[inline]
fn span(read: u64, write: u64) -> (u64, usize) {
    if read > write {
        return (write, 0);
    }
    let pending = write - read;
    if pending > CAPACITY {
        (write - CAPACITY, SLOT_CAPACITY)
    } else {
        (read, pending as usize)
    }
}

impl ChannelSlot {
    pub const CAPACITY: usize = SLOT_CAPACITY;

    /// Appends a stereo block. When `right` is `None` the left samples are
    /// used for both sides; when it is shorter than `left` only the common
    /// length is written.
    ///
    /// Never blocks and never checks the reader: unread frames are simply
    /// overwritten when the writer laps them. A block longer than the ring
    /// only stores its last `SLOT_CAPACITY` frames.
    pub fn write(&self, left: &[f32], right: Option<&[f32]>) {
        let right = right.unwrap_or(left);
        let frames = left.len().min(right.len());
        if frames == 0 {
            return;
        }

        let start = self.write.position.load(Ordering::Acquire);
        let skip = frames.saturating_sub(SLOT_CAPACITY);
        for (offset, (&l, &r)) in left[..frames]
            .iter()
            .zip(&right[..frames])
            .enumerate()
            .skip(skip)
        {
            let idx = ring_index(start.wrapping_add(offset as u64));
            self.left[idx].store(l, Ordering::Relaxed);
            self.right[idx].store(r, Ordering::Relaxed);
        }

        // Counted before publication so a reader never reports more read
        // than written.
        self.counters
            .total_written
            .fetch_add(frames as u64, Ordering::Relaxed);
        self.write
            .position
            .store(start.wrapping_add(frames as u64), Ordering::Release);
    }

    /// Fills `left` (and `right`, if given) with the next `left.len()`
    /// frames and returns how many frames of real audio were delivered.
    ///
    /// With fewer frames buffered than requested both outputs are silenced,
    /// the cursors stay where they are and `0` is returned. If `right` is
    /// longer than `left` its tail is silenced. A read position found ahead
    /// of the write position is first pulled back to it.
    pub fn read(&self, left: &mut [f32], right: Option<&mut [f32]>) -> usize {
        let frames = left.len();
        let write = self.write.position.load(Ordering::Acquire);
        let mut read = self.read.position.load(Ordering::Acquire);
        if read > write {
            // Left ahead of a rewound writer by a clear that overlapped a
            // read. Rejoin at the write position.
            let _ = self.read.position.compare_exchange(
                read,
                write,
                Ordering::Release,
                Ordering::Relaxed,
            );
            read = write;
        }
        let (start, available) = span(read, write);

        if frames == 0 || available < frames {
            left.fill(0.0);
            if let Some(right) = right {
                right.fill(0.0);
            }
            return 0;
        }

        for (offset, out) in left.iter_mut().enumerate() {
            *out = self.left[ring_index(start.wrapping_add(offset as u64))].load(Ordering::Relaxed);
        }
        if let Some(right) = right {
            let shared = right.len().min(frames);
            let (head, tail) = right.split_at_mut(shared);
            for (offset, out) in head.iter_mut().enumerate() {
                *out = self.right[ring_index(start.wrapping_add(offset as u64))]
                    .load(Ordering::Relaxed);
            }
            tail.fill(0.0);
        }

        self.read
            .position
            .store(start.wrapping_add(frames as u64), Ordering::Release);
        self.counters
            .total_read
            .fetch_add(frames as u64, Ordering::Relaxed);
        frames
    }

    /// Number of unread frames, at most `SLOT_CAPACITY`.
    pub fn available_samples(&self) -> usize {
        self.pending().1
    }

    #[inline]
    fn pending(&self) -> (u64, usize) {
        let write = self.write.position.load(Ordering::Acquire);
        let read = self.read.position.load(Ordering::Acquire);
        span(read, write)
    }

    /// Ring index the next write lands on, in `[0, SLOT_CAPACITY)`.
    pub fn write_cursor(&self) -> usize {
        ring_index(self.write.position.load(Ordering::Acquire))
    }

    /// Ring index the next read starts from, in `[0, SLOT_CAPACITY)`.
    pub fn read_cursor(&self) -> usize {
        ring_index(self.read.position.load(Ordering::Acquire))
    }

    /// Zeroes the storage and rewinds both cursors.
    ///
    /// Touches the whole ring, so it must not run on an audio thread, and
    /// must not overlap reads or writes on this slot.
    pub fn clear(&self) {
        for (l, r) in self.left.iter().zip(&self.right) {
            l.store(0.0, Ordering::Relaxed);
            r.store(0.0, Ordering::Relaxed);
        }
        self.write.position.store(0, Ordering::Release);
        self.read.position.store(0, Ordering::Release);
    }

    /// Increments the writer count and returns the new value.
    pub fn register_writer(&self) -> i32 {
        self.counters.active_writers.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Takes the channel only if nobody else is registered. On conflict the
    /// current count is returned.
    pub fn claim_writer(&self) -> Result<i32, i32> {
        self.counters
            .active_writers
            .compare_exchange(0, 1, Ordering::Relaxed, Ordering::Relaxed)
            .map(|_| 1)
    }

    /// Decrements the writer count and returns the new value. The count is
    /// not clamped; unpaired calls drive it negative.
    pub fn unregister_writer(&self) -> i32 {
        self.counters.active_writers.fetch_sub(1, Ordering::Relaxed) - 1
    }

    pub fn active_writers(&self) -> i32 {
        self.counters.active_writers.load(Ordering::Relaxed)
    }

    pub fn total_written(&self) -> u64 {
        self.counters.total_written.load(Ordering::Relaxed)
    }

    pub fn total_read(&self) -> u64 {
        self.counters.total_read.load(Ordering::Relaxed)
    }
}
