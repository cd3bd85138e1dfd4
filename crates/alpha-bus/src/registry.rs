//! The bus facade used by sources, sinks and status displays.
//!
//! A [`BusRegistry`] wraps an optional [`Segment`]. When the segment could not
//! be mapped the registry keeps working as a null bus: reads produce silence,
//! writes and registrations do nothing and every query reports zero. Invalid
//! channel IDs are treated the same way for the call that carries them.

use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::{BusConfig, WriterPolicy};
use crate::error::BusError;
use crate::segment::Segment;
use crate::slot::ChannelSlot;
use crate::stats::ChannelStats;
use crate::table::ChannelId;

static SHARED: Lazy<Mutex<Weak<BusRegistry>>> = Lazy::new(|| Mutex::new(Weak::new()));

#[derive(Debug)]
pub struct BusRegistry {
    segment: Option<Segment>,
    policy: WriterPolicy,
}

impl BusRegistry {
    /// Maps the configured named segment.
    pub fn try_open(config: &BusConfig) -> Result<Self, BusError> {
        let segment = Segment::create_or_attach(config)?;
        Ok(Self {
            segment: Some(segment),
            policy: config.writer_policy,
        })
    }

    /// Maps the configured named segment only if it already exists.
    pub fn try_attach(config: &BusConfig) -> Result<Self, BusError> {
        let segment = Segment::attach_existing(config)?;
        Ok(Self {
            segment: Some(segment),
            policy: config.writer_policy,
        })
    }

    /// Like [`try_open`](Self::try_open), but a failure leaves the registry
    /// unmapped instead of returning an error.
    pub fn open(config: &BusConfig) -> Self {
        match Self::try_open(config) {
            Ok(registry) => registry,
            Err(err) => {
                warn!(%err, "shared bus unavailable, continuing without it");
                Self::unmapped().with_policy(config.writer_policy)
            }
        }
    }

    /// A registry over a private segment that no other handle can see.
    pub fn anonymous() -> Self {
        match Segment::anonymous() {
            Ok(segment) => Self {
                segment: Some(segment),
                policy: WriterPolicy::default(),
            },
            Err(err) => {
                warn!(%err, "failed to map private bus segment");
                Self::unmapped()
            }
        }
    }

    /// A null bus.
    pub fn unmapped() -> Self {
        Self {
            segment: None,
            policy: WriterPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: WriterPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The process-wide registry, opened from [`BusConfig::default`] on first
    /// use.
    pub fn shared() -> Arc<Self> {
        Self::shared_with(&BusConfig::default())
    }

    /// The process-wide registry. `config` is only used when no registry is
    /// currently alive. Only a weak reference is kept here, so the segment is
    /// unmapped once the last returned handle is dropped, and the next call
    /// maps it again.
    pub fn shared_with(config: &BusConfig) -> Arc<Self> {
        let mut current = SHARED.lock();
        if let Some(registry) = current.upgrade() {
            return registry;
        }
        let registry = Arc::new(Self::open(config));
        *current = Arc::downgrade(&registry);
        registry
    }

    /// Whether a segment is mapped. Displays use this for an offline marker.
    pub fn is_initialized(&self) -> bool {
        self.segment.is_some()
    }

    pub fn segment(&self) -> Option<&Segment> {
        self.segment.as_ref()
    }

    pub fn writer_policy(&self) -> WriterPolicy {
        self.policy
    }

    #[inline]
    fn slot(&self, channel: u32) -> Option<&ChannelSlot> {
        self.segment.as_ref()?.table().slot(channel)
    }

    /// Appends a block to `channel`. `right: None` sends `left` to both sides.
    /// Real-time safe.
    #[inline]
    pub fn write_to_channel(&self, channel: u32, left: &[f32], right: Option<&[f32]>) {
        if let Some(slot) = self.slot(channel) {
            slot.write(left, right);
        }
    }

    /// Fills the outputs from `channel` and returns the number of frames of
    /// real audio delivered. Anything short of a full block is silence.
    /// Real-time safe.
    #[inline]
    pub fn read_from_channel(
        &self,
        channel: u32,
        left: &mut [f32],
        right: Option<&mut [f32]>,
    ) -> usize {
        match self.slot(channel) {
            Some(slot) => slot.read(left, right),
            None => {
                left.fill(0.0);
                if let Some(right) = right {
                    right.fill(0.0);
                }
                0
            }
        }
    }

    /// Registers a source on `channel`, honouring the writer policy.
    /// Returns the new writer count.
    pub fn try_register_writer(&self, channel: u32) -> Result<i32, BusError> {
        let segment = self.segment.as_ref().ok_or(BusError::Unmapped)?;
        let slot = segment
            .table()
            .slot(channel)
            .ok_or(BusError::InvalidChannel(channel))?;
        let writers = match self.policy {
            WriterPolicy::Shared => slot.register_writer(),
            WriterPolicy::Exclusive => slot
                .claim_writer()
                .map_err(|writers| BusError::WriterConflict { channel, writers })?,
        };
        debug!(channel, writers, "registered bus writer");
        Ok(writers)
    }

    /// Registers a source on `channel`. Returns `false` when nothing was
    /// registered (invalid channel, null bus, or an exclusive channel that is
    /// already taken).
    pub fn register_writer(&self, channel: u32) -> bool {
        match self.try_register_writer(channel) {
            Ok(_) => true,
            Err(err @ BusError::WriterConflict { .. }) => {
                warn!(%err, "bus writer registration refused");
                false
            }
            Err(_) => false,
        }
    }

    /// Undoes one [`register_writer`](Self::register_writer). Callers must keep
    /// these paired; the count is not clamped at zero.
    pub fn unregister_writer(&self, channel: u32) {
        if let Some(slot) = self.slot(channel) {
            let writers = slot.unregister_writer();
            debug!(channel, writers, "unregistered bus writer");
        }
    }

    pub fn active_writers(&self, channel: u32) -> i32 {
        self.slot(channel).map_or(0, ChannelSlot::active_writers)
    }

    pub fn num_available(&self, channel: u32) -> usize {
        self.slot(channel).map_or(0, ChannelSlot::available_samples)
    }

    pub fn total_written(&self, channel: u32) -> u64 {
        self.slot(channel).map_or(0, ChannelSlot::total_written)
    }

    pub fn total_read(&self, channel: u32) -> u64 {
        self.slot(channel).map_or(0, ChannelSlot::total_read)
    }

    /// Silences and rewinds `channel`. Touches the whole ring; call it from a
    /// control thread only, and only while nobody streams on the channel.
    pub fn clear_channel(&self, channel: u32) {
        if let Some(slot) = self.slot(channel) {
            slot.clear();
            debug!(channel, "cleared bus channel");
        }
    }

    pub fn clear_all(&self) {
        for id in ChannelId::all() {
            self.clear_channel(id.get());
        }
    }

    pub fn stats(&self, channel: u32) -> ChannelStats {
        self.slot(channel).map_or_else(
            || ChannelStats::empty(channel),
            |slot| ChannelStats::capture(channel, slot),
        )
    }

    /// Stats for every channel, in channel order.
    pub fn snapshot(&self) -> Vec<ChannelStats> {
        ChannelId::all().map(|id| self.stats(id.get())).collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::layout::SLOT_CAPACITY;

    fn ramp(start: usize, len: usize) -> Vec<f32> {
        (start..start + len).map(|v| v as f32 * 1.0e-3).collect()
    }

    #[test]
    fn blocks_come_back_in_order() {
        let bus = BusRegistry::anonymous();
        assert!(bus.is_initialized());
        let signal = ramp(0, 4096);
        for block in signal.chunks(512) {
            bus.write_to_channel(12, block, None);
        }
        assert_eq!(bus.num_available(12), 4096);

        let mut out = vec![0.0; 4096];
        assert_eq!(bus.read_from_channel(12, &mut out, None), 4096);
        assert_eq!(out, signal);
        assert_eq!(bus.num_available(12), 0);
    }

    #[test]
    fn channels_are_isolated() {
        let bus = BusRegistry::anonymous();
        bus.write_to_channel(1, &[1.0; 64], None);
        assert_eq!(bus.num_available(1), 64);
        assert_eq!(bus.num_available(2), 0);
        assert_eq!(bus.num_available(32), 0);
    }

    #[test]
    fn underrun_reads_silence_and_keeps_data() {
        let bus = BusRegistry::anonymous();
        bus.write_to_channel(4, &ramp(1, 100), None);
        let mut left = vec![9.0; 256];
        let mut right = vec![9.0; 256];
        assert_eq!(bus.read_from_channel(4, &mut left, Some(&mut right)), 0);
        assert!(left.iter().chain(&right).all(|s| *s == 0.0));
        assert_eq!(bus.num_available(4), 100);
        assert_eq!(bus.total_read(4), 0);
    }

    #[test]
    fn overrun_returns_newest_capacity() {
        let bus = BusRegistry::anonymous();
        let total = 300_000;
        let signal: Vec<f32> = (0..total).map(|v| v as f32).collect();
        bus.write_to_channel(9, &signal, None);

        let mut out = vec![0.0; SLOT_CAPACITY];
        assert_eq!(bus.read_from_channel(9, &mut out, None), SLOT_CAPACITY);
        assert_eq!(out[0], (total - SLOT_CAPACITY) as f32);
        assert_eq!(out.last().copied(), Some((total - 1) as f32));
    }

    #[test]
    fn writer_registrations_are_counted() {
        let bus = BusRegistry::anonymous();
        assert!(bus.register_writer(5));
        assert!(bus.register_writer(5));
        bus.unregister_writer(5);
        assert_eq!(bus.active_writers(5), 1);
        assert_eq!(bus.active_writers(6), 0);
    }

    #[test]
    fn exclusive_policy_refuses_second_writer() {
        let bus = BusRegistry::anonymous().with_policy(WriterPolicy::Exclusive);
        assert_eq!(bus.try_register_writer(5).unwrap(), 1);
        assert!(matches!(
            bus.try_register_writer(5),
            Err(BusError::WriterConflict {
                channel: 5,
                writers: 1
            })
        ));
        assert!(!bus.register_writer(5));
        assert_eq!(bus.active_writers(5), 1);

        bus.unregister_writer(5);
        assert!(bus.register_writer(5));
    }

    #[test]
    fn invalid_channels_have_no_effect() {
        let bus = BusRegistry::anonymous();
        for channel in [0, 33, u32::MAX] {
            bus.write_to_channel(channel, &[1.0; 32], None);
            assert!(!bus.register_writer(channel));
            bus.unregister_writer(channel);
            bus.clear_channel(channel);

            let mut out = [5.0f32; 32];
            assert_eq!(bus.read_from_channel(channel, &mut out, None), 0);
            assert!(out.iter().all(|s| *s == 0.0));
            assert_eq!(bus.active_writers(channel), 0);
            assert_eq!(bus.num_available(channel), 0);
            assert_eq!(bus.total_written(channel), 0);
            assert_eq!(bus.total_read(channel), 0);
            assert_eq!(bus.stats(channel), ChannelStats::empty(channel));
        }
        assert!(bus.snapshot().iter().all(ChannelStats::is_idle));
        assert!(matches!(
            bus.try_register_writer(0),
            Err(BusError::InvalidChannel(0))
        ));
    }

    #[test]
    fn null_bus_degrades_to_silence() {
        let bus = BusRegistry::unmapped();
        assert!(!bus.is_initialized());
        bus.write_to_channel(1, &[1.0; 16], None);
        assert!(!bus.register_writer(1));
        assert!(matches!(
            bus.try_register_writer(1),
            Err(BusError::Unmapped)
        ));

        let mut left = [3.0f32; 16];
        let mut right = [3.0f32; 16];
        assert_eq!(bus.read_from_channel(1, &mut left, Some(&mut right)), 0);
        assert!(left.iter().chain(&right).all(|s| *s == 0.0));
        assert_eq!(bus.snapshot().len(), 32);
        assert!(bus.snapshot().iter().all(|stats| stats.total_written == 0));
    }

    #[test]
    fn clear_channel_drops_buffered_audio() {
        let bus = BusRegistry::anonymous();
        bus.write_to_channel(2, &ramp(0, 128), None);
        bus.clear_channel(2);
        assert_eq!(bus.num_available(2), 0);

        bus.write_to_channel(3, &ramp(0, 64), None);
        bus.clear_all();
        assert_eq!(bus.num_available(3), 0);
        assert_eq!(bus.total_written(3), 64);
    }

    #[test]
    fn stats_track_traffic() {
        let bus = BusRegistry::anonymous();
        bus.register_writer(7);
        bus.write_to_channel(7, &ramp(0, 300), None);
        let mut out = vec![0.0; 200];
        bus.read_from_channel(7, &mut out, None);

        let stats = bus.stats(7);
        assert_eq!(
            stats,
            ChannelStats {
                channel: 7,
                active_writers: 1,
                available: 100,
                total_written: 300,
                total_read: 200,
            }
        );
        assert!(!stats.is_idle());
        assert_eq!(bus.snapshot()[6], stats);
    }
}
