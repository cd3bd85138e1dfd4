//! Source and sink ends of a channel, as held by processing instances.
//!
//! [`BusSend`] keeps a source's writer registration in step with its channel
//! selection and lifetime. [`BusReturn`] is the sink side: it drains one
//! channel per audio block.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::registry::BusRegistry;

/// Blocks between periodic trace diagnostics.
const DIAGNOSTIC_INTERVAL: u32 = 1000;

/// Offset added to the first output sample so hosts do not treat a silent
/// sink as idle and stop calling it.
pub const KEEP_ALIVE_OFFSET: f32 = 1.0e-7;

/// Source endpoint. Registers on creation, unregisters on drop.
#[derive(Debug)]
pub struct BusSend {
    registry: Arc<BusRegistry>,
    channel: u32,
    registered: bool,
    enabled: bool,
    blocks: u32,
}

impl BusSend {
    pub fn new(registry: Arc<BusRegistry>, channel: u32) -> Self {
        let registered = registry.register_writer(channel);
        Self {
            registry,
            channel,
            registered,
            enabled: true,
            blocks: 0,
        }
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    /// Whether this source holds a registration on its channel. Under the
    /// exclusive writer policy a source that lost the channel stays silent.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Moves the registration to `channel`. The old channel is released
    /// before the new one is claimed. Selecting the current channel again
    /// retries a registration that was refused.
    pub fn set_channel(&mut self, channel: u32) {
        if channel == self.channel {
            self.reclaim();
            return;
        }
        self.release();
        self.channel = channel;
        self.registered = self.registry.register_writer(channel);
    }

    /// Retries the registration on the current channel if it is not held,
    /// e.g. after an exclusive owner went away. Returns whether it is held.
    pub fn reclaim(&mut self) -> bool {
        if !self.registered {
            self.registered = self.registry.register_writer(self.channel);
        }
        self.registered
    }

    /// Sends one processed block. Real-time safe.
    pub fn process(&mut self, left: &[f32], right: Option<&[f32]>) {
        if !self.enabled || !self.registered {
            return;
        }
        self.registry.write_to_channel(self.channel, left, right);

        self.blocks += 1;
        if self.blocks >= DIAGNOSTIC_INTERVAL {
            self.blocks = 0;
            trace!(
                channel = self.channel,
                frames = left.len(),
                first = left.first().copied().unwrap_or_default(),
                mapped = self.registry.is_initialized(),
                "bus send"
            );
        }
    }

    fn release(&mut self) {
        if self.registered {
            self.registry.unregister_writer(self.channel);
            self.registered = false;
        }
    }
}

impl Drop for BusSend {
    fn drop(&mut self) {
        self.release();
    }
}

/// Writer count last seen by a [`BusReturn`], readable from other threads
/// while the sink keeps processing.
#[derive(Debug, Clone, Default)]
pub struct WriterGauge(Arc<AtomicI32>);

impl WriterGauge {
    pub fn get(&self) -> i32 {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self, writers: i32) {
        self.0.store(writers, Ordering::Relaxed);
    }
}

/// Sink endpoint.
#[derive(Debug)]
pub struct BusReturn {
    registry: Arc<BusRegistry>,
    channel: u32,
    keep_alive: bool,
    active_writers: WriterGauge,
    blocks: u32,
}

impl BusReturn {
    pub fn new(registry: Arc<BusRegistry>, channel: u32) -> Self {
        Self {
            registry,
            channel,
            keep_alive: true,
            active_writers: WriterGauge::default(),
            blocks: 0,
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn set_channel(&mut self, channel: u32) {
        self.channel = channel;
    }

    /// Writer count seen by the most recent [`process`](Self::process) call.
    pub fn active_writers(&self) -> i32 {
        self.active_writers.get()
    }

    /// Shared handle to the writer count for a display thread.
    pub fn writer_gauge(&self) -> WriterGauge {
        self.active_writers.clone()
    }

    /// Fills one output block from the channel and returns the number of
    /// frames of real audio. Real-time safe.
    pub fn process(&mut self, left: &mut [f32], mut right: Option<&mut [f32]>) -> usize {
        let delivered =
            self.registry
                .read_from_channel(self.channel, left, right.as_deref_mut());

        let writers = self.registry.active_writers(self.channel);
        self.active_writers.set(writers);

        if self.keep_alive {
            if let Some(first) = left.first_mut() {
                *first += KEEP_ALIVE_OFFSET;
            }
            if let Some(first) = right.and_then(|right| right.first_mut()) {
                *first += KEEP_ALIVE_OFFSET;
            }
        }

        self.blocks += 1;
        if self.blocks >= DIAGNOSTIC_INTERVAL {
            self.blocks = 0;
            trace!(
                channel = self.channel,
                writers,
                available = self.registry.num_available(self.channel),
                mapped = self.registry.is_initialized(),
                "bus return"
            );
        }
        delivered
    }
}
