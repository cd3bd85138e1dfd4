use std::fmt;

use serde::Serialize;

use crate::slot::ChannelSlot;

/// Point-in-time view of one channel for meters and status displays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub channel: u32,
    pub active_writers: i32,
    pub available: usize,
    pub total_written: u64,
    pub total_read: u64,
}

impl ChannelStats {
    /// All-zero stats reported for invalid channels or an unmapped bus.
    pub fn empty(channel: u32) -> Self {
        Self {
            channel,
            ..Self::default()
        }
    }

    pub(crate) fn capture(channel: u32, slot: &ChannelSlot) -> Self {
        Self {
            channel,
            active_writers: slot.active_writers(),
            available: slot.available_samples(),
            total_written: slot.total_written(),
            total_read: slot.total_read(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active_writers <= 0 && self.available == 0
    }
}

impl fmt::Display for ChannelStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ch {:>2} | writers {:>2} | available {:>6} | written {:>12} | read {:>12}",
            self.channel, self.active_writers, self.available, self.total_written, self.total_read
        )
    }
}
