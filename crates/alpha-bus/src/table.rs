use std::fmt;

use serde::{Deserialize, Serialize};

use crate::layout::CHANNEL_COUNT;
use crate::slot::ChannelSlot;

/// A validated 1-based channel number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ChannelId(u8);

impl ChannelId {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = CHANNEL_COUNT as u32;

    pub fn new(raw: u32) -> Option<Self> {
        (Self::MIN..=Self::MAX)
            .contains(&raw)
            .then_some(Self(raw as u8))
    }

    pub fn get(self) -> u32 {
        u32::from(self.0)
    }

    /// Zero-based slot index.
    pub fn index(self) -> usize {
        usize::from(self.0) - 1
    }

    pub fn all() -> impl Iterator<Item = ChannelId> {
        (Self::MIN..=Self::MAX).map(|raw| Self(raw as u8))
    }
}

impl TryFrom<u32> for ChannelId {
    type Error = String;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or_else(|| format!("channel {raw} is outside 1..={}", Self::MAX))
    }
}

impl From<ChannelId> for u32 {
    fn from(id: ChannelId) -> Self {
        id.get()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// All channel slots, laid out back to back as the segment payload.
#[repr(C)]
pub struct ChannelTable {
    slots: [ChannelSlot; CHANNEL_COUNT],
}

impl ChannelTable {
    /// Resolves a raw channel ID. Out-of-range IDs yield `None`, which the
    /// callers turn into silence or a no-op.
    #[inline]
    pub fn slot(&self, raw: u32) -> Option<&ChannelSlot> {
        ChannelId::new(raw).map(|id| self.get(id))
    }

    #[inline]
    pub fn get(&self, id: ChannelId) -> &ChannelSlot {
        &self.slots[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChannelId, &ChannelSlot)> {
        ChannelId::all().zip(self.slots.iter())
    }
}
