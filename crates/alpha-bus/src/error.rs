use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::layout::LayoutError;

/// Errors surfaced while setting up or administering the bus. The audio
/// path never returns these; it degrades to silence instead.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("shared segment rejected: {0}")]
    Layout(#[from] LayoutError),
    #[error("no shared segment at {}", .0.display())]
    NotFound(PathBuf),
    #[error("shared segment is {found} bytes, expected {expected}")]
    SegmentTooSmall { expected: usize, found: u64 },
    #[error("shared segment was not initialised within {0:?}")]
    NotReady(Duration),
    #[error("invalid segment name {0:?}")]
    InvalidName(String),
    #[error("channel {0} is outside 1..=32")]
    InvalidChannel(u32),
    #[error("channel {channel} already has {writers} active writer(s)")]
    WriterConflict { channel: u32, writers: i32 },
    #[error("shared segment is not mapped")]
    Unmapped,
}

impl BusError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        BusError::Io {
            context: context.into(),
            source,
        }
    }
}
