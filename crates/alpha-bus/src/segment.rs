//! Ownership of the mapped memory that backs the bus.
//!
//! A [`Segment`] is either a named object shared between processes (a file in
//! `/dev/shm` or the configured directory) or a private anonymous mapping.
//! Dropping it unmaps the memory; a named object outlives the mapping so the
//! next process to open it picks up where the others left off.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, info};

use crate::config::BusConfig;
use crate::error::BusError;
use crate::layout::{SegmentHeader, SharedLayout, SEGMENT_SIZE};
use crate::table::ChannelTable;

const ATTACH_POLL: Duration = Duration::from_millis(2);

#[derive(Debug)]
enum Backing {
    Anonymous,
    Named { path: PathBuf, _file: File },
}

/// A mapped, validated bus segment.
#[derive(Debug)]
pub struct Segment {
    mmap: MmapMut,
    backing: Backing,
    created: bool,
}

impl Segment {
    /// Maps a private, zero-initialised segment visible only through this
    /// handle.
    pub fn anonymous() -> Result<Self, BusError> {
        let mut mmap = MmapMut::map_anon(SEGMENT_SIZE)
            .map_err(|err| BusError::io("failed to map anonymous segment", err))?;
        init_header(&mut mmap);
        Ok(Self {
            mmap,
            backing: Backing::Anonymous,
            created: true,
        })
    }

    /// Creates the named segment, or attaches to it if another process got
    /// there first. An attached segment is never re-initialised.
    pub fn create_or_attach(config: &BusConfig) -> Result<Self, BusError> {
        let path = config.segment_path()?;
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => Self::create(path, file),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Self::attach(path, config.attach_timeout())
            }
            Err(err) => Err(BusError::io(
                format!("failed to create segment {}", path.display()),
                err,
            )),
        }
    }

    /// Attaches to an existing named segment. Never creates one; a missing
    /// object is reported as [`BusError::NotFound`].
    pub fn attach_existing(config: &BusConfig) -> Result<Self, BusError> {
        let path = config.segment_path()?;
        Self::attach(path, config.attach_timeout())
    }

    fn create(path: PathBuf, file: File) -> Result<Self, BusError> {
        let mapped = file
            .set_len(SEGMENT_SIZE as u64)
            .map_err(|err| BusError::io(format!("failed to size {}", path.display()), err))
            .and_then(|()| map_file(&file, &path));

        let mut mmap = match mapped {
            Ok(mmap) => mmap,
            Err(err) => {
                // A half-made object would stall every later attach.
                let _ = fs::remove_file(&path);
                return Err(err);
            }
        };

        init_header(&mut mmap);
        info!(
            path = %path.display(),
            bytes = SEGMENT_SIZE,
            "created shared bus segment"
        );
        Ok(Self {
            mmap,
            backing: Backing::Named { path, _file: file },
            created: true,
        })
    }

    fn attach(path: PathBuf, timeout: Duration) -> Result<Self, BusError> {
        let deadline = Instant::now() + timeout;
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(BusError::NotFound(path));
            }
            Err(err) => {
                return Err(BusError::io(
                    format!("failed to open {}", path.display()),
                    err,
                ))
            }
        };

        loop {
            let len = file
                .metadata()
                .map_err(|err| BusError::io(format!("failed to stat {}", path.display()), err))?
                .len();
            if len >= SEGMENT_SIZE as u64 {
                break;
            }
            if Instant::now() >= deadline {
                return Err(BusError::SegmentTooSmall {
                    expected: SEGMENT_SIZE,
                    found: len,
                });
            }
            thread::sleep(ATTACH_POLL);
        }

        let mmap = map_file(&file, &path)?;
        let segment = Self {
            mmap,
            backing: Backing::Named { path, _file: file },
            created: false,
        };

        while !segment.header().is_ready() {
            if Instant::now() >= deadline {
                return Err(BusError::NotReady(timeout));
            }
            thread::sleep(ATTACH_POLL);
        }
        segment.header().validate()?;

        info!(
            path = ?segment.path(),
            creator = segment.header().creator_pid(),
            "attached to shared bus segment"
        );
        Ok(segment)
    }

    /// Removes the named backing object. Processes that already mapped it
    /// keep their mapping; the next open creates a fresh segment.
    pub fn unlink(config: &BusConfig) -> Result<bool, BusError> {
        let path = config.segment_path()?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "removed shared bus segment");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(BusError::io(
                format!("failed to remove {}", path.display()),
                err,
            )),
        }
    }

    fn layout(&self) -> &SharedLayout {
        // SAFETY: the mapping is page aligned and exactly `SEGMENT_SIZE` bytes
        // long. Every field of `SharedLayout` is an atomic or a plain integer
        // for which any bit pattern is valid, and all mutation after
        // initialisation goes through atomics.
        unsafe { &*self.mmap.as_ptr().cast::<SharedLayout>() }
    }

    pub fn header(&self) -> &SegmentHeader {
        &self.layout().header
    }

    pub fn table(&self) -> &ChannelTable {
        &self.layout().table
    }

    /// Backing path of a named segment.
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Named { path, .. } => Some(path),
            Backing::Anonymous => None,
        }
    }

    /// Whether this handle initialised the segment rather than joining it.
    pub fn created(&self) -> bool {
        self.created
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        debug!(path = ?self.path(), "unmapping bus segment");
    }
}

fn map_file(file: &File, path: &Path) -> Result<MmapMut, BusError> {
    // SAFETY: the object is only ever resized by its creator before the
    // header is published, and never truncated while mapped.
    let mmap = unsafe { MmapOptions::new().len(SEGMENT_SIZE).map_mut(file) };
    mmap.map_err(|err| BusError::io(format!("failed to map {}", path.display()), err))
}

fn init_header(mmap: &mut MmapMut) {
    // SAFETY: the mapping is at least `SEGMENT_SIZE` bytes and page aligned,
    // and no other handle can see it as ready before `publish`.
    let header = unsafe { &mut *mmap.as_mut_ptr().cast::<SegmentHeader>() };
    header.init();
    header.publish();
}
