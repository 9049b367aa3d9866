use std::fs::{File, OpenOptions};
use std::io::BufReader;
use std::path::Path;

use memmap2::{Mmap, MmapMut};

use crate::error::{PeError, Result};

bitflags::bitflags! {
    /// Options accepted by [`Mapping::load`]. Unknown bits are ignored.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct LoadOptions: u8 {
        /// Map the file read/write instead of read-only.
        const OPEN_RW = 0b0000_0001;
        /// Retain a buffered file handle after the mapping is established.
        const NOCLOSE_FD = 0b0000_0010;
    }
}

enum MapData {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
    #[cfg(test)]
    Owned(Vec<u8>),
}

impl MapData {
    fn as_slice(&self) -> &[u8] {
        match self {
            MapData::ReadOnly(m) => &m[..],
            MapData::ReadWrite(m) => &m[..],
            #[cfg(test)]
            MapData::Owned(v) => &v[..],
        }
    }
}

/// The mapping layer: a read-only or read/write view of an entire file,
/// plus the bounds-check primitive every other component is built on.
pub struct Mapping {
    data: MapData,
    /// Retained only when [`LoadOptions::NOCLOSE_FD`] was requested.
    stream: Option<BufReader<File>>,
}

impl Mapping {
    /// Opens `path`, validates it is a regular file, and maps it entirely
    /// into memory.
    pub fn load(path: &Path, options: LoadOptions) -> Result<Self> {
        let rw = options.contains(LoadOptions::OPEN_RW);

        let file = OpenOptions::new()
            .read(true)
            .write(rw)
            .open(path)
            .map_err(PeError::OpenFailed)?;

        let metadata = file.metadata().map_err(PeError::FstatFailed)?;
        if !metadata.is_file() {
            return Err(PeError::NotAFile);
        }

        let data = if rw {
            // SAFETY: the file is held open for the lifetime of the mapping
            // and the caller accepted write semantics via `OPEN_RW`.
            let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(PeError::MmapFailed)?;
            MapData::ReadWrite(mmap)
        } else {
            // SAFETY: standard memmap2 precondition — the file must not be
            // truncated by another process while mapped; the core does not
            // guard against that.
            let mmap = unsafe { Mmap::map(&file) }.map_err(PeError::MmapFailed)?;
            MapData::ReadOnly(mmap)
        };

        // Advisory only; a failure here is not fatal.
        match &data {
            MapData::ReadOnly(m) => {
                let _ = m.advise(memmap2::Advice::Sequential);
            }
            MapData::ReadWrite(m) => {
                let _ = m.advise(memmap2::Advice::Sequential);
            }
        }

        let stream = if options.contains(LoadOptions::NOCLOSE_FD) {
            let dup = file.try_clone().map_err(PeError::FdopenFailed)?;
            Some(BufReader::new(dup))
        } else {
            None
        };

        let size = data.as_slice().len();
        tracing::debug!(path = %path.display(), size, rw, "mapped file");

        Ok(Mapping { data, stream })
    }

    pub fn is_loaded(&self) -> bool {
        !self.data.as_slice().is_empty()
    }

    pub fn file_size(&self) -> u64 {
        self.data.as_slice().len() as u64
    }

    /// Tests whether `[ptr, ptr+len)` lies wholly inside the mapping.
    pub fn contains(&self, ptr: usize, len: usize) -> bool {
        let end = match ptr.checked_add(len) {
            Some(e) => e,
            None => return false,
        };
        end <= self.data.as_slice().len()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// Returns the byte range `[offset, offset+len)` if it is wholly
    /// contained in the mapping, `None` otherwise. This is the primitive
    /// every struct decoder in `headers.rs` is built on.
    pub fn slice(&self, offset: usize, len: usize) -> Option<&[u8]> {
        if !self.contains(offset, len) {
            return None;
        }
        Some(&self.as_slice()[offset..offset + len])
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.data, MapData::ReadWrite(_))
    }

    /// Mutable access to the mapping, available only when opened with
    /// [`LoadOptions::OPEN_RW`].
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match &mut self.data {
            MapData::ReadWrite(m) => Some(&mut m[..]),
            MapData::ReadOnly(_) => None,
        }
    }

    pub fn has_retained_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Wraps an in-memory buffer as a mapping, bypassing file I/O. Used by
    /// unit tests that exercise parsing/translation logic against
    /// hand-built byte layouts.
    #[cfg(test)]
    pub(crate) fn from_bytes(data: Vec<u8>) -> Self {
        Mapping {
            data: MapData::Owned(data),
            stream: None,
        }
    }
}
