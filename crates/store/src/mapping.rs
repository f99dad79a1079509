//! File Byte Sources
//!
//! An open crate file reads its bytes either through a read-only
//! memory mapping (attached mode, values materialize lazily from the
//! mapping) or from an owned buffer (detached mode, no dependence on
//! the filesystem object after open). The file descriptor is closed in
//! both modes.

use crate::error::CrateError;
use std::path::Path as FsPath;

/// The bytes backing an open crate file.
pub(crate) enum ByteSource {
    #[cfg(unix)]
    Mapped(Mapping),
    Owned(Vec<u8>),
}

impl ByteSource {
    /// Open `path` attached (mapped) or detached (copied out).
    pub(crate) fn open(path: &FsPath, detached: bool) -> Result<ByteSource, CrateError> {
        if detached {
            return Ok(ByteSource::Owned(std::fs::read(path)?));
        }
        #[cfg(unix)]
        {
            Ok(ByteSource::Mapped(Mapping::open(path)?))
        }
        #[cfg(not(unix))]
        {
            Ok(ByteSource::Owned(std::fs::read(path)?))
        }
    }

    #[inline]
    pub(crate) fn bytes(&self) -> &[u8] {
        match self {
            #[cfg(unix)]
            ByteSource::Mapped(m) => m.as_slice(),
            ByteSource::Owned(v) => v,
        }
    }
}

/// A read-only memory mapping of a whole file.
#[cfg(unix)]
pub(crate) struct Mapping {
    ptr: *mut libc::c_void,
    len: usize,
}

// Safety: the mapping is read-only and never remapped; the pointer is
// valid for the lifetime of the Mapping.
#[cfg(unix)]
unsafe impl Send for Mapping {}
#[cfg(unix)]
unsafe impl Sync for Mapping {}

#[cfg(unix)]
impl Mapping {
    fn open(path: &FsPath) -> Result<Mapping, CrateError> {
        use std::os::unix::io::AsRawFd;

        let file = std::fs::File::open(path)?;
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            // mmap of length zero is an error; an empty file is just
            // an owned empty buffer's worth of corrupt input, but keep
            // the mapping type uniform.
            return Ok(Mapping {
                ptr: std::ptr::null_mut(),
                len: 0,
            });
        }
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(CrateError::Io(std::io::Error::last_os_error()));
        }
        // The descriptor can close now; the mapping keeps the bytes.
        drop(file);
        Ok(Mapping { ptr, len })
    }

    #[inline]
    fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }
}

#[cfg(unix)]
impl Drop for Mapping {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { libc::munmap(self.ptr, self.len) };
        }
    }
}
