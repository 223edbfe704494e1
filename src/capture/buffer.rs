//! Buffer extraction for fd-backed PipeWire buffers
//!
//! MemPtr buffers (and MemFd buffers that PipeWire mapped for us because of
//! `MAP_BUFFERS`) are read in place. DMA-BUF and unmapped MemFd buffers only
//! carry a file descriptor; those are mapped read-only, copied out, and
//! unmapped again before the process callback returns.

use std::num::NonZeroUsize;
use std::os::fd::{BorrowedFd, RawFd};

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use tracing::{trace, warn};

use super::error::{CaptureError, Result};

/// Copy `size` bytes starting at `offset` out of an fd-backed buffer
pub(crate) fn copy_fd_buffer(fd: RawFd, size: usize, offset: usize) -> Result<Vec<u8>> {
    if fd < 0 {
        return Err(CaptureError::FrameExtractionFailed(format!(
            "buffer has no valid fd ({})",
            fd
        )));
    }

    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    let map_offset = (offset / page_size) * page_size;
    let data_offset = offset - map_offset;
    let map_size = NonZeroUsize::new(size + data_offset)
        .ok_or_else(|| CaptureError::FrameExtractionFailed("zero-sized buffer".to_string()))?;

    trace!(
        "mmap fd={} size={} offset={} map_offset={} map_size={}",
        fd,
        size,
        offset,
        map_offset,
        map_size
    );

    // SAFETY: the fd belongs to a PipeWire buffer that stays dequeued (and
    // therefore valid) for the whole process callback this runs in.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };

    // SAFETY: read-only shared mapping of a region PipeWire told us is at
    // least `offset + size` bytes long; unmapped below before returning.
    let addr = unsafe {
        mmap(
            None,
            map_size,
            ProtFlags::PROT_READ,
            MapFlags::MAP_SHARED,
            borrowed,
            map_offset as libc::off_t,
        )
    }
    .map_err(|e| CaptureError::FrameExtractionFailed(format!("mmap failed: {}", e)))?;

    // SAFETY: the mapping is `map_size` bytes and `data_offset + size == map_size`.
    let copied = unsafe {
        let start = (addr.as_ptr() as *const u8).add(data_offset);
        std::slice::from_raw_parts(start, size).to_vec()
    };

    // SAFETY: `addr`/`map_size` are exactly what mmap returned and requested.
    if let Err(e) = unsafe { munmap(addr, map_size.get()) } {
        warn!("munmap failed: {}", e);
    }

    Ok(copied)
}
