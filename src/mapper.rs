// SPDX-License-Identifier: MPL-2.0

use std::num::NonZeroUsize;
use std::os::fd::BorrowedFd;
use std::ptr::NonNull;

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

/// Creates the host virtual mapping for a newly registered region.
///
/// Per spec.md §4.2, this always requests `PROT_READ | PROT_WRITE`
/// regardless of the region's declared `prot` — the declared mask is kept
/// separately and checked only at translation time (spec.md §4.3). A
/// failure here is not propagated as an error: the caller installs the
/// region unmappable and logs a warning, so that non-overlap accounting
/// and dirty tracking remain sound even when the host mapping could not be
/// created.
pub(crate) fn map_region(fd: BorrowedFd<'_>, len: u64, file_offset: u64) -> Option<usize> {
    let len = NonZeroUsize::new(len as usize)?;
    // Safety: `fd` is valid for the duration of this call and `file_offset`
    // is within the backing file per the caller's registration request.
    let result = unsafe {
        mmap(
            None,
            len,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            fd,
            file_offset as i64,
        )
    };
    match result {
        Ok(addr) => Some(addr.as_ptr() as usize),
        Err(errno) => {
            log::warn!("mmap of region failed, installing as unmappable: {errno}");
            None
        }
    }
}

/// Tears down a host virtual mapping created by [`map_region`].
pub(crate) fn unmap_region(addr: usize, len: u64) {
    let Some(ptr) = NonNull::new(addr as *mut core::ffi::c_void) else {
        return;
    };
    // Safety: `addr`/`len` were returned by a prior successful `map_region`
    // call with the same length, and this is only called once per region
    // (on removal or controller teardown), after its refcount reached zero.
    if let Err(errno) = unsafe { munmap(ptr, len as usize) } {
        log::warn!("munmap of region failed: {errno}");
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::os::fd::AsFd;

    use super::*;

    #[test]
    fn map_then_unmap_a_real_file() {
        let file = tempfile::tempfile().unwrap();
        file.set_len(0x1000).unwrap();

        let addr = map_region(file.as_fd(), 0x1000, 0).expect("mmap should succeed");
        assert_ne!(addr, 0);
        unmap_region(addr, 0x1000);
    }

    #[test]
    fn zero_length_mapping_is_rejected_before_the_syscall() {
        let file: File = tempfile::tempfile().unwrap();
        assert!(map_region(file.as_fd(), 0, 0).is_none());
    }
}
