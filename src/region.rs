// SPDX-License-Identifier: MPL-2.0

use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicU32, Ordering};

use bitvec::order::Lsb0;
use bitvec::vec::BitVec;

/// An address in the guest's DMA address space.
pub type DmaAddr = u64;

bitflags::bitflags! {
    /// Host-access intents permitted on, or requested against, a region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Prot: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXEC = 0b100;
    }
}

/// A registered span of DMA address space backed by a host file descriptor.
///
/// See the crate-level invariants in `spec.md` §3: regions in a
/// [`crate::DmaController`] are pairwise non-overlapping, and a region with
/// `refcount > 0` may not be removed.
#[derive(Debug)]
pub struct Region {
    pub(crate) base: DmaAddr,
    pub(crate) len: u64,
    pub(crate) host_fd: OwnedFd,
    pub(crate) file_offset: u64,
    pub(crate) prot: Prot,
    /// The host virtual address `base` is mapped to, or `None` if the
    /// region is unmappable (mmap failed at registration).
    pub(crate) host_vaddr: Option<usize>,
    /// Outstanding `map_sg` references. Mutated concurrently with
    /// translation/mapping, hence atomic; every other field here is only
    /// ever touched under the caller's own serialization of mutating ops.
    pub(crate) refcount: AtomicU32,
    /// Present iff dirty-page logging was active when this region was
    /// registered. See [`crate::DirtyBitmap`].
    pub(crate) dirty_bitmap: Option<BitVec<u8, Lsb0>>,
}

impl Region {
    /// The start of this region's interval in DMA address space.
    pub fn base(&self) -> DmaAddr {
        self.base
    }

    /// The length, in bytes, of this region.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// The exclusive end of this region's interval (`base + len`).
    pub fn end(&self) -> DmaAddr {
        self.base + self.len
    }

    /// The access permissions this region was registered with.
    pub fn prot(&self) -> Prot {
        self.prot
    }

    /// The byte offset into [`Self::host_fd`] at which `base` begins.
    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }

    /// Whether host mmap succeeded at registration; if not, translations
    /// still succeed but `map_sg` fails with [`crate::Error::NoHostMapping`].
    pub fn is_mappable(&self) -> bool {
        self.host_vaddr.is_some()
    }

    /// The number of outstanding `map_sg` references into this region.
    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    pub(crate) fn contains(&self, addr: DmaAddr) -> bool {
        addr >= self.base && addr < self.end()
    }

    pub(crate) fn overlaps(&self, other_base: DmaAddr, other_len: u64) -> bool {
        let other_end = other_base + other_len;
        self.base < other_end && other_base < self.end()
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use super::*;

    fn region(base: DmaAddr, len: u64) -> Region {
        let fd: OwnedFd = File::from(tempfile::tempfile().unwrap()).into();
        Region {
            base,
            len,
            host_fd: fd,
            file_offset: 0,
            prot: Prot::READ,
            host_vaddr: None,
            refcount: AtomicU32::new(0),
            dirty_bitmap: None,
        }
    }

    #[test]
    fn contains_is_half_open() {
        let r = region(0x1000, 0x1000);
        assert!(!r.contains(0x0FFF));
        assert!(r.contains(0x1000));
        assert!(r.contains(0x1FFF));
        assert!(!r.contains(0x2000));
    }

    #[test]
    fn adjacent_regions_do_not_overlap() {
        let r = region(0x1000, 0x1000);
        assert!(!r.overlaps(0x2000, 0x1000));
        assert!(!r.overlaps(0x0000, 0x1000));
        assert!(r.overlaps(0x1800, 0x1000));
        assert!(r.overlaps(0x0800, 0x1000));
    }

    #[test]
    fn prot_bits_compose() {
        let rw = Prot::READ | Prot::WRITE;
        assert!(rw.contains(Prot::READ));
        assert!(rw.contains(Prot::WRITE));
        assert!(!rw.contains(Prot::EXEC));
    }
}
