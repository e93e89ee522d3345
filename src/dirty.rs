// SPDX-License-Identifier: MPL-2.0

use bitvec::order::Lsb0;
use bitvec::vec::BitVec;

use crate::error::Error;
use crate::region::{DmaAddr, Region};
use crate::table::RegionTable;

/// A snapshot of a region's dirty-page bitmap, as returned by
/// [`crate::DmaController::get_dirty_bitmap`].
///
/// Bit `i` represents page `i` of the region (`[base + i*page_size,
/// base + (i+1)*page_size)`), LSB-first within each byte — exactly
/// [`bitvec`]'s `Lsb0` order, so `as_bytes` is already in the wire format
/// spec.md §6 describes.
#[derive(Debug, Clone)]
pub struct DirtyBitmap {
    bits: BitVec<u8, Lsb0>,
}

impl DirtyBitmap {
    /// Number of page-bits in this snapshot.
    pub fn len_pages(&self) -> usize {
        self.bits.len()
    }

    /// Whether `page` was dirtied since the previous snapshot (or since
    /// logging started, for the first snapshot).
    pub fn is_dirty(&self, page: usize) -> bool {
        self.bits[page]
    }

    /// The snapshot, byte-packed LSB-first — ready to hand to a caller's
    /// `out_ptr` buffer.
    pub fn as_bytes(&self) -> &[u8] {
        self.bits.as_raw_slice()
    }
}

pub(crate) fn bits_for_len(len: u64, page_size: u64) -> usize {
    len.div_ceil(page_size) as usize
}

pub(crate) fn new_bitmap(page_size: u64, len: u64) -> BitVec<u8, Lsb0> {
    BitVec::repeat(false, bits_for_len(len, page_size))
}

fn bytes_for_bits(bits: usize) -> usize {
    bits.div_ceil(8)
}

/// Marks pages `[offset, offset+length)` dirty on `region`. A no-op if the
/// region has no bitmap — logging is not active, so the caller never
/// reaches here with a write-intent translation in the first place.
pub(crate) fn mark(region: &mut Region, offset: u64, length: u64, page_size: u64) {
    let Some(bitmap) = region.dirty_bitmap.as_mut() else {
        return;
    };
    if length == 0 {
        return;
    }
    let start = (offset / page_size) as usize;
    let end = ((offset + length - 1) / page_size) as usize;
    for page in start..=end {
        bitmap.set(page, true);
    }
}

/// Allocates a zeroed dirty bitmap for every currently registered region,
/// sized for `page_size`. Regions registered afterward get their own
/// bitmap at `add_region` time (see `DmaController::add_region`), so
/// tracking stays precise regardless of registration order relative to
/// `start_logging`.
pub(crate) fn start_logging(table: &mut RegionTable, page_size: u64) {
    for (_, region) in table.iter_mut() {
        let bits = bits_for_len(region.len, page_size);
        region.dirty_bitmap = Some(BitVec::repeat(false, bits));
    }
}

pub(crate) fn stop_logging(table: &mut RegionTable) {
    for (_, region) in table.iter_mut() {
        region.dirty_bitmap = None;
    }
}

/// Implements `get_dirty_bitmap` (spec.md §4.5): validates the requested
/// range, page size, and buffer size, then returns a clear-on-read
/// snapshot. Between two consecutive calls, a bit set in the second
/// denotes a write that happened in between.
pub(crate) fn snapshot(
    table: &mut RegionTable,
    active_page_size: Option<u64>,
    base: DmaAddr,
    len: u64,
    requested_page_size: u64,
    out_buf_size: usize,
) -> Result<DirtyBitmap, Error> {
    let Some(active_page_size) = active_page_size else {
        return Err(Error::NotLogging);
    };
    if requested_page_size != active_page_size {
        return Err(Error::BadArg("page_size does not match active logging granularity"));
    }

    let index = table.find_exact(base, len).ok_or(Error::NotFound)?;
    let region = table.get_mut(index).expect("index came from find_exact");

    let bits = bits_for_len(len, requested_page_size);
    let required_bytes = bytes_for_bits(bits);
    if out_buf_size < required_bytes {
        return Err(Error::BufferTooSmall(required_bytes));
    }

    // `add_region` always allocates a bitmap while logging is active (see
    // `DmaController::add_region`), so every region reachable here has one
    // regardless of whether it was registered before or after
    // `start_logging` — tracking is precise from registration onward, not
    // an "all dirty" estimate.
    let live = region
        .dirty_bitmap
        .as_mut()
        .expect("region has a bitmap whenever logging is active");
    let mut snap = live.clone();
    snap.truncate(bits);
    snap.resize(bits, false);
    live.fill(false);

    Ok(DirtyBitmap { bits: snap })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_for_len_rounds_up() {
        assert_eq!(bits_for_len(0x1000, 0x1000), 1);
        assert_eq!(bits_for_len(0x1001, 0x1000), 2);
        assert_eq!(bits_for_len(0x4000, 0x1000), 4);
    }

    #[test]
    fn bytes_for_bits_rounds_up() {
        assert_eq!(bytes_for_bits(1), 1);
        assert_eq!(bytes_for_bits(8), 1);
        assert_eq!(bytes_for_bits(9), 2);
    }

    #[test]
    fn mark_sets_every_page_a_range_straddles() {
        let fd: std::os::fd::OwnedFd =
            std::fs::File::from(tempfile::tempfile().unwrap()).into();
        let mut region = Region {
            base: 0,
            len: 0x4000,
            host_fd: fd,
            file_offset: 0,
            prot: crate::region::Prot::READ | crate::region::Prot::WRITE,
            host_vaddr: None,
            refcount: std::sync::atomic::AtomicU32::new(0),
            dirty_bitmap: Some(new_bitmap(0x1000, 0x4000)),
        };

        mark(&mut region, 0x0F00, 0x200, 0x1000);
        let bitmap = region.dirty_bitmap.as_ref().unwrap();
        assert!(bitmap[0]);
        assert!(bitmap[1]);
        assert!(!bitmap[2]);
        assert!(!bitmap[3]);
    }

    #[test]
    fn mark_is_a_no_op_without_a_bitmap() {
        let fd: std::os::fd::OwnedFd =
            std::fs::File::from(tempfile::tempfile().unwrap()).into();
        let mut region = Region {
            base: 0,
            len: 0x1000,
            host_fd: fd,
            file_offset: 0,
            prot: crate::region::Prot::READ | crate::region::Prot::WRITE,
            host_vaddr: None,
            refcount: std::sync::atomic::AtomicU32::new(0),
            dirty_bitmap: None,
        };
        mark(&mut region, 0, 0x100, 0x1000);
        assert!(region.dirty_bitmap.is_none());
    }
}
