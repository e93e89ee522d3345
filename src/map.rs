// SPDX-License-Identifier: MPL-2.0

use std::sync::atomic::Ordering;

use crate::error::Error;
use crate::table::RegionTable;
use crate::translate::SgEntry;

/// A host pointer/length pair, materialized from an [`SgEntry`] by
/// `map_sg`. The address is kept as a `usize` rather than a raw pointer so
/// that [`IoVec`] stays `Send`/`Sync`-friendly; dereferencing it is the
/// caller's responsibility (spec.md §9, "Pointer arithmetic on mapped
/// regions").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoVec {
    pub addr: usize,
    pub len: u64,
}

/// Pins every region an SG entry references (incrementing its refcount)
/// and materializes the corresponding host iovecs (spec.md §4.4).
///
/// On error, entries already processed stay pinned: the caller is
/// expected to call `unmap_sg` with the same SG list to balance them,
/// which is safe because `unmap_sg` silently skips entries whose region no
/// longer exists and never decrements a refcount below zero.
pub(crate) fn map_sg(table: &RegionTable, sgs: &[SgEntry]) -> Result<Vec<IoVec>, Error> {
    let mut iovs = Vec::with_capacity(sgs.len());
    for sg in sgs {
        let region = table
            .get(sg.region_index)
            .ok_or(Error::BadArg("sg entry references an unknown region"))?;
        let Some(host_vaddr) = region.host_vaddr else {
            return Err(Error::NoHostMapping(sg.region_index));
        };
        region.refcount.fetch_add(1, Ordering::AcqRel);
        iovs.push(IoVec {
            addr: host_vaddr + sg.offset as usize,
            len: sg.length,
        });
    }
    Ok(iovs)
}

/// Unpins every region an SG entry references. Matches regions by
/// `region_base` rather than `region_index` (spec.md §4.4) and skips
/// silently if no region currently occupies that base.
pub(crate) fn unmap_sg(table: &RegionTable, sgs: &[SgEntry]) {
    for sg in sgs {
        let Some(index) = table.find_by_base(sg.region_base) else {
            continue;
        };
        let region = table.get(index).expect("index came from find_by_base");
        let _ = region
            .refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            });
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::os::fd::AsFd;
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::region::{DmaAddr, Prot, Region};

    fn mapped_region(base: DmaAddr, len: u64) -> Region {
        let file = tempfile::tempfile().unwrap();
        file.set_len(len).unwrap();
        let host_vaddr = crate::mapper::map_region(file.as_fd(), len, 0);
        let fd: std::os::fd::OwnedFd = File::from(file).into();
        Region {
            base,
            len,
            host_fd: fd,
            file_offset: 0,
            prot: Prot::READ | Prot::WRITE,
            host_vaddr,
            refcount: AtomicU32::new(0),
            dirty_bitmap: None,
        }
    }

    #[test]
    fn map_sg_increments_refcount_and_offsets_the_host_pointer() {
        let mut table = RegionTable::new(4);
        let index = table.insert(mapped_region(0, 0x1000)).unwrap();
        let region = table.get(index).unwrap();
        let base_vaddr = region.host_vaddr.unwrap();

        let sgs = [SgEntry {
            region_index: index,
            region_base: 0,
            offset: 0x100,
            length: 0x10,
            mappable: true,
        }];
        let iovs = map_sg(&table, &sgs).unwrap();
        assert_eq!(iovs.len(), 1);
        assert_eq!(iovs[0].addr, base_vaddr + 0x100);
        assert_eq!(table.get(index).unwrap().refcount(), 1);

        unmap_sg(&table, &sgs);
        assert_eq!(table.get(index).unwrap().refcount(), 0);
    }

    #[test]
    fn unmap_sg_on_an_unknown_base_is_a_silent_no_op() {
        let table = RegionTable::new(4);
        let sgs = [SgEntry {
            region_index: 0,
            region_base: 0xdead,
            offset: 0,
            length: 0x10,
            mappable: true,
        }];
        unmap_sg(&table, &sgs);
    }

    #[test]
    fn map_sg_rejects_an_unmappable_region() {
        let mut table = RegionTable::new(4);
        let mut region = mapped_region(0, 0x1000);
        region.host_vaddr = None;
        let index = table.insert(region).unwrap();

        let sgs = [SgEntry {
            region_index: index,
            region_base: 0,
            offset: 0,
            length: 0x10,
            mappable: false,
        }];
        let err = map_sg(&table, &sgs).unwrap_err();
        assert!(matches!(err, Error::NoHostMapping(i) if i == index));
    }
}
