// SPDX-License-Identifier: MPL-2.0

use std::os::fd::{AsFd, OwnedFd};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::dirty::{self, DirtyBitmap};
use crate::error::Error;
use crate::hint;
use crate::map::{self, IoVec};
use crate::mapper;
use crate::region::{DmaAddr, Prot, Region};
use crate::table::RegionTable;
use crate::translate::{self, SgEntry};

/// The DMA controller: a registry of non-overlapping guest-address-space
/// regions, an address translator, a map/unmap pinning layer, and a
/// dirty-page tracker, composed exactly as described in spec.md §2.
///
/// `Ctx` is an opaque handle the embedder can stash here and retrieve with
/// [`DmaController::context`] — this crate never inspects it, it only
/// relays it upward, mirroring the `external_ctx` parameter of spec.md
/// §4.1's `create`.
///
/// The controller itself does no internal locking (spec.md §5): mutating
/// operations (`add_region`, `remove_region`, `start_logging`,
/// `stop_logging`, `get_dirty_bitmap`) must be serialized by the caller.
/// Translation and map/unmap may run concurrently with each other (but not
/// with a mutating operation in flight) because the only field they touch,
/// a region's refcount, is an atomic.
pub struct DmaController<Ctx = ()> {
    ctx: Ctx,
    table: RegionTable,
    logging_page_size: Option<u64>,
}

impl<Ctx> DmaController<Ctx> {
    /// Creates an empty controller with room for `max_regions` regions.
    pub fn new(ctx: Ctx, max_regions: usize) -> Self {
        Self {
            ctx,
            table: RegionTable::new(max_regions),
            logging_page_size: None,
        }
    }

    /// The opaque context this controller was created with.
    pub fn context(&self) -> &Ctx {
        &self.ctx
    }

    /// Registers `fd[file_offset, file_offset+size)` as DMA address range
    /// `[dma_addr, dma_addr+size)` (spec.md §4.1).
    ///
    /// Takes ownership of `fd`: it is closed when the region is removed or
    /// the controller is dropped. If the host mmap fails, the region is
    /// still installed — unmappable — so that non-overlap accounting and
    /// dirty tracking remain sound (spec.md §4.2); only a later `map_sg`
    /// against it will fail, with [`Error::NoHostMapping`].
    pub fn add_region(
        &mut self,
        dma_addr: DmaAddr,
        size: u64,
        fd: OwnedFd,
        file_offset: u64,
        prot: Prot,
    ) -> Result<usize, Error> {
        if size == 0 {
            return Err(Error::BadArg("size must be non-zero"));
        }
        if dma_addr.checked_add(size).is_none() {
            return Err(Error::BadArg("dma_addr + size overflows"));
        }
        if let Some(conflict) = self.table.find_overlap(dma_addr, size) {
            return Err(Error::OverlapAt(conflict));
        }
        if !self.table.has_capacity() {
            return Err(Error::NoSpace);
        }

        let host_vaddr = mapper::map_region(fd.as_fd(), size, file_offset);
        if host_vaddr.is_none() {
            log::warn!(
                "region [{dma_addr:#x}, {:#x}) registered without a host mapping",
                dma_addr + size
            );
        }

        let dirty_bitmap = self
            .logging_page_size
            .map(|page_size| dirty::new_bitmap(page_size, size));

        let region = Region {
            base: dma_addr,
            len: size,
            host_fd: fd,
            file_offset,
            prot,
            host_vaddr,
            refcount: AtomicU32::new(0),
            dirty_bitmap,
        };

        let index = self
            .table
            .insert(region)
            .expect("capacity was just checked under the same, unsynchronized-caller serialization");
        log::debug!("registered region {index} at [{dma_addr:#x}, {:#x})", dma_addr + size);
        Ok(index)
    }

    /// Unregisters the region occupying exactly `[dma_addr, dma_addr+size)`
    /// (spec.md §4.1).
    ///
    /// If the region's refcount is non-zero, `on_busy` is invoked once
    /// with the region (the source's idiom for "caller, please quiesce and
    /// retry") and this returns [`Error::Busy`] without side effects.
    pub fn remove_region(
        &mut self,
        dma_addr: DmaAddr,
        size: u64,
        on_busy: impl FnOnce(&Region),
    ) -> Result<(), Error> {
        let index = self.table.find_exact(dma_addr, size).ok_or(Error::NotFound)?;
        let region = self.table.get(index).expect("index came from find_exact");

        let refcount = region.refcount.load(Ordering::Acquire);
        if refcount > 0 {
            log::debug!("remove_region([{dma_addr:#x}, +{size:#x})) blocked, refcount={refcount}");
            on_busy(region);
            return Err(Error::Busy(refcount));
        }

        let region = self.table.remove(index).expect("index came from find_exact");
        if let Some(host_vaddr) = region.host_vaddr {
            mapper::unmap_region(host_vaddr, region.len);
        }
        log::debug!("removed region {index} at [{dma_addr:#x}, +{size:#x})");
        Ok(())
    }

    /// Unmaps and frees every region, bypassing the refcount check. Safe
    /// only during teardown (spec.md §4.1) — called by [`Drop`].
    pub fn remove_all_regions(&mut self) {
        let indices: Vec<usize> = self.table.iter().map(|(index, _)| index).collect();
        for index in indices {
            if let Some(region) = self.table.remove(index) {
                if let Some(host_vaddr) = region.host_vaddr {
                    mapper::unmap_region(host_vaddr, region.len);
                }
            }
        }
    }

    /// Translates `[dma_addr, dma_addr+len)` into an ordered SG list
    /// (spec.md §4.3).
    ///
    /// Returns at most `max_sg` entries; if more would be needed, fails
    /// with [`Error::SgOverflow`] carrying the count actually required, so
    /// the caller can grow its buffer and retry.
    pub fn addr_to_sg(
        &mut self,
        dma_addr: DmaAddr,
        len: u64,
        max_sg: usize,
        prot: Prot,
    ) -> Result<Vec<SgEntry>, Error> {
        let outcome = translate::translate(
            &mut self.table,
            hint::get(),
            dma_addr,
            len,
            max_sg,
            prot,
            self.logging_page_size,
        )?;
        hint::set(outcome.hint);
        Ok(outcome.entries)
    }

    /// Pins every region `sgs` references and returns the corresponding
    /// host iovecs (spec.md §4.4).
    pub fn map_sg(&self, sgs: &[SgEntry]) -> Result<Vec<IoVec>, Error> {
        map::map_sg(&self.table, sgs)
    }

    /// Unpins every region `sgs` references (spec.md §4.4).
    pub fn unmap_sg(&self, sgs: &[SgEntry]) {
        map::unmap_sg(&self.table, sgs)
    }

    /// Starts dirty-page logging at `page_size` granularity (spec.md §4.5).
    pub fn start_logging(&mut self, page_size: u64) -> Result<(), Error> {
        if self.logging_page_size.is_some() {
            return Err(Error::AlreadyLogging);
        }
        if page_size == 0 || !page_size.is_power_of_two() {
            return Err(Error::BadArg("page_size must be a positive power of two"));
        }
        dirty::start_logging(&mut self.table, page_size);
        self.logging_page_size = Some(page_size);
        log::info!("dirty-page logging started, page_size={page_size:#x}");
        Ok(())
    }

    /// Stops dirty-page logging and frees every region's bitmap.
    pub fn stop_logging(&mut self) -> Result<(), Error> {
        if self.logging_page_size.is_none() {
            return Err(Error::NotLogging);
        }
        dirty::stop_logging(&mut self.table);
        self.logging_page_size = None;
        log::info!("dirty-page logging stopped");
        Ok(())
    }

    /// Returns a clear-on-read snapshot of the dirty bitmap for the region
    /// occupying exactly `[dma_addr, dma_addr+len)` (spec.md §4.5).
    pub fn get_dirty_bitmap(
        &mut self,
        dma_addr: DmaAddr,
        len: u64,
        page_size: u64,
        out_buf_size: usize,
    ) -> Result<DirtyBitmap, Error> {
        dirty::snapshot(
            &mut self.table,
            self.logging_page_size,
            dma_addr,
            len,
            page_size,
            out_buf_size,
        )
    }

    /// Looks up a region by its stable index (read-only introspection; not
    /// part of spec.md §6, added per `SPEC_FULL.md` §4).
    pub fn region(&self, index: usize) -> Option<&Region> {
        self.table.get(index)
    }

    /// Iterates all currently registered regions in table order.
    pub fn regions(&self) -> impl Iterator<Item = (usize, &Region)> {
        self.table.iter()
    }
}

impl<Ctx> Drop for DmaController<Ctx> {
    fn drop(&mut self) {
        self.remove_all_regions();
    }
}
