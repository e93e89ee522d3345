// SPDX-License-Identifier: MPL-2.0

use crate::dirty;
use crate::error::Error;
use crate::hint::RegionHint;
use crate::region::{DmaAddr, Prot};
use crate::table::RegionTable;

/// A single scatter-gather entry produced by translation (spec.md §3).
///
/// `region_index` is stable for the lifetime of the region; `region_base`
/// is the region's base *at translation time*, kept alongside the index so
/// that [`crate::DmaController::unmap_sg`] can match on address rather than
/// on index (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SgEntry {
    pub region_index: usize,
    pub region_base: DmaAddr,
    pub offset: u64,
    pub length: u64,
    pub mappable: bool,
}

pub(crate) struct TranslateOutcome {
    pub(crate) entries: Vec<SgEntry>,
    pub(crate) hint: RegionHint,
}

/// Converts `[dma_addr, dma_addr+len)` into an ordered SG list.
///
/// Tries the fast path (a single region matching the caller's hint) first,
/// then falls back to a slow, address-ordered walk across adjacent
/// registered regions (spec.md §4.3; the walk is by address rather than by
/// table-slot order, per the REDESIGN FLAG in §9).
pub(crate) fn translate(
    table: &mut RegionTable,
    hint: Option<RegionHint>,
    dma_addr: DmaAddr,
    len: u64,
    max_sg: usize,
    prot: Prot,
    logging_page_size: Option<u64>,
) -> Result<TranslateOutcome, Error> {
    if len == 0 {
        return Err(Error::BadArg("len must be non-zero"));
    }
    if dma_addr.checked_add(len).is_none() {
        return Err(Error::BadArg("dma_addr + len overflows"));
    }

    if max_sg >= 1 {
        if let Some(h) = hint {
            if table
                .get(h.index)
                .is_some_and(|r| r.base == h.base && r.len == h.len)
            {
                let end = dma_addr + len;
                if dma_addr >= h.base && end <= h.base + h.len {
                    let entry =
                        build_entry(table, h.index, dma_addr, len, prot, logging_page_size)?;
                    return Ok(TranslateOutcome {
                        entries: vec![entry],
                        hint: h,
                    });
                }
            }
        }
    }

    slow_path(table, dma_addr, len, max_sg, prot, logging_page_size)
}

fn slow_path(
    table: &mut RegionTable,
    dma_addr: DmaAddr,
    len: u64,
    max_sg: usize,
    prot: Prot,
    logging_page_size: Option<u64>,
) -> Result<TranslateOutcome, Error> {
    let end = dma_addr + len;

    // Plan the walk over immutable borrows first: which region indices and
    // sub-ranges are needed, and whether the walk can even complete. Only
    // once that's settled do we take mutable borrows to build entries (and
    // mark dirty pages), so a `BadAddress`/`SgOverflow` never has
    // side effects.
    let mut plan: Vec<(usize, DmaAddr, u64)> = Vec::new();
    let mut pos = dma_addr;
    let mut cur_index = table.find_containing(dma_addr).ok_or(Error::BadAddress)?;
    loop {
        let region = table.get(cur_index).expect("planned index must exist");
        let seg_end = end.min(region.end());
        plan.push((cur_index, pos, seg_end - pos));
        pos = seg_end;
        if pos >= end {
            break;
        }
        cur_index = table.find_by_base(pos).ok_or(Error::BadAddress)?;
    }

    if plan.len() > max_sg {
        return Err(Error::SgOverflow(plan.len()));
    }

    let mut entries = Vec::with_capacity(plan.len());
    for (idx, seg_addr, seg_len) in &plan {
        entries.push(build_entry(
            table,
            *idx,
            *seg_addr,
            *seg_len,
            prot,
            logging_page_size,
        )?);
    }

    let last = entries.last().expect("slow path always emits >=1 entry");
    let region = table.get(last.region_index).expect("entry region exists");
    let hint = RegionHint {
        index: last.region_index,
        base: region.base,
        len: region.len,
    };
    Ok(TranslateOutcome { entries, hint })
}

/// Builds one SG entry and, for write-intent translations while logging is
/// active, marks the covered pages dirty — coupling translation with
/// logging is intentional (spec.md §4.3): a device may write through a
/// pointer obtained earlier without calling `map_sg` again, so marking at
/// translation time gives a safe upper bound on pages actually written.
fn build_entry(
    table: &mut RegionTable,
    region_index: usize,
    dma_addr: DmaAddr,
    len: u64,
    prot: Prot,
    logging_page_size: Option<u64>,
) -> Result<SgEntry, Error> {
    let region = table
        .get_mut(region_index)
        .expect("region_index came from a just-performed lookup");

    if prot.contains(Prot::WRITE) && !region.prot.contains(Prot::WRITE) {
        return Err(Error::ProtectionViolation);
    }

    let offset = dma_addr - region.base;
    let entry = SgEntry {
        region_index,
        region_base: region.base,
        offset,
        length: len,
        mappable: region.is_mappable(),
    };

    if prot.contains(Prot::WRITE) {
        if let Some(page_size) = logging_page_size {
            if page_size > 0 {
                dirty::mark(region, offset, len, page_size);
            }
        }
    }

    Ok(entry)
}
