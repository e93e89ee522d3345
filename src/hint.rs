// SPDX-License-Identifier: MPL-2.0

use std::cell::Cell;

use crate::region::DmaAddr;

/// The translator's fast-path hint (spec.md §4.3, §5, §9).
///
/// The hint is strictly per execution context: in a multi-threaded
/// embedding it is one hint per thread, in a single-threaded embedding one
/// hint total. It is advisory only — every use re-validates that the
/// hinted region still has the same base/length at the hinted index, so a
/// stale or shared hint can only cost a fast-path hit, never correctness
/// (spec.md §8, "Hint independence").
#[derive(Clone, Copy)]
pub(crate) struct RegionHint {
    pub(crate) index: usize,
    pub(crate) base: DmaAddr,
    pub(crate) len: u64,
}

thread_local! {
    static HINT: Cell<Option<RegionHint>> = const { Cell::new(None) };
}

pub(crate) fn get() -> Option<RegionHint> {
    HINT.with(|cell| cell.get())
}

pub(crate) fn set(hint: RegionHint) {
    HINT.with(|cell| cell.set(Some(hint)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips_on_the_same_thread() {
        set(RegionHint {
            index: 3,
            base: 0x4000,
            len: 0x1000,
        });
        let hint = get().expect("hint was just set");
        assert_eq!(hint.index, 3);
        assert_eq!(hint.base, 0x4000);
        assert_eq!(hint.len, 0x1000);
    }

    #[test]
    fn fresh_thread_has_no_hint() {
        std::thread::spawn(|| {
            assert!(get().is_none());
        })
        .join()
        .unwrap();
    }
}
