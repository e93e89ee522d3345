// SPDX-License-Identifier: MPL-2.0

/// The error kinds this crate can surface.
///
/// Nothing is retried internally; every variant here is returned straight
/// to the caller. A failed `mmap` at registration is deliberately *not*
/// one of these — the region is still installed unmappable so that
/// non-overlap accounting and dirty tracking stay sound (see
/// [`crate::DmaController::add_region`]).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// `add_region` overlapped an existing region, given by its index.
    #[error("region overlaps existing region {0}")]
    OverlapAt(usize),

    /// The region table is full.
    #[error("region table is full")]
    NoSpace,

    /// `remove_region` or `get_dirty_bitmap` found no region matching the
    /// requested exact range.
    #[error("no region registered for the requested range")]
    NotFound,

    /// `remove_region` was blocked by a non-zero refcount; the registered
    /// callback (if any) has already been invoked once.
    #[error("region is still referenced by {0} outstanding mapping(s)")]
    Busy(u32),

    /// Translation could not cover the requested range with registered,
    /// adjacent regions.
    #[error("no registered region covers the requested address range")]
    BadAddress,

    /// A write-intent translation targeted a region without `WRITE`
    /// permission.
    #[error("write access requested on a region without write permission")]
    ProtectionViolation,

    /// `map_sg` was attempted on a region whose host mapping failed at
    /// registration time.
    #[error("region {0} has no host mapping")]
    NoHostMapping(usize),

    /// The caller's SG buffer was too small; carries the number of entries
    /// that would have been required.
    #[error("SG buffer too small, {0} entries needed")]
    SgOverflow(usize),

    /// The caller's dirty-bitmap output buffer was too small; carries the
    /// number of bytes that would have been required.
    #[error("dirty bitmap buffer too small, {0} bytes needed")]
    BufferTooSmall(usize),

    /// `get_dirty_bitmap`/`stop_logging` called while logging is not active.
    #[error("dirty-page logging is not active")]
    NotLogging,

    /// `start_logging` called while logging is already active.
    #[error("dirty-page logging is already active")]
    AlreadyLogging,

    /// A precondition was violated: zero size, a wrapping address range, a
    /// non-power-of-two page size, or a page-size/buffer-size mismatch.
    #[error("invalid argument: {0}")]
    BadArg(&'static str),
}
