//! SMP slice runner (spec §5): partitions an image's rows into `jobs`
//! contiguous bands and invokes `slice_fn(id, index, jobs)` for each band
//! on a worker pool. Slice workers never call back into the service
//! graph — they only see the row range they own.

use rayon::prelude::*;

/// One contiguous row range `[start, end)` of an image of `height` rows,
/// the `index`-th of `jobs` roughly-equal bands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slice {
    pub index: usize,
    pub jobs: usize,
    pub start: u32,
    pub end: u32,
}

/// Split `height` rows into `jobs` contiguous, non-overlapping bands. The
/// last band absorbs any remainder so every row is covered exactly once.
pub fn plan(height: u32, jobs: usize) -> Vec<Slice> {
    let jobs = jobs.max(1).min(height.max(1) as usize);
    let base = height / jobs as u32;
    let remainder = height % jobs as u32;
    let mut start = 0;
    (0..jobs)
        .map(|index| {
            let len = base + if (index as u32) < remainder { 1 } else { 0 };
            let end = start + len;
            let slice = Slice { index, jobs, start, end };
            start = end;
            slice
        })
        .collect()
}

/// Run `slice_fn` over every band of `height` rows on the global rayon
/// pool. `slice_fn` must be safe to call concurrently with distinct,
/// non-overlapping `Slice` values — it owns only the rows its `Slice`
/// names.
pub fn run_slices(height: u32, jobs: usize, slice_fn: impl Fn(Slice) + Sync) {
    plan(height, jobs).into_par_iter().for_each(|slice| slice_fn(slice));
}

/// Like [`run_slices`], but hands each worker its own disjoint, writable
/// row band of `buf` (a row-major buffer of `height` equal-length rows)
/// instead of leaving it to look one up itself.
pub fn run_slices_mut<T: Send>(buf: &mut [T], height: u32, jobs: usize, slice_fn: impl Fn(Slice, &mut [T]) + Sync) {
    if height == 0 {
        return;
    }
    let row_len = buf.len() / height as usize;
    let slices = plan(height, jobs);
    let mut rest = buf;
    let mut bands = Vec::with_capacity(slices.len());
    for s in &slices {
        let rows = (s.end - s.start) as usize;
        let (head, tail) = rest.split_at_mut(rows * row_len);
        bands.push(head);
        rest = tail;
    }
    slices.into_par_iter().zip(bands).for_each(|(s, band)| slice_fn(s, band));
}
