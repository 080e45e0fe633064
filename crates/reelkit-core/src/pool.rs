//! Process-wide size-class allocator for image/audio buffers (spec §4.2).
//!
//! One free-list per size class, guarded by its own lock so unrelated size
//! classes never contend. A request for a size with no matching class falls
//! straight through to the host heap — the pool only ever saves an
//! allocation, it never blocks one.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

struct ClassInner {
    size: usize,
    free: Vec<Vec<u8>>,
    high_watermark: usize,
    hits: u64,
    misses: u64,
}

struct PoolInner {
    classes: Vec<Mutex<ClassInner>>,
}

/// A handle to the shared pool. Cheap to clone; every clone shares the same
/// free-lists.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ClassStats {
    pub size: usize,
    pub available: usize,
    pub hits: u64,
    pub misses: u64,
}

impl Pool {
    /// Build a pool with one free-list per entry in `class_sizes`, each
    /// capped at `high_watermark` retained buffers before `release` starts
    /// dropping instead of retaining.
    pub fn new(class_sizes: &[usize], high_watermark: usize) -> Self {
        let mut sizes = class_sizes.to_vec();
        sizes.sort_unstable();
        sizes.dedup();
        let classes = sizes
            .into_iter()
            .map(|size| {
                Mutex::new(ClassInner { size, free: Vec::new(), high_watermark, hits: 0, misses: 0 })
            })
            .collect();
        Self { inner: Arc::new(PoolInner { classes }) }
    }

    fn class_for(&self, size: usize) -> Option<&Mutex<ClassInner>> {
        self.inner.classes.iter().find(|c| c.lock().size == size)
    }

    /// Allocate a zero-filled buffer of exactly `size` bytes, reusing a
    /// freed buffer from the matching size class when one is available.
    pub fn alloc(&self, size: usize) -> PooledBuffer {
        let Some(class) = self.class_for(size) else {
            return PooledBuffer { data: vec![0u8; size], pool: None, class_size: size };
        };
        let mut guard = class.lock();
        let buf = guard.free.pop();
        match &buf {
            Some(_) => guard.hits += 1,
            None => guard.misses += 1,
        }
        drop(guard);
        let mut data = buf.unwrap_or_else(|| vec![0u8; size]);
        data.resize(size, 0);
        PooledBuffer { data, pool: Some(Arc::downgrade(&self.inner)), class_size: size }
    }

    pub fn stats(&self) -> Vec<ClassStats> {
        self.inner
            .classes
            .iter()
            .map(|c| {
                let g = c.lock();
                ClassStats { size: g.size, available: g.free.len(), hits: g.hits, misses: g.misses }
            })
            .collect()
    }
}

/// A pool-backed byte buffer. Dropping it (i.e. running its destructor)
/// returns the storage to the pool's free-list, unless that class is already
/// at its watermark, in which case the buffer is simply freed.
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Option<Weak<PoolInner>>,
    class_size: usize,
}

impl PooledBuffer {
    /// A buffer not backed by any pool — the heap fallback path.
    pub fn heap(size: usize) -> Self {
        Self { data: vec![0u8; size], pool: None, class_size: size }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(weak) = self.pool.take() else { return };
        let Some(inner) = weak.upgrade() else { return };
        for class in &inner.classes {
            let mut guard = class.lock();
            if guard.size == self.class_size {
                if guard.free.len() < guard.high_watermark {
                    guard.free.push(std::mem::take(&mut self.data));
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_then_realloc_reuses_buffer() {
        let pool = Pool::new(&[1024], 4);
        {
            let _buf = pool.alloc(1024);
            assert_eq!(pool.stats()[0].misses, 1);
        }
        assert_eq!(pool.stats()[0].available, 1);
        let _buf2 = pool.alloc(1024);
        assert_eq!(pool.stats()[0].hits, 1);
    }

    #[test]
    fn size_with_no_class_falls_back_to_heap() {
        let pool = Pool::new(&[1024], 4);
        let buf = pool.alloc(77);
        assert_eq!(buf.len(), 77);
        drop(buf);
        // Nothing to have been retained anywhere; stats for 1024 unaffected.
        assert_eq!(pool.stats()[0].available, 0);
    }

    #[test]
    fn watermark_caps_retained_buffers() {
        let pool = Pool::new(&[64], 1);
        let a = pool.alloc(64);
        let b = pool.alloc(64);
        drop(a);
        drop(b);
        assert_eq!(pool.stats()[0].available, 1);
    }
}
