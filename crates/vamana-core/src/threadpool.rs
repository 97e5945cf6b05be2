//! Pluggable thread-pool handle (§5): interchangeable between a
//! single-threaded backend, a fixed-size `rayon` worker pool, and a
//! cooperative/growable pool. All three expose the same `parallel_for`
//! contract so callers never branch on which backend is installed.

use rayon::ThreadPool as RayonPool;
use std::sync::Arc;

/// A partitioning strategy for splitting an integer range across workers.
#[derive(Debug, Clone, Copy)]
pub enum Partition {
    /// One contiguous chunk per worker, split as evenly as possible.
    StaticEvenSplit,
    /// Fixed-size chunks, handed out in order.
    StaticBlockSize(usize),
    /// Fixed-size chunks, handed out via work-stealing (rayon's default).
    DynamicBlockSize(usize),
}

/// A handle to one of the three interchangeable scheduling backends.
#[derive(Clone)]
pub enum ThreadPoolHandle {
    /// Runs everything on the calling thread. Used for small indexes,
    /// tests, and deterministic debugging.
    Sequential,
    /// A fixed-size `rayon` pool.
    Fixed(Arc<RayonPool>),
    /// A cooperative pool whose worker count may change between calls;
    /// realized as a `rayon` pool behind a lock so `resize` can swap it.
    Cooperative(Arc<parking_lot::RwLock<Arc<RayonPool>>>),
}

impl std::fmt::Debug for ThreadPoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "ThreadPoolHandle::Sequential"),
            Self::Fixed(p) => write!(f, "ThreadPoolHandle::Fixed({})", p.current_num_threads()),
            Self::Cooperative(p) => write!(
                f,
                "ThreadPoolHandle::Cooperative({})",
                p.read().current_num_threads()
            ),
        }
    }
}

impl ThreadPoolHandle {
    #[must_use]
    pub fn sequential() -> Self {
        Self::Sequential
    }

    /// Builds a fixed-size pool with `num_threads` workers.
    ///
    /// # Panics
    /// Panics if the underlying `rayon` pool fails to initialize.
    #[must_use]
    pub fn fixed(num_threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .expect("failed to build thread pool");
        Self::Fixed(Arc::new(pool))
    }

    /// Builds a cooperative pool, initially sized to `num_threads`, whose
    /// worker count can later be changed with [`ThreadPoolHandle::resize`].
    #[must_use]
    pub fn cooperative(num_threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .expect("failed to build thread pool");
        Self::Cooperative(Arc::new(parking_lot::RwLock::new(Arc::new(pool))))
    }

    #[must_use]
    pub fn num_threads(&self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::Fixed(p) => p.current_num_threads(),
            Self::Cooperative(p) => p.read().current_num_threads(),
        }
    }

    /// Resizes a cooperative pool. No-op on `Sequential`/`Fixed` handles.
    ///
    /// Per §5's shared-resource policy, callers must ensure no searches
    /// are in flight during the swap.
    pub fn resize(&self, num_threads: usize) {
        if let Self::Cooperative(lock) = self {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build()
                .expect("failed to build thread pool");
            *lock.write() = Arc::new(pool);
        }
    }

    /// Runs `f` once per index in `0..len`, using `partition` to describe
    /// how work is split across workers. Blocks until every unit of work
    /// completes (the only suspension point the scheduling model defines).
    pub fn parallel_for<F>(&self, len: usize, partition: Partition, f: F)
    where
        F: Fn(usize) + Send + Sync,
    {
        match self {
            Self::Sequential => (0..len).for_each(f),
            Self::Fixed(pool) => pool.install(|| run_partitioned(len, partition, &f)),
            Self::Cooperative(lock) => {
                let pool = lock.read().clone();
                pool.install(|| run_partitioned(len, partition, &f));
            }
        }
    }
}

fn run_partitioned<F>(len: usize, partition: Partition, f: &F)
where
    F: Fn(usize) + Send + Sync,
{
    use rayon::prelude::*;
    match partition {
        Partition::StaticEvenSplit | Partition::DynamicBlockSize(_) => {
            (0..len).into_par_iter().for_each(f);
        }
        Partition::StaticBlockSize(block) => {
            let block = block.max(1);
            let num_blocks = len.div_ceil(block);
            (0..num_blocks).into_par_iter().for_each(|b| {
                let start = b * block;
                let end = (start + block).min(len);
                (start..end).for_each(f);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn sequential_visits_every_index_once() {
        let pool = ThreadPoolHandle::sequential();
        let counter = AtomicUsize::new(0);
        pool.parallel_for(100, Partition::StaticEvenSplit, |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn fixed_pool_visits_every_index_once() {
        let pool = ThreadPoolHandle::fixed(2);
        let counter = AtomicUsize::new(0);
        pool.parallel_for(500, Partition::DynamicBlockSize(16), |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(counter.load(Ordering::Relaxed), 500);
    }

    #[test]
    fn cooperative_pool_can_be_resized() {
        let pool = ThreadPoolHandle::cooperative(1);
        assert_eq!(pool.num_threads(), 1);
        pool.resize(2);
        assert_eq!(pool.num_threads(), 2);
    }
}
