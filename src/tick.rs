//! Generation counter ("tick") for the current user intent.
//!
//! Single-writer discipline: only `TickCounter` can advance the value, and it
//! is not `Clone`. Workers, the staleness gate and the forked
//! fetch process hold `TickReader`s, which can only load it.
//!
//! The cell lives either on the heap (thread isolation) or in an anonymous
//! `MAP_SHARED` mapping created before `fork()`, so the fetch process sees
//! every advance without any extra IPC.

use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use log::debug;
use nix::sys::mman::{MapFlags, ProtFlags, mmap_anonymous, munmap};

/// Intent generation. Starts at 0 and only ever grows.
pub type Tick = u64;

const CELL_LEN: NonZeroUsize = match NonZeroUsize::new(size_of::<AtomicU64>()) {
    Some(n) => n,
    None => unreachable!(),
};

enum Backing {
    Heap(AtomicU64),
    Shared(NonNull<AtomicU64>),
}

/// Storage for a tick value with atomic load/store.
pub struct TickCell {
    backing: Backing,
}

// SAFETY: the shared mapping holds exactly one AtomicU64 and is only ever
// accessed through atomic operations; it is unmapped once, in Drop.
unsafe impl Send for TickCell {}
unsafe impl Sync for TickCell {}

impl Default for TickCell {
    fn default() -> Self {
        Self::new()
    }
}

impl TickCell {
    /// Heap-backed cell, visible to threads of this process only.
    pub fn new() -> Self {
        Self {
            backing: Backing::Heap(AtomicU64::new(0)),
        }
    }

    /// Cell backed by an anonymous shared mapping. Must be created before
    /// `fork()` for the child to observe it.
    pub fn shared() -> anyhow::Result<Self> {
        // SAFETY: a fresh anonymous mapping aliases nothing. The kernel
        // zero-fills it, which is a valid AtomicU64 holding 0, and the
        // mapping is page aligned.
        let ptr = unsafe {
            mmap_anonymous(
                None,
                CELL_LEN,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
            )
        }
        .context("failed to map shared tick cell")?;
        debug!("tick: shared cell mapped at {:p}", ptr);
        Ok(Self {
            backing: Backing::Shared(ptr.cast()),
        })
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.backing, Backing::Shared(_))
    }

    fn atomic(&self) -> &AtomicU64 {
        match &self.backing {
            Backing::Heap(a) => a,
            // SAFETY: the mapping stays valid until Drop.
            Backing::Shared(p) => unsafe { p.as_ref() },
        }
    }
}

impl Drop for TickCell {
    fn drop(&mut self) {
        if let Backing::Shared(p) = self.backing {
            // SAFETY: mapped in `shared()` with this length, unmapped only here.
            let _ = unsafe { munmap(p.cast(), CELL_LEN.get()) };
        }
    }
}

/// The writer side. Owned by the coordinator.
pub struct TickCounter {
    cell: Arc<TickCell>,
}

impl Default for TickCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TickCounter {
    pub fn new() -> Self {
        Self::with_cell(TickCell::new())
    }

    /// Counter whose value is visible to processes forked after this call.
    pub fn shared() -> anyhow::Result<Self> {
        Ok(Self::with_cell(TickCell::shared()?))
    }

    fn with_cell(cell: TickCell) -> Self {
        Self {
            cell: Arc::new(cell),
        }
    }

    pub fn current(&self) -> Tick {
        self.cell.atomic().load(Ordering::Acquire)
    }

    /// Strictly increment and return the new value.
    pub fn advance(&mut self) -> Tick {
        let next = self.cell.atomic().fetch_add(1, Ordering::AcqRel) + 1;
        debug!("tick: advanced to {next}");
        next
    }

    pub fn reader(&self) -> TickReader {
        TickReader {
            cell: Arc::clone(&self.cell),
        }
    }
}

/// Read-only handle to the current tick.
#[derive(Clone)]
pub struct TickReader {
    cell: Arc<TickCell>,
}

impl TickReader {
    pub fn current(&self) -> Tick {
        self.cell.atomic().load(Ordering::Acquire)
    }

    pub fn is_shared(&self) -> bool {
        self.cell.is_shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn starts_at_zero() {
        let ticks = TickCounter::new();
        assert_eq!(ticks.current(), 0);
        assert_eq!(ticks.reader().current(), 0);
    }

    #[test]
    fn advance_is_strictly_increasing() {
        let mut ticks = TickCounter::new();
        let mut last = ticks.current();
        for _ in 0..100 {
            let next = ticks.advance();
            assert!(next > last, "{next} should exceed {last}");
            assert_eq!(ticks.current(), next);
            last = next;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn reader_observes_advance_from_other_thread() {
        let mut ticks = TickCounter::new();
        let reader = ticks.reader();
        ticks.advance();
        ticks.advance();
        let seen = thread::spawn(move || reader.current()).join().unwrap();
        assert_eq!(seen, 2);
    }

    #[test]
    fn shared_cell_behaves_like_heap_cell() {
        let mut ticks = TickCounter::shared().expect("mmap should succeed");
        let reader = ticks.reader();
        assert!(reader.is_shared());
        assert_eq!(reader.current(), 0);
        assert_eq!(ticks.advance(), 1);
        assert_eq!(reader.current(), 1);
    }

    #[test]
    fn heap_cell_is_not_shared() {
        assert!(!TickCounter::new().reader().is_shared());
    }
}
