//! Heap metering
//!
//! The guest heap budget is enforced from the interrupt handler, not by
//! QuickJS's allocator limit: every allocation goes through
//! [`MeteredAllocator`], and once the metered heap passes the budget the next
//! interrupt poll stops the guest. QuickJS's own limit sits
//! [`BACKSTOP_HEADROOM`] above the budget so that its out-of-memory paths are
//! only reached by single oversized allocations, never by a guest that has
//! filled the heap with small ones.

use rquickjs::allocator::{Allocator, RawMemPtr, RustAllocator};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Rendering of every heap exhaustion, whichever way it surfaced
pub const OUT_OF_MEMORY_MESSAGE: &str = "InternalError: out of memory";

/// Distance between the guest budget and QuickJS's hard limit. Interrupts are
/// polled every 10k loop iterations, so this has to absorb one such window of
/// allocation.
pub const BACKSTOP_HEADROOM: usize = 32 * 1024 * 1024;

/// Within this many bytes of the hard limit QuickJS can no longer build an
/// error object, and the heap counts as exhausted.
const EXHAUSTION_SLACK: usize = 64 * 1024;

/// Shared view of one runtime's heap
#[derive(Debug, Clone, Default)]
pub struct HeapMeter(Arc<MeterState>);

#[derive(Debug, Default)]
struct MeterState {
    used: AtomicUsize,
    /// Metered bytes the guest may reach; 0 until armed
    budget: AtomicUsize,
    hard_limit: AtomicUsize,
    tripped: AtomicBool,
}

impl HeapMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently allocated by the runtime.
    pub fn used(&self) -> usize {
        self.0.used.load(Ordering::Relaxed)
    }

    /// Allow `guest_bytes` on top of what is allocated now. Returns the hard
    /// limit to hand to QuickJS.
    pub fn arm(&self, guest_bytes: usize) -> usize {
        let budget = self.used().saturating_add(guest_bytes);
        let hard_limit = budget.saturating_add(BACKSTOP_HEADROOM);
        self.0.budget.store(budget, Ordering::Relaxed);
        self.0.hard_limit.store(hard_limit, Ordering::Relaxed);
        self.0.tripped.store(false, Ordering::Relaxed);
        hard_limit
    }

    pub fn budget(&self) -> usize {
        self.0.budget.load(Ordering::Relaxed)
    }

    /// Called from the interrupt handler: true once the budget is exceeded.
    pub fn over_budget(&self) -> bool {
        let budget = self.budget();
        if budget == 0 || self.used() <= budget {
            return false;
        }
        self.0.tripped.store(true, Ordering::Relaxed);
        true
    }

    /// Whether the current execution ran the heap out, either past the
    /// budget or up against the hard limit.
    pub fn exhausted(&self) -> bool {
        if self.0.tripped.load(Ordering::Relaxed) {
            return true;
        }
        let hard_limit = self.0.hard_limit.load(Ordering::Relaxed);
        hard_limit != 0 && self.used().saturating_add(EXHAUSTION_SLACK) >= hard_limit
    }

    /// Forget a previous exhaustion before the next execution.
    pub fn clear(&self) {
        self.0.tripped.store(false, Ordering::Relaxed);
    }

    fn grow(&self, bytes: usize) {
        self.0.used.fetch_add(bytes, Ordering::Relaxed);
    }

    fn shrink(&self, bytes: usize) {
        self.0.used.fetch_sub(bytes, Ordering::Relaxed);
    }
}

/// Rust's global allocator, with every byte reported to a [`HeapMeter`]
pub struct MeteredAllocator {
    inner: RustAllocator,
    meter: HeapMeter,
}

impl MeteredAllocator {
    pub fn new(meter: HeapMeter) -> Self {
        Self {
            inner: RustAllocator,
            meter,
        }
    }
}

// SAFETY: every call is forwarded to `RustAllocator`, which upholds the
// contract; the meter only observes the sizes it reports.
unsafe impl Allocator for MeteredAllocator {
    fn alloc(&mut self, size: usize) -> RawMemPtr {
        let ptr = self.inner.alloc(size);
        if !ptr.is_null() {
            self.meter.grow(unsafe { RustAllocator::usable_size(ptr) });
        }
        ptr
    }

    unsafe fn dealloc(&mut self, ptr: RawMemPtr) {
        self.meter.shrink(unsafe { RustAllocator::usable_size(ptr) });
        unsafe { self.inner.dealloc(ptr) };
    }

    unsafe fn realloc(&mut self, ptr: RawMemPtr, new_size: usize) -> RawMemPtr {
        let old_size = unsafe { RustAllocator::usable_size(ptr) };
        let moved = unsafe { self.inner.realloc(ptr, new_size) };
        if !moved.is_null() {
            self.meter.shrink(old_size);
            self.meter.grow(unsafe { RustAllocator::usable_size(moved) });
        }
        moved
    }

    unsafe fn usable_size(ptr: RawMemPtr) -> usize {
        unsafe { RustAllocator::usable_size(ptr) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_metered() {
        let meter = HeapMeter::new();
        let mut allocator = MeteredAllocator::new(meter.clone());

        let ptr = allocator.alloc(100);
        assert!(!ptr.is_null());
        assert!(meter.used() >= 100);

        let ptr = unsafe { allocator.realloc(ptr, 4096) };
        assert!(!ptr.is_null());
        assert!(meter.used() >= 4096);

        unsafe { allocator.dealloc(ptr) };
        assert_eq!(meter.used(), 0);
    }

    #[test]
    fn budget_trips_once_exceeded() {
        let meter = HeapMeter::new();
        let mut allocator = MeteredAllocator::new(meter.clone());
        assert!(!meter.over_budget());

        let hard_limit = meter.arm(1024);
        assert_eq!(hard_limit, 1024 + BACKSTOP_HEADROOM);
        let ptr = allocator.alloc(512);
        assert!(!meter.over_budget());
        assert!(!meter.exhausted());

        let ptr = unsafe { allocator.realloc(ptr, 2048) };
        assert!(meter.over_budget());
        assert!(meter.exhausted());

        unsafe { allocator.dealloc(ptr) };
        meter.clear();
        assert!(!meter.exhausted());
    }
}
