//! Heap allocator for proxymon
//!
//! Provides dynamic memory allocation using a linked list allocator over the
//! `.heap` region reserved by the linker script.

use linked_list_allocator::LockedHeap;

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

extern "C" {
    static __heap_start: u8;
    static __heap_end: u8;
}

/// Heap bounds as laid out by the linker
pub fn heap_region() -> (usize, usize) {
    // SAFETY: only the addresses of the linker symbols are taken
    unsafe {
        let start = core::ptr::addr_of!(__heap_start) as usize;
        let end = core::ptr::addr_of!(__heap_end) as usize;
        (start, end - start)
    }
}

/// Initialize the heap allocator
///
/// Must run once, before the first allocation.
pub fn init_heap() {
    let (start, size) = heap_region();
    // SAFETY: the region is reserved for the heap and nothing else uses it
    unsafe {
        ALLOCATOR.lock().init(start as *mut u8, size);
    }
}
