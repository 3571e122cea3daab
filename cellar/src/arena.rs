//! Slab of fixed-size cells carved out of OS blocks, plus the global free list.
use std::{
    mem,
    ptr::{self, NonNull},
    sync::atomic::{AtomicPtr, AtomicUsize, Ordering},
};

use crate::{
    CellData, CellSlot, NO_CELL, SpaceError,
    lock::SpinLock,
    system::{map_memory, page_align, unmap_memory},
    tagged::{CellRef, GENERATION_MASK},
};

/// A run of cells linked through their `next` field, `head` first.
/// Used for thread caches, context chains, dirty segments and survivors alike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Segment {
    pub head: u32,
    pub tail: u32,
    pub count: usize,
}

impl Segment {
    pub const EMPTY: Segment = Segment {
        head: NO_CELL,
        tail: NO_CELL,
        count: 0,
    };

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[derive(Debug, Default)]
struct FreeList {
    head: u32,
    count: usize,
}

pub struct Arena {
    blocks: Box<[AtomicPtr<CellSlot>]>,
    block_count: AtomicUsize,
    cells_per_block: usize,
    block_bytes: usize,
    max_heap_bytes: usize,
    free: SpinLock<FreeList>,
    heap_bytes: AtomicUsize,
}

impl Arena {
    pub const SLOT_SIZE: usize = mem::size_of::<CellSlot>();

    /// Creates an arena without mapping anything, blocks are mapped on first demand.
    pub fn new(cells_per_block: usize, max_heap_bytes: usize) -> Self {
        let block_bytes = page_align(cells_per_block * Self::SLOT_SIZE);
        let max_blocks = max_heap_bytes / block_bytes;
        let blocks = (0..max_blocks)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            blocks,
            block_count: AtomicUsize::new(0),
            cells_per_block,
            block_bytes,
            max_heap_bytes,
            free: SpinLock::new(FreeList::default()),
            heap_bytes: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn slot(&self, index: u32) -> &CellSlot {
        let index = index as usize;
        let block = index / self.cells_per_block;
        let offset = index % self.cells_per_block;
        let base = self.blocks[block].load(Ordering::Acquire);
        debug_assert!(!base.is_null(), "cell {index} lies in an unmapped block");
        // SAFETY: published blocks stay mapped until the arena is dropped, offset is in bounds
        unsafe { &*base.add(offset) }
    }

    /// Payload of a live cell.
    #[inline]
    pub fn data(&self, cell: CellRef) -> &CellData {
        let slot = self.slot(cell.index);
        debug_assert_eq!(
            slot.generation(),
            cell.generation,
            "stale reference to cell {}",
            cell.index
        );
        // SAFETY: a handle the caller can still reach keeps the cell from being swept
        unsafe { slot.data() }
    }

    /// Takes up to `want` free cells, mapping a new block when the list runs dry.
    pub fn take_free(&self, want: usize) -> Result<Segment, SpaceError> {
        debug_assert!(want > 0);
        loop {
            {
                let mut free = self.free.lock();
                if free.count > 0 {
                    return Ok(self.split_front(&mut free, want));
                }
            }
            self.grow()?;
        }
    }

    fn split_front(&self, free: &mut FreeList, want: usize) -> Segment {
        let take = want.min(free.count);
        let head = free.head;
        let mut tail = head;
        for _ in 1..take {
            tail = self.slot(tail).next.load(Ordering::Relaxed);
        }
        free.head = self.slot(tail).next.swap(NO_CELL, Ordering::Relaxed);
        free.count -= take;
        Segment {
            head,
            tail,
            count: take,
        }
    }

    fn grow(&self) -> Result<(), SpaceError> {
        let mut current = self.block_count.load(Ordering::Relaxed);
        loop {
            if current >= self.blocks.len() {
                return Err(SpaceError::HeapExhausted {
                    heap_bytes: self.heap_bytes(),
                    max_heap_bytes: self.max_heap_bytes,
                });
            }
            match self.block_count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let memory = map_memory(self.block_bytes).ok_or(SpaceError::OsAllocationFailed {
            bytes: self.block_bytes,
        })?;
        let base = memory.as_ptr().cast::<CellSlot>();

        // zero filled slots are free cells with generation 0, only the links are missing
        let first = (current * self.cells_per_block) as u32;
        let last = first + self.cells_per_block as u32 - 1;
        let head = first.max(1);
        for index in head..last {
            // SAFETY: in bounds of the block we just mapped, not yet visible to anyone
            let slot = unsafe { &*base.add((index - first) as usize) };
            slot.next.store(index + 1, Ordering::Relaxed);
        }
        self.blocks[current].store(base, Ordering::Release);
        self.heap_bytes
            .fetch_add(self.block_bytes, Ordering::Relaxed);

        log::debug!(
            target: "gc",
            "mapped block {current} ({} bytes), heap at {} of {} bytes",
            self.block_bytes,
            self.heap_bytes(),
            self.max_heap_bytes
        );

        self.release(Segment {
            head,
            tail: last,
            count: (last - head + 1) as usize,
        });
        Ok(())
    }

    /// Splices a linked segment onto the front of the free list.
    pub fn release(&self, segment: Segment) {
        if segment.is_empty() {
            return;
        }
        let mut free = self.free.lock();
        self.slot(segment.tail)
            .next
            .store(free.head, Ordering::Relaxed);
        free.head = segment.head;
        free.count += segment.count;
    }

    /// Finalizes a dead cell, zeroes it and bumps its generation so old handles go stale.
    /// The caller links it into a free segment afterwards.
    pub fn reclaim(&self, index: u32, finalizer: Option<fn(&CellData)>) {
        let slot = self.slot(index);
        if let Some(finalize) = finalizer {
            // SAFETY: the cell is unreachable, the sweep is its only user
            finalize(unsafe { slot.data() });
        }
        // SAFETY: unreachable cell, zero is the Free variant
        unsafe { ptr::write_bytes(slot.data.get(), 0, 1) };
        let generation = slot.generation.load(Ordering::Relaxed);
        slot.generation
            .store((generation + 1) & GENERATION_MASK, Ordering::Release);
        slot.next.store(NO_CELL, Ordering::Relaxed);
    }

    /// Pushes `index` onto the front of `segment`.
    #[inline]
    pub fn push_front(&self, segment: &mut Segment, index: u32) {
        self.slot(index)
            .next
            .store(segment.head, Ordering::Relaxed);
        if segment.is_empty() {
            segment.tail = index;
        }
        segment.head = index;
        segment.count += 1;
    }

    /// Pops the first cell of `segment`, its link is cleared.
    #[inline]
    pub fn pop_front(&self, segment: &mut Segment) -> Option<u32> {
        if segment.is_empty() {
            return None;
        }
        let index = segment.head;
        segment.head = self.slot(index).next.swap(NO_CELL, Ordering::Relaxed);
        segment.count -= 1;
        if segment.is_empty() {
            *segment = Segment::EMPTY;
        }
        Some(index)
    }

    /// Walks a chain from `head` until the terminator.
    pub fn chain(&self, head: u32) -> Chain<'_> {
        Chain { arena: self, next: head }
    }

    pub fn free_cells(&self) -> usize {
        self.free.lock().count
    }

    pub fn heap_bytes(&self) -> usize {
        self.heap_bytes.load(Ordering::Relaxed)
    }

    pub fn max_heap_bytes(&self) -> usize {
        self.max_heap_bytes
    }

    pub fn capacity_cells(&self) -> usize {
        self.block_count.load(Ordering::Acquire).min(self.blocks.len()) * self.cells_per_block
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        for block in self.blocks.iter() {
            if let Some(base) = NonNull::new(block.load(Ordering::Acquire)) {
                // SAFETY: mapped in grow with the same size, the arena is the last user
                unsafe { unmap_memory(base.cast(), self.block_bytes) };
            }
        }
    }
}

/// Iterator over a linked chain. The link of a cell is read before the cell is
/// yielded, so callers may relink what they get.
pub struct Chain<'a> {
    arena: &'a Arena,
    next: u32,
}

impl Iterator for Chain<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.next == NO_CELL {
            return None;
        }
        let index = self.next;
        self.next = self.arena.slot(index).next.load(Ordering::Acquire);
        Some(index)
    }
}
