//! Activation records. Each context owns the chain of cells allocated while it is
//! innermost, a small array of local roots and a result slot for its caller.
use std::{
    ops::Deref,
    ptr::NonNull,
    sync::{Arc, atomic::Ordering},
};

use crate::{
    Allocator, CellData, MutatorThread, NO_CELL, Segment, SpaceInner, ThreadState, Value,
    Visitable, Visitor, tagged::CellRef,
};

pub const LOCALS_CAPACITY: usize = 20;

#[derive(Debug)]
pub struct ContextFrame {
    pub previous: *mut ContextFrame,
    /// most recently allocated cell, head of the allocation chain
    pub last_cell: u32,
    /// oldest cell of the chain
    pub first_cell: u32,
    /// cells in the chain since the last checkpoint
    pub allocated: usize,
    pub result: Value,
    pub locals_len: usize,
    pub locals: [Value; LOCALS_CAPACITY],
}

impl ContextFrame {
    fn new(previous: *mut ContextFrame) -> Self {
        Self {
            previous,
            last_cell: NO_CELL,
            first_cell: NO_CELL,
            allocated: 0,
            result: Value::NONE,
            locals_len: 0,
            locals: [Value::NONE; LOCALS_CAPACITY],
        }
    }

    fn take_chain(&mut self) -> Segment {
        let segment = Segment {
            head: self.last_cell,
            tail: self.first_cell,
            count: self.allocated,
        };
        self.last_cell = NO_CELL;
        self.first_cell = NO_CELL;
        self.allocated = 0;
        segment
    }
}

// locals and the result slot, the chain cells are visited by the collector itself
impl Visitable for ContextFrame {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        for local in &self.locals[..self.locals_len] {
            visitor.visit(*local);
        }
        visitor.visit(self.result);
    }
}

/// Handle to the innermost activation of a thread. Children borrow their parent
/// mutably, so only the innermost context can allocate.
pub struct Context<'a> {
    thread: &'a mut MutatorThread,
    frame: NonNull<ContextFrame>,
}

impl<'a> Context<'a> {
    pub(crate) fn push(thread: &'a mut MutatorThread) -> Self {
        let previous = thread.shared.current_frame();
        let frame = NonNull::from(Box::leak(Box::new(ContextFrame::new(previous))));
        thread.shared.set_current_frame(frame.as_ptr());
        Self { thread, frame }
    }

    /// Enters a callee context.
    pub fn call(&mut self) -> Context<'_> {
        Context::push(&mut *self.thread)
    }

    /// Runs `f` in a callee context. The value it returns travels through the result
    /// slots, so it stays rooted after the callee's chain is retired.
    pub fn call_with(&mut self, f: impl FnOnce(&mut Context<'_>) -> Value) -> Value {
        {
            let mut callee = self.call();
            let result = f(&mut callee);
            callee.set_result(result);
        }
        self.result()
    }

    #[inline]
    fn frame(&self) -> &ContextFrame {
        // SAFETY: the frame lives until this context is dropped, the collector
        // only reads it while this thread is stopped or unmanaged
        unsafe { self.frame.as_ref() }
    }

    #[inline]
    fn frame_mut(&mut self) -> &mut ContextFrame {
        // SAFETY: see frame
        unsafe { self.frame.as_mut() }
    }

    pub fn thread_id(&self) -> u64 {
        self.thread.id()
    }

    pub fn thread_state(&self) -> ThreadState {
        self.thread.state()
    }

    /// Shared handle to the space this context allocates in.
    pub fn space_handle(&self) -> Arc<SpaceInner> {
        Arc::clone(&self.thread.space)
    }

    /// Cells allocated since the last checkpoint.
    pub fn allocated(&self) -> usize {
        self.frame().allocated
    }

    // ── Locals ──

    /// Roots `value` for the lifetime of this context and returns its slot.
    pub fn push_local(&mut self, value: Value) -> usize {
        let frame = self.frame_mut();
        assert!(frame.locals_len < LOCALS_CAPACITY, "Context locals full");
        let slot = frame.locals_len;
        frame.locals[slot] = value;
        frame.locals_len += 1;
        slot
    }

    pub fn local(&self, slot: usize) -> Value {
        self.locals()[slot]
    }

    pub fn set_local(&mut self, slot: usize, value: Value) {
        let frame = self.frame_mut();
        assert!(slot < frame.locals_len, "local {slot} not pushed");
        frame.locals[slot] = value;
    }

    pub fn pop_local(&mut self) -> Value {
        let frame = self.frame_mut();
        assert!(frame.locals_len > 0, "no locals to pop");
        frame.locals_len -= 1;
        std::mem::take(&mut frame.locals[frame.locals_len])
    }

    pub fn locals(&self) -> &[Value] {
        let frame = self.frame();
        &frame.locals[..frame.locals_len]
    }

    pub fn truncate_locals(&mut self, len: usize) {
        let frame = self.frame_mut();
        while frame.locals_len > len {
            frame.locals_len -= 1;
            frame.locals[frame.locals_len] = Value::NONE;
        }
    }

    // ── Result slot ──

    pub fn set_result(&mut self, value: Value) {
        self.frame_mut().result = value;
    }

    /// Own result slot. After a callee returns this holds what the callee set.
    pub fn result(&self) -> Value {
        self.frame().result
    }

    // ── Collector cooperation ──

    #[inline]
    pub fn safepoint(&self) {
        self.thread.safepoint();
    }

    /// Retires the allocation chain if the cell budget is spent. Only values held in
    /// locals or result slots survive the next collection afterwards.
    pub fn checkpoint(&mut self) -> bool {
        self.safepoint();
        if self.frame().allocated < self.thread.space.settings.context_cell_budget {
            return false;
        }
        self.retire();
        true
    }

    /// Hands the allocation chain to the space unconditionally.
    pub fn retire(&mut self) {
        let segment = self.frame_mut().take_chain();
        self.thread.space.analyze_used_cells(segment);
    }

    /// Runs a blocking call with this thread unmanaged.
    pub fn unmanaged<R>(&mut self, f: impl FnOnce() -> R) -> R {
        self.thread.unmanaged(f)
    }

    /// Runs a full collection and waits for it, unmanaged meanwhile.
    pub fn collect(&mut self) {
        let space = Arc::clone(&self.thread.space);
        self.thread.unmanaged(move || space.collect());
    }
}

impl Allocator for Context<'_> {
    #[inline]
    fn space(&self) -> &SpaceInner {
        &self.thread.space
    }

    fn allocate(&mut self, data: CellData) -> CellRef {
        self.thread.safepoint();
        let index = self.thread.take_cell();

        let mut frame = self.frame;
        // SAFETY: see frame, no other borrow of the frame is alive here
        let frame = unsafe { frame.as_mut() };
        let slot = self.thread.space.arena.slot(index);
        // SAFETY: the cell came out of this thread's private cache, nothing else can see it
        unsafe { slot.data.get().write(data) };
        slot.next.store(frame.last_cell, Ordering::Release);
        if frame.last_cell == NO_CELL {
            frame.first_cell = index;
        }
        frame.last_cell = index;
        frame.allocated += 1;
        CellRef::new(index, slot.generation())
    }

    fn pin(&mut self, value: Value) -> usize {
        self.push_local(value)
    }

    fn repin(&mut self, slot: usize, value: Value) {
        self.set_local(slot, value);
    }

    fn unpin(&mut self, slot: usize) {
        self.truncate_locals(slot);
    }
}

impl Deref for Context<'_> {
    type Target = SpaceInner;

    fn deref(&self) -> &SpaceInner {
        &self.thread.space
    }
}

impl Drop for Context<'_> {
    fn drop(&mut self) {
        let (segment, result, previous) = {
            let frame = self.frame_mut();
            (frame.take_chain(), frame.result, frame.previous)
        };
        self.thread.space.analyze_used_cells(segment);
        if let Some(mut caller) = NonNull::new(previous) {
            // SAFETY: the caller frame outlives its callees
            unsafe { caller.as_mut() }.result = result;
        }
        self.thread.shared.set_current_frame(previous);
        // SAFETY: created by Box::leak in push, unlinked from the thread above
        drop(unsafe { Box::from_raw(self.frame.as_ptr()) });
        if previous.is_null() {
            self.thread.leave_managed();
        }
    }
}
