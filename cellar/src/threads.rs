use std::{
    ptr,
    sync::{
        Arc,
        atomic::{AtomicPtr, AtomicU8, Ordering},
    },
};

use crate::{
    Context, ContextFrame, ExhaustionPolicy, Segment, SpaceError, SpaceInner, error::fatal,
};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// running mutator code, must reach safepoints
    Managed = 0,
    /// parked at a safepoint while the world is stopped
    Stopped = 1,
    /// outside managed code, its frames are frozen
    Unmanaged = 2,
}

impl ThreadState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ThreadState::Managed,
            1 => ThreadState::Stopped,
            _ => ThreadState::Unmanaged,
        }
    }
}

/// The part of a thread the collector can see.
#[derive(Debug)]
pub struct ThreadShared {
    pub id: u64,
    state: AtomicU8,
    current: AtomicPtr<ContextFrame>,
}

impl ThreadShared {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            state: AtomicU8::new(ThreadState::Unmanaged as u8),
            current: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[inline]
    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Only called with the world lock held.
    #[inline]
    pub(crate) fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Innermost frame, null when the thread has no context.
    #[inline]
    pub(crate) fn current_frame(&self) -> *mut ContextFrame {
        self.current.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_current_frame(&self, frame: *mut ContextFrame) {
        self.current.store(frame, Ordering::Release);
    }
}

/// A registered mutator. Owns the thread's private cell cache, hands out contexts,
/// and cooperates with the collector at safepoints.
pub struct MutatorThread {
    pub(crate) space: Arc<SpaceInner>,
    pub(crate) shared: Arc<ThreadShared>,
    cache: Segment,
}

impl MutatorThread {
    pub(crate) fn new(space: Arc<SpaceInner>, shared: Arc<ThreadShared>) -> Self {
        Self {
            space,
            shared,
            cache: Segment::EMPTY,
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> ThreadState {
        self.shared.state()
    }

    pub fn space(&self) -> &SpaceInner {
        &self.space
    }

    pub fn cached_cells(&self) -> usize {
        self.cache.count
    }

    /// Enters managed code with a fresh root context.
    pub fn enter(&mut self) -> Context<'_> {
        self.enter_managed();
        Context::push(self)
    }

    /// Cooperative stop point. Cheap unless a stop has been requested.
    #[inline]
    pub fn safepoint(&self) {
        if self.space.world_state().halts_mutators() {
            self.park();
        }
    }

    #[cold]
    fn park(&self) {
        let mut world = self.space.world.lock();
        if !world.state.halts_mutators() {
            return;
        }
        log::trace!(target: "gc", "thread {} stopped", self.shared.id);
        self.shared.set_state(ThreadState::Stopped);
        self.space.world_changed.notify_all();
        while world.state.halts_mutators() {
            self.space.world_changed.wait(&mut world);
        }
        self.shared.set_state(ThreadState::Managed);
        log::trace!(target: "gc", "thread {} resumed", self.shared.id);
    }

    /// Becomes managed, waiting out a stop that is in progress.
    pub(crate) fn enter_managed(&self) {
        let mut world = self.space.world.lock();
        while world.state.halts_mutators() {
            self.space.world_changed.wait(&mut world);
        }
        self.shared.set_state(ThreadState::Managed);
    }

    pub(crate) fn leave_managed(&self) {
        let _world = self.space.world.lock();
        self.shared.set_state(ThreadState::Unmanaged);
        self.space.world_changed.notify_all();
    }

    /// Runs a blocking call outside managed code. The collector does not wait for
    /// this thread meanwhile, so `f` must not touch cells.
    pub fn unmanaged<R>(&mut self, f: impl FnOnce() -> R) -> R {
        let was_managed = self.state() == ThreadState::Managed;
        if was_managed {
            self.leave_managed();
        }
        let result = f();
        if was_managed {
            self.enter_managed();
        }
        result
    }

    /// Next cell from the private cache, refilled from the space when empty.
    pub(crate) fn take_cell(&mut self) -> u32 {
        if self.cache.is_empty() {
            self.refill();
        }
        match self.space.arena.pop_front(&mut self.cache) {
            Some(index) => index,
            None => fatal(&SpaceError::HeapExhausted {
                heap_bytes: self.space.arena.heap_bytes(),
                max_heap_bytes: self.space.arena.max_heap_bytes(),
            }),
        }
    }

    fn refill(&mut self) {
        let want = self.space.settings.refill_cells;
        let mut fruitless = 0;
        loop {
            let error = match self.space.get_free_cells(want) {
                Ok(batch) => {
                    self.cache = batch;
                    return;
                }
                Err(error) => error,
            };
            if !matches!(error, SpaceError::HeapExhausted { .. })
                || self.space.settings.on_exhaustion == ExhaustionPolicy::Abort
            {
                fatal(&error);
            }

            log::warn!(
                target: "gc",
                "thread {} blocked on exhausted heap ({error}), waiting for a collection",
                self.shared.id
            );
            let space = Arc::clone(&self.space);
            let freed = self.unmanaged(move || {
                let before = space.stats().cells_freed;
                space.collect();
                space.stats().cells_freed - before
            });
            if freed == 0 && self.space.arena.free_cells() == 0 {
                fruitless += 1;
                if fruitless >= self.space.settings.exhaustion_retries {
                    fatal(&error);
                }
            } else {
                fruitless = 0;
            }
        }
    }
}

impl Drop for MutatorThread {
    fn drop(&mut self) {
        let cache = std::mem::take(&mut self.cache);
        self.space.arena.release(cache);
        self.space.deregister_thread(&self.shared);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{List, Value, WorldState, testing::test_space};
    use std::{
        sync::{Barrier, atomic::AtomicBool},
        thread,
        time::Duration,
    };

    #[test]
    fn entering_a_context_makes_the_thread_managed() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        assert_eq!(thread.state(), ThreadState::Unmanaged);
        {
            let mut ctx = thread.enter();
            assert_eq!(ctx.thread_state(), ThreadState::Managed);
            let inner = ctx.unmanaged(|| 7);
            assert_eq!(inner, 7);
            assert_eq!(ctx.thread_state(), ThreadState::Managed);
        }
        assert_eq!(thread.state(), ThreadState::Unmanaged);
    }

    #[test]
    fn unmanaged_outside_a_context_stays_unmanaged() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        thread.unmanaged(|| ());
        assert_eq!(thread.state(), ThreadState::Unmanaged);
    }

    #[test]
    fn cache_is_returned_when_the_thread_exits() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        {
            let mut ctx = thread.enter();
            crate::List::new().append(&mut ctx, crate::Value::from_i64(1));
        }
        let cached = thread.cached_cells();
        assert!(cached > 0);
        let free = space.arena.free_cells();
        drop(thread);
        assert_eq!(space.arena.free_cells(), free + cached);
    }

    #[test]
    fn unmanaged_threads_do_not_hold_up_a_collection() {
        let space = test_space(false);
        let thread = space.register_thread();
        let shared = Arc::clone(&thread.shared);
        let release = Arc::new(Barrier::new(2));

        let worker = {
            let release = Arc::clone(&release);
            thread::spawn(move || {
                let mut thread = thread;
                let mut ctx = thread.enter();
                let values: Vec<Value> = (0..30).map(Value::from_i64).collect();
                let kept = List::from_values(&mut ctx, &values);
                ctx.push_local(kept.as_value());
                let mut callee = ctx.call();
                let inner = List::new().append(&mut callee, Value::from_i64(-1));
                let slot = callee.push_local(inner.as_value());
                callee.unmanaged(|| release.wait());
                (
                    kept.to_vec(&callee) == values,
                    List::from_value(callee.local(slot)).map(|l| l.to_vec(&callee)),
                )
            })
        };

        while shared.state() != ThreadState::Unmanaged {
            thread::yield_now();
        }
        let cycles = space.stats().cycles;
        space.collect();
        assert_eq!(space.stats().cycles, cycles + 1);
        assert_eq!(shared.state(), ThreadState::Unmanaged);
        release.wait();

        let (outer_intact, inner) = worker.join().unwrap();
        assert!(outer_intact);
        assert_eq!(inner, Some(vec![Value::from_i64(-1)]));
    }

    #[test]
    fn entering_waits_while_the_world_is_stopped() {
        let space = test_space(false);
        let inner = space.handle();
        let thread = space.register_thread();
        let entered = Arc::new(AtomicBool::new(false));
        {
            let mut world = inner.world.lock();
            inner.set_world_state(&mut world, WorldState::WorldStopped);
        }

        let worker = {
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                let mut thread = thread;
                let ctx = thread.enter();
                entered.store(true, Ordering::Release);
                ctx.world_state()
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::Acquire));
        {
            let mut world = inner.world.lock();
            assert!(world.threads.iter().all(|t| t.state() == ThreadState::Unmanaged));
            inner.set_world_state(&mut world, WorldState::Running);
            inner.world_changed.notify_all();
        }
        assert_eq!(worker.join().unwrap(), WorldState::Running);
        assert!(entered.load(Ordering::Acquire));
    }

    #[test]
    fn safepoint_parks_until_the_world_resumes() {
        let space = test_space(false);
        let inner = space.handle();
        let thread = space.register_thread();
        let ready = Arc::new(Barrier::new(2));
        let resumed = Arc::new(AtomicBool::new(false));

        let worker = {
            let ready = Arc::clone(&ready);
            let resumed = Arc::clone(&resumed);
            thread::spawn(move || {
                let mut thread = thread;
                let ctx = thread.enter();
                ready.wait();
                let mut steps = 0u64;
                while !resumed.load(Ordering::Acquire) {
                    ctx.safepoint();
                    steps += 1;
                }
                steps
            })
        };

        ready.wait();
        {
            let mut world = inner.world.lock();
            inner.set_world_state(&mut world, WorldState::WorldToStop);
            while world.threads.iter().any(|t| t.state() == ThreadState::Managed) {
                inner
                    .world_changed
                    .wait_for(&mut world, Duration::from_millis(1));
            }
            assert!(world.threads.iter().all(|t| t.state() == ThreadState::Stopped));
            inner.set_world_state(&mut world, WorldState::Running);
            inner.world_changed.notify_all();
        }
        resumed.store(true, Ordering::Release);
        assert!(worker.join().unwrap() > 0);
    }
}
