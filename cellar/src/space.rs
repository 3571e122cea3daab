use std::{
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};

use crate::{
    Arena, CellData, MutatorThread, OS_PAGE_SIZE, Segment, SpaceError, Tag, ThreadShared, Value,
    lock::SpinLock, tagged::CellRef,
};

// ── Settings ──────────────────────────────────────────────────────────

/// What a thread does when the heap ceiling is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    /// Go unmanaged, wait for collections and retry.
    Block,
    /// Terminate the process with a diagnostic.
    Abort,
}

#[derive(Debug, Clone)]
pub struct SpaceSettings {
    /// Ceiling for mapped cell memory in bytes.
    pub max_heap_bytes: usize,
    /// Cells per OS block. Block bytes must be page aligned.
    pub block_cells: usize,
    /// Cells a thread takes from the free list per refill.
    pub refill_cells: usize,
    /// Cells a context may allocate before `checkpoint` retires its chain.
    pub context_cell_budget: usize,
    /// Pending dirty cells that wake the collector early.
    pub dirty_trigger_cells: usize,
    /// Fraction of the ceiling (0.0 - 1.0) above which a nearly empty free list triggers a collection.
    pub pressure_ratio: f64,
    /// Periodic wake up of the collector thread.
    pub gc_interval: Duration,
    /// How often the collector re-checks threads that have not reached a safepoint yet.
    pub stop_poll_interval: Duration,
    pub on_exhaustion: ExhaustionPolicy,
    /// Collections in a row that free nothing before a blocked thread gives up.
    pub exhaustion_retries: u32,
    /// Run a dedicated collector thread. Without it `collect` runs on the caller.
    pub background_collector: bool,
    /// Called on every reclaimed cell before it is zeroed.
    pub finalizer: Option<fn(&CellData)>,
}

impl Default for SpaceSettings {
    fn default() -> Self {
        Self {
            max_heap_bytes: 268_435_456, // 256 MB
            block_cells: 4_096,          // 256 KB blocks
            refill_cells: 256,
            context_cell_budget: 4_096,
            dirty_trigger_cells: 65_536,
            pressure_ratio: 0.75,
            gc_interval: Duration::from_millis(50),
            stop_poll_interval: Duration::from_millis(1),
            on_exhaustion: ExhaustionPolicy::Block,
            exhaustion_retries: 3,
            background_collector: true,
            finalizer: None,
        }
    }
}

impl SpaceSettings {
    pub fn block_bytes(&self) -> usize {
        self.block_cells * Arena::SLOT_SIZE
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_heap_bytes == 0 || self.block_cells == 0 || self.refill_cells == 0 {
            return Err("sizes must be > 0");
        }
        if self.block_bytes() % OS_PAGE_SIZE != 0 {
            return Err("block_cells must fill whole OS pages");
        }
        if self.max_heap_bytes < self.block_bytes() {
            return Err("max_heap_bytes must hold at least one block");
        }
        if self.max_heap_bytes / Arena::SLOT_SIZE > u32::MAX as usize {
            return Err("max_heap_bytes exceeds the addressable cell count");
        }
        if self.context_cell_budget == 0 || self.dirty_trigger_cells == 0 {
            return Err("budgets must be > 0");
        }
        if !(0.0..=1.0).contains(&self.pressure_ratio) {
            return Err("pressure_ratio must be between 0 and 1");
        }
        if self.gc_interval.is_zero() || self.stop_poll_interval.is_zero() {
            return Err("intervals must be > 0");
        }
        Ok(())
    }
}

// ── World state ───────────────────────────────────────────────────────

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldState {
    Running = 0,
    /// collector claimed a cycle and is announcing the stop
    StoppingWorld = 1,
    /// stop announced, waiting for every managed thread to reach a safepoint
    WorldToStop = 2,
    WorldStopped = 3,
    Ending = 4,
}

impl WorldState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => WorldState::Running,
            1 => WorldState::StoppingWorld,
            2 => WorldState::WorldToStop,
            3 => WorldState::WorldStopped,
            _ => WorldState::Ending,
        }
    }

    /// Managed threads must park at their next safepoint.
    #[inline]
    pub fn halts_mutators(self) -> bool {
        matches!(
            self,
            WorldState::StoppingWorld | WorldState::WorldToStop | WorldState::WorldStopped
        )
    }
}

pub(crate) struct World {
    pub(crate) state: WorldState,
    pub(crate) ending: bool,
    pub(crate) threads: Vec<Arc<ThreadShared>>,
}

#[derive(Debug, Default)]
pub(crate) struct DirtyQueue {
    pub(crate) segments: Vec<Segment>,
    pub(crate) cells: usize,
}

#[derive(Debug, Default)]
pub(crate) struct CycleProgress {
    pub(crate) started: u64,
    pub(crate) completed: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) cycles: AtomicU64,
    pub(crate) cells_freed: AtomicU64,
    pub(crate) cells_retained: AtomicUsize,
    pub(crate) last_marked: AtomicUsize,
    pub(crate) last_pause_micros: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub cycles: u64,
    pub cells_freed: u64,
    pub cells_retained: usize,
    pub last_marked: usize,
    pub free_cells: usize,
    pub heap_bytes: usize,
    pub last_pause: Duration,
}

// ── Space ─────────────────────────────────────────────────────────────

pub struct SpaceInner {
    pub settings: SpaceSettings,
    pub arena: Arena,
    pub(crate) world: Mutex<World>,
    pub(crate) world_changed: Condvar,
    world_state: AtomicU8,
    pub(crate) dirty: SpinLock<DirtyQueue>,
    pub(crate) retained: Mutex<Segment>,
    pub(crate) mutable_root: AtomicU64,
    pub(crate) next_mutable: AtomicI64,
    pub(crate) next_object_id: AtomicU64,
    pub(crate) tuple_root: AtomicU64,
    trigger: Mutex<bool>,
    trigger_cv: Condvar,
    pub(crate) progress: Mutex<CycleProgress>,
    pub(crate) progress_cv: Condvar,
    pub(crate) cycle_lock: Mutex<()>,
    pub(crate) ending: AtomicBool,
    collector_running: AtomicBool,
    next_thread_id: AtomicU64,
    pub(crate) counters: Counters,
}

impl SpaceInner {
    fn new(settings: SpaceSettings) -> Self {
        let arena = Arena::new(settings.block_cells, settings.max_heap_bytes);
        Self {
            settings,
            arena,
            world: Mutex::new(World {
                state: WorldState::Running,
                ending: false,
                threads: Vec::new(),
            }),
            world_changed: Condvar::new(),
            world_state: AtomicU8::new(WorldState::Running as u8),
            dirty: SpinLock::new(DirtyQueue::default()),
            retained: Mutex::new(Segment::EMPTY),
            mutable_root: AtomicU64::new(Value::empty(Tag::SparseList).raw()),
            next_mutable: AtomicI64::new(1),
            next_object_id: AtomicU64::new(1),
            tuple_root: AtomicU64::new(Value::empty(Tag::TupleDictionary).raw()),
            trigger: Mutex::new(false),
            trigger_cv: Condvar::new(),
            progress: Mutex::new(CycleProgress::default()),
            progress_cv: Condvar::new(),
            cycle_lock: Mutex::new(()),
            ending: AtomicBool::new(false),
            collector_running: AtomicBool::new(false),
            next_thread_id: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    /// Payload of a live cell.
    #[inline]
    pub fn cell(&self, cell: CellRef) -> &CellData {
        self.arena.data(cell)
    }

    /// Lock free mirror of the world state, read on every safepoint.
    #[inline]
    pub fn world_state(&self) -> WorldState {
        WorldState::from_u8(self.world_state.load(Ordering::Acquire))
    }

    pub(crate) fn set_world_state(&self, world: &mut World, state: WorldState) {
        log::trace!(target: "gc", "world {:?} -> {:?}", world.state, state);
        world.state = state;
        self.world_state.store(state as u8, Ordering::Release);
    }

    // ── Threads ──

    /// Registers a new mutator. It starts unmanaged and becomes managed when it
    /// enters its first context.
    pub fn register_thread(self: &Arc<Self>) -> MutatorThread {
        let id = self.next_thread_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(ThreadShared::new(id));
        self.world.lock().threads.push(Arc::clone(&shared));
        log::trace!(target: "gc", "registered thread {id}");
        MutatorThread::new(Arc::clone(self), shared)
    }

    pub(crate) fn deregister_thread(&self, shared: &Arc<ThreadShared>) {
        let mut world = self.world.lock();
        world.threads.retain(|thread| !Arc::ptr_eq(thread, shared));
        self.world_changed.notify_all();
        log::trace!(target: "gc", "deregistered thread {}", shared.id);
    }

    pub fn thread_count(&self) -> usize {
        self.world.lock().threads.len()
    }

    // ── Allocation ──

    /// Takes a batch of free cells for a thread cache. Wakes the collector early when
    /// the heap is close to its ceiling.
    pub fn get_free_cells(&self, want: usize) -> Result<Segment, SpaceError> {
        let batch = self.arena.take_free(want)?;
        if self.under_pressure() {
            self.trigger_gc();
        }
        Ok(batch)
    }

    fn under_pressure(&self) -> bool {
        let limit = self.settings.max_heap_bytes as f64 * self.settings.pressure_ratio;
        self.arena.heap_bytes() as f64 >= limit
            && self.arena.free_cells() < self.settings.refill_cells
    }

    /// Queues a retired allocation chain for the next cycle.
    pub fn analyze_used_cells(&self, segment: Segment) {
        if segment.is_empty() {
            return;
        }
        let pending = {
            let mut dirty = self.dirty.lock();
            dirty.segments.push(segment);
            dirty.cells += segment.count;
            dirty.cells
        };
        if pending >= self.settings.dirty_trigger_cells {
            self.trigger_gc();
        }
    }

    pub fn pending_dirty_cells(&self) -> usize {
        self.dirty.lock().cells
    }

    pub(crate) fn detach_dirty(&self) -> DirtyQueue {
        std::mem::take(&mut *self.dirty.lock())
    }

    // ── Collection control ──

    /// Asks the collector to run a cycle soon. Does not wait.
    pub fn trigger_gc(&self) {
        *self.trigger.lock() = true;
        self.trigger_cv.notify_one();
    }

    /// Waits for the next trigger or the periodic interval. Returns whether a cycle was requested.
    pub(crate) fn wait_for_trigger(&self) -> bool {
        let mut requested = self.trigger.lock();
        if !*requested && !self.ending.load(Ordering::Acquire) {
            self.trigger_cv
                .wait_for(&mut requested, self.settings.gc_interval);
        }
        std::mem::take(&mut *requested)
    }

    pub fn has_background_collector(&self) -> bool {
        self.collector_running.load(Ordering::Acquire)
    }

    /// Runs a full cycle that starts after this call and waits for it to finish.
    /// The calling thread must not be managed, use [`crate::Context::collect`] from
    /// inside a context.
    pub fn collect(&self) {
        if !self.has_background_collector() {
            self.run_cycle();
            return;
        }
        let target = self.progress.lock().started + 1;
        self.trigger_gc();
        let mut progress = self.progress.lock();
        while progress.completed < target && !self.ending.load(Ordering::Acquire) {
            self.progress_cv
                .wait_for(&mut progress, self.settings.gc_interval);
        }
    }

    pub fn stats(&self) -> CollectionStats {
        CollectionStats {
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            cells_freed: self.counters.cells_freed.load(Ordering::Relaxed),
            cells_retained: self.counters.cells_retained.load(Ordering::Relaxed),
            last_marked: self.counters.last_marked.load(Ordering::Relaxed),
            free_cells: self.arena.free_cells(),
            heap_bytes: self.arena.heap_bytes(),
            last_pause: Duration::from_micros(
                self.counters.last_pause_micros.load(Ordering::Relaxed),
            ),
        }
    }

    fn begin_shutdown(&self) {
        self.ending.store(true, Ordering::Release);
        {
            let mut world = self.world.lock();
            world.ending = true;
            if world.state == WorldState::Running {
                self.set_world_state(&mut world, WorldState::Ending);
            }
            self.world_changed.notify_all();
        }
        self.trigger_cv.notify_all();
        self.progress_cv.notify_all();
    }
}

/// Owner of a runtime instance. Threads hold shared references to the inner state,
/// dropping the owner stops the collector and runs a final collection.
pub struct Space {
    inner: Arc<SpaceInner>,
    collector: Option<JoinHandle<()>>,
}

impl Space {
    pub fn new(settings: SpaceSettings) -> Result<Self, SpaceError> {
        settings.validate().map_err(SpaceError::InvalidSettings)?;
        let inner = Arc::new(SpaceInner::new(settings));

        let collector = if inner.settings.background_collector {
            let shared = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name("cellar-collector".into())
                .spawn(move || shared.collector_loop())
                .map_err(|err| SpaceError::CollectorSpawnFailed(err.to_string()))?;
            inner.collector_running.store(true, Ordering::Release);
            Some(handle)
        } else {
            None
        };

        log::debug!(
            target: "gc",
            "space created: ceiling {} bytes, blocks of {} cells, background collector {}",
            inner.settings.max_heap_bytes,
            inner.settings.block_cells,
            collector.is_some()
        );
        Ok(Self { inner, collector })
    }

    /// Shared handle for registering threads elsewhere.
    pub fn handle(&self) -> Arc<SpaceInner> {
        Arc::clone(&self.inner)
    }

    pub fn register_thread(&self) -> MutatorThread {
        self.inner.register_thread()
    }
}

impl Deref for Space {
    type Target = SpaceInner;

    fn deref(&self) -> &SpaceInner {
        &self.inner
    }
}

impl Drop for Space {
    fn drop(&mut self) {
        self.inner.begin_shutdown();
        match self.collector.take() {
            Some(handle) => {
                if handle.join().is_err() {
                    log::error!(target: "gc", "collector thread panicked");
                }
            }
            None => self.inner.final_collection(),
        }
        self.inner
            .collector_running
            .store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{small_settings, test_space};

    #[test]
    fn default_settings_are_valid() {
        assert!(SpaceSettings::default().validate().is_ok());
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = SpaceSettings {
            block_cells: 10,
            ..SpaceSettings::default()
        };
        match Space::new(settings) {
            Err(SpaceError::InvalidSettings(_)) => (),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("unaligned blocks must be rejected"),
        }

        let settings = SpaceSettings {
            pressure_ratio: 1.5,
            ..small_settings()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn threads_register_unmanaged_and_leave_on_drop() {
        let space = test_space(false);
        assert_eq!(space.thread_count(), 0);
        let thread = space.register_thread();
        assert_eq!(space.thread_count(), 1);
        assert_eq!(thread.state(), crate::ThreadState::Unmanaged);
        drop(thread);
        assert_eq!(space.thread_count(), 0);
    }

    #[test]
    fn dropping_the_space_ends_the_world() {
        let space = test_space(true);
        let handle = space.handle();
        assert!(handle.has_background_collector());
        drop(space);
        assert_eq!(handle.world_state(), WorldState::Ending);
        assert!(!handle.has_background_collector());
    }

    #[test]
    fn retired_segments_queue_until_collected() {
        let space = test_space(false);
        let mut thread = space.register_thread();
        {
            let mut ctx = thread.enter();
            let list = crate::List::new().append(&mut ctx, Value::from_i64(1));
            assert_eq!(list.size(&ctx), 1);
        }
        assert!(space.pending_dirty_cells() > 0);
        drop(thread);
        space.collect();
        assert_eq!(space.pending_dirty_cells(), 0);
        assert!(space.stats().cells_freed > 0);
    }
}
