//! Stop-the-world mark and deferred sweep.
//!
//! A cycle detaches the pending dirty segments, stops every managed thread at a
//! safepoint, marks from the roots, resumes the world and only then sweeps the
//! detached segments together with the survivors of earlier cycles.
use std::{
    collections::HashSet,
    iter,
    sync::{Arc, atomic::Ordering},
    time::{Duration, Instant},
};

use ahash::RandomState;

use crate::{
    Segment, SpaceInner, ThreadShared, ThreadState, Value, Visitable, Visitor, WorldState,
    space::DirtyQueue,
};

type Marks = HashSet<u32, RandomState>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub marked: usize,
    pub freed: usize,
    pub retained: usize,
    pub pause: Duration,
}

struct Marker {
    marks: Marks,
    worklist: Vec<u32>,
}

impl Marker {
    #[inline]
    fn mark_index(&mut self, index: u32) {
        if self.marks.insert(index) {
            self.worklist.push(index);
        }
    }
}

impl Visitor for Marker {
    #[inline]
    fn visit(&mut self, value: Value) {
        // embedded scalars and empty trees never reach the heap
        if let Some(cell) = value.cell() {
            self.mark_index(cell.index);
        }
    }
}

impl SpaceInner {
    pub(crate) fn collector_loop(self: Arc<Self>) {
        log::debug!(target: "gc", "collector started");
        loop {
            let requested = self.wait_for_trigger();
            if self.ending.load(Ordering::Acquire) {
                break;
            }
            if requested || self.pending_dirty_cells() > 0 {
                self.run_cycle();
            }
        }
        self.final_collection();
        log::debug!(target: "gc", "collector stopped");
    }

    /// One full cycle. Returns `None` when the space is shutting down.
    pub(crate) fn run_cycle(&self) -> Option<CycleReport> {
        let _cycle = self.cycle_lock.lock();
        self.progress.lock().started += 1;
        let started = Instant::now();

        let dirty = self.detach_dirty();
        let report = match self.stop_world() {
            Some(threads) => {
                let marks = self.mark(&threads);
                self.resume_world();
                let pause = started.elapsed();
                Some(self.sweep(&dirty.segments, &marks, pause))
            }
            None => {
                self.requeue(dirty);
                None
            }
        };

        let mut progress = self.progress.lock();
        progress.completed += 1;
        self.progress_cv.notify_all();
        report
    }

    /// Collection at teardown. Runs without stopping anyone, so it is skipped while
    /// a thread is still managed.
    pub(crate) fn final_collection(&self) {
        let _cycle = self.cycle_lock.lock();
        let world = self.world.lock();
        let managed = world
            .threads
            .iter()
            .filter(|thread| thread.state() == ThreadState::Managed)
            .count();
        if managed > 0 {
            log::warn!(target: "gc", "skipping final collection, {managed} thread(s) still managed");
            return;
        }
        let started = Instant::now();
        let dirty = self.detach_dirty();
        // the world lock keeps unmanaged threads from re-entering while we mark
        let marks = self.mark(&world.threads);
        drop(world);
        let report = self.sweep(&dirty.segments, &marks, started.elapsed());
        log::debug!(
            target: "gc",
            "final collection: freed {}, retained {}",
            report.freed,
            report.retained
        );
    }

    fn requeue(&self, detached: DirtyQueue) {
        let mut dirty = self.dirty.lock();
        dirty.cells += detached.cells;
        dirty.segments.extend(detached.segments);
    }

    fn stop_world(&self) -> Option<Vec<Arc<ThreadShared>>> {
        if !self.announce_stop() {
            return None;
        }
        Some(self.await_stop())
    }

    /// Publishes `StoppingWorld` and lets go of the world lock, so threads already
    /// at a safepoint can park before the collector starts counting.
    fn announce_stop(&self) -> bool {
        let mut world = self.world.lock();
        if world.ending {
            return false;
        }
        self.set_world_state(&mut world, WorldState::StoppingWorld);
        self.world_changed.notify_all();
        true
    }

    /// Waits until no registered thread is managed anymore.
    fn await_stop(&self) -> Vec<Arc<ThreadShared>> {
        let mut world = self.world.lock();
        self.set_world_state(&mut world, WorldState::WorldToStop);
        while world
            .threads
            .iter()
            .any(|thread| thread.state() == ThreadState::Managed)
        {
            self.world_changed
                .wait_for(&mut world, self.settings.stop_poll_interval);
        }
        self.set_world_state(&mut world, WorldState::WorldStopped);
        world.threads.clone()
    }

    fn resume_world(&self) {
        let mut world = self.world.lock();
        let next = if world.ending {
            WorldState::Ending
        } else {
            WorldState::Running
        };
        self.set_world_state(&mut world, next);
        self.world_changed.notify_all();
    }

    /// Marks everything reachable from the global tables and every thread's frames.
    /// No listed thread may be managed while this runs.
    fn mark(&self, threads: &[Arc<ThreadShared>]) -> Marks {
        let mut marker = Marker {
            marks: Marks::default(),
            worklist: Vec::with_capacity(1024),
        };

        marker.visit(Value::from_raw(self.mutable_root.load(Ordering::Acquire)));
        marker.visit(Value::from_raw(self.tuple_root.load(Ordering::Acquire)));

        for thread in threads {
            let mut frame = thread.current_frame();
            // SAFETY: the thread is stopped or unmanaged, its frames stay put until it resumes
            while let Some(current) = unsafe { frame.as_ref() } {
                for index in self.arena.chain(current.last_cell) {
                    marker.mark_index(index);
                }
                current.visit_edges(&mut marker);
                frame = current.previous;
            }
        }

        while let Some(index) = marker.worklist.pop() {
            // SAFETY: marked cells are reachable, so they hold constructed payloads
            let data = unsafe { self.arena.slot(index).data() };
            data.visit_edges(&mut marker);
        }
        marker.marks
    }

    fn sweep(&self, segments: &[Segment], marks: &Marks, pause: Duration) -> CycleReport {
        let mut retained = self.retained.lock();
        let previous = std::mem::take(&mut *retained);
        let mut survivors = Segment::EMPTY;
        let mut freed = Segment::EMPTY;

        for segment in segments.iter().chain(iter::once(&previous)) {
            for index in self.arena.chain(segment.head) {
                if marks.contains(&index) {
                    self.arena.push_front(&mut survivors, index);
                } else {
                    self.arena.reclaim(index, self.settings.finalizer);
                    self.arena.push_front(&mut freed, index);
                }
            }
        }
        *retained = survivors;
        drop(retained);

        let report = CycleReport {
            marked: marks.len(),
            freed: freed.count,
            retained: survivors.count,
            pause,
        };
        self.arena.release(freed);

        let counters = &self.counters;
        let cycle = counters.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        counters
            .cells_freed
            .fetch_add(report.freed as u64, Ordering::Relaxed);
        counters
            .cells_retained
            .store(report.retained, Ordering::Relaxed);
        counters.last_marked.store(report.marked, Ordering::Relaxed);
        counters
            .last_pause_micros
            .store(pause.as_micros() as u64, Ordering::Relaxed);

        log::debug!(
            target: "gc",
            "cycle {cycle}: marked {}, freed {}, retained {}, pause {:?}",
            report.marked,
            report.freed,
            report.retained,
            report.pause
        );
        report
    }
}
