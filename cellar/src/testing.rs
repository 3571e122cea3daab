//! Small spaces for unit tests.
use std::time::Duration;

use crate::{Space, SpaceSettings};

/// One small block per growth step, synchronous collections.
pub fn small_settings() -> SpaceSettings {
    SpaceSettings {
        max_heap_bytes: 64 * 1024 * 1024,
        block_cells: 1024,
        refill_cells: 64,
        context_cell_budget: 256,
        dirty_trigger_cells: 4096,
        gc_interval: Duration::from_millis(2),
        stop_poll_interval: Duration::from_micros(200),
        background_collector: false,
        ..SpaceSettings::default()
    }
}

pub fn space_with(settings: SpaceSettings) -> Space {
    Space::new(settings).expect("test settings are valid")
}

pub fn test_space(background: bool) -> Space {
    space_with(SpaceSettings {
        background_collector: background,
        ..small_settings()
    })
}
