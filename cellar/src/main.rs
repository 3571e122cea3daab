use clap::Parser as ClapParser;
use std::{process, thread, time::Duration};

use cellar::{ExhaustionPolicy, List, MutatorThread, Space, SpaceSettings, Tuple, Value};

/// Allocation stress driver for the cell space and its collector.
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Mutator threads
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Short lived lists each thread builds
    #[arg(long, default_value_t = 20_000)]
    iterations: i64,

    /// Keep every n-th list reachable from the thread's root list
    #[arg(long, default_value_t = 100)]
    retain_every: i64,

    /// Heap ceiling in megabytes
    #[arg(long, default_value_t = 64)]
    max_heap_mb: usize,

    /// Collector wake-up interval in milliseconds
    #[arg(long, default_value_t = 20)]
    interval_ms: u64,

    /// Abort instead of waiting for the collector when the heap is full
    #[arg(long)]
    abort_on_exhaustion: bool,
}

impl Cli {
    fn settings(&self) -> SpaceSettings {
        SpaceSettings {
            max_heap_bytes: self.max_heap_mb * 1024 * 1024,
            gc_interval: Duration::from_millis(self.interval_ms.max(1)),
            on_exhaustion: if self.abort_on_exhaustion {
                ExhaustionPolicy::Abort
            } else {
                ExhaustionPolicy::Block
            },
            ..SpaceSettings::default()
        }
    }
}

/// Builds garbage, keeps a fraction of it and returns how many retained lists read
/// back correctly.
fn mutate(mut thread: MutatorThread, seed: i64, iterations: i64, retain_every: i64) -> i64 {
    let mut ctx = thread.enter();
    let mut retained = List::new();
    let slot = ctx.push_local(retained.as_value());

    for i in 0..iterations {
        let value = ctx.call_with(|callee| {
            let values: Vec<Value> = (0..8).map(|k| Value::from_i64(seed + i + k)).collect();
            let list = List::from_values(callee, &values);
            if i % 7 == 0 {
                Tuple::from_list(callee, list).as_value()
            } else {
                list.as_value()
            }
        });
        if retain_every > 0 && i % retain_every == 0 {
            retained = retained.append(&mut ctx, value);
            ctx.set_local(slot, retained.as_value());
        }
        ctx.checkpoint();
    }

    let mut intact = 0;
    for (n, value) in retained.to_vec(&ctx).into_iter().enumerate() {
        let i = n as i64 * retain_every;
        let first = match (List::from_value(value), Tuple::from_value(value)) {
            (Some(list), _) => list.get_at(&ctx, 0),
            (_, Some(tuple)) => tuple.get_at(&ctx, 0),
            _ => Value::NONE,
        };
        if first == Value::from_i64(seed + i) {
            intact += 1;
        } else {
            log::error!(
                "retained value {n} of thread {} is corrupt: {first:?}",
                ctx.thread_id()
            );
        }
    }
    intact
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let space = match Space::new(cli.settings()) {
        Ok(space) => space,
        Err(err) => {
            eprintln!("Error creating space: {err}");
            process::exit(1);
        }
    };

    let workers: Vec<_> = (0..cli.threads)
        .map(|t| {
            let mutator = space.register_thread();
            let seed = t as i64 * 1_000_000;
            let (iterations, retain_every) = (cli.iterations, cli.retain_every);
            thread::Builder::new()
                .name(format!("mutator-{t}"))
                .spawn(move || mutate(mutator, seed, iterations, retain_every))
        })
        .collect();

    let mut intact = 0;
    for worker in workers {
        let joined = match worker {
            Ok(handle) => handle.join(),
            Err(err) => {
                eprintln!("Error spawning mutator: {err}");
                process::exit(1);
            }
        };
        match joined {
            Ok(count) => intact += count,
            Err(_) => {
                eprintln!("Error: a mutator thread panicked");
                process::exit(1);
            }
        }
    }

    space.collect();
    let stats = space.stats();
    let expected = if cli.retain_every > 0 {
        cli.threads as i64 * ((cli.iterations + cli.retain_every - 1) / cli.retain_every)
    } else {
        0
    };
    println!("retained lists intact: {intact}/{expected}");
    println!("collections:           {}", stats.cycles);
    println!("cells freed:           {}", stats.cells_freed);
    println!("cells retained:        {}", stats.cells_retained);
    println!("free cells:            {}", stats.free_cells);
    println!("heap bytes:            {}", stats.heap_bytes);
    println!("last pause:            {:?}", stats.last_pause);

    if intact != expected {
        process::exit(1);
    }
}
