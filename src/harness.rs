//! Throughput driver: N workers pre-populate the set, meet at a barrier, then run a
//! read/update mix until the coordinator flips the stop flag.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Barrier,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Result};
use clap::{Parser, ValueEnum};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info};

use crate::{ConcurrentOrderedSet, LockFreeList, LockedList};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListKind {
    /// Hand-over-hand locked list
    Lock,
    /// Harris lock-free list
    LockFree,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "list-bench", about = "Stress test for the concurrent ordered lists")]
pub struct BenchConfig {
    /// Test duration in milliseconds
    #[arg(short, long, default_value_t = 1000)]
    pub duration: u64,
    /// Percentage of update operations
    #[arg(short, long, default_value_t = 20)]
    pub updates: u32,
    /// Key range, rounded up to a power of two
    #[arg(short, long, default_value_t = 2048)]
    pub range: u64,
    /// Number of worker threads
    #[arg(short, long, default_value_t = 1)]
    pub num_threads: usize,
    /// Which list implementation to drive
    #[arg(short, long, value_enum, default_value_t = ListKind::LockFree)]
    pub list: ListKind,
    /// Base seed for the per-worker generators; random if omitted
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self { duration: 1000, updates: 20, range: 2048, num_threads: 1, list: ListKind::LockFree, seed: None }
    }
}

impl BenchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            bail!("need at least one worker thread");
        }
        if self.duration == 0 {
            bail!("duration must be positive");
        }
        if self.updates > 100 {
            bail!("updates is a percentage, got {}", self.updates);
        }
        if self.range < 2 {
            bail!("key range must be at least 2, got {}", self.range);
        }
        Ok(())
    }

    /// Keys are drawn as `rng & key_mask`.
    pub fn key_mask(&self) -> u64 {
        self.range.next_power_of_two() - 1
    }

    /// Operation draws below this value on the 0..256 scale are lookups.
    fn read_threshold(&self) -> u32 {
        256 * (100 - self.updates) / 100
    }

    /// Keys worker `id` inserts before the timed phase: half the key space, spread evenly.
    pub fn prepopulate_count(&self, id: usize) -> u64 {
        let n = self.num_threads as u64;
        let mask = self.key_mask();
        let extra = (id as u64) < (mask / 2) % n;
        mask / (2 * n) + extra as u64
    }
}

/// Everything a worker owns for the length of a run.
#[derive(Debug)]
pub struct WorkerContext {
    pub id: usize,
    rng: StdRng,
    pub stats: WorkerStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub prepopulated: u64,
    pub ops: u64,
    pub inserts: u64,
    pub removes: u64,
}

impl WorkerContext {
    pub fn new(id: usize, seed: u64) -> Self {
        let rng = StdRng::seed_from_u64(seed.wrapping_add(id as u64));
        Self { id, rng, stats: WorkerStats::default() }
    }

    fn next_key(&mut self, mask: u64) -> u64 {
        self.rng.gen::<u64>() & mask
    }

    fn prepopulate<S: ConcurrentOrderedSet<u64>>(&mut self, set: &S, config: &BenchConfig) {
        let mask = config.key_mask();
        let target = config.prepopulate_count(self.id);
        while self.stats.prepopulated < target {
            // only count effective inserts
            if set.insert(&self.next_key(mask)) {
                self.stats.prepopulated += 1;
            }
        }
    }

    fn run<S: ConcurrentOrderedSet<u64>>(&mut self, set: &S, config: &BenchConfig, running: &AtomicBool) {
        let mask = config.key_mask();
        let read_thresh = config.read_threshold();
        // alternate insert/remove so the set size stays roughly stable
        let mut insert_next = true;
        while running.load(Ordering::Relaxed) {
            let key = self.next_key(mask);
            let op = self.rng.gen::<u32>() & 0xff;
            if op < read_thresh {
                set.contains(&key);
            } else if insert_next {
                if set.insert(&key) {
                    self.stats.inserts += 1;
                    insert_next = false;
                }
            } else if set.remove(&key) {
                self.stats.removes += 1;
                insert_next = true;
            }
            self.stats.ops += 1;
        }
    }
}

#[derive(Debug, Clone)]
pub struct BenchReport {
    pub list: ListKind,
    pub workers: Vec<WorkerStats>,
    pub elapsed: Duration,
    pub actual_size: usize,
}

impl BenchReport {
    pub fn total_ops(&self) -> u64 {
        self.workers.iter().map(|w| w.ops).sum()
    }

    /// Size implied by the workers' successful updates.
    pub fn expected_size(&self) -> i64 {
        self.workers
            .iter()
            .map(|w| (w.prepopulated + w.inserts) as i64 - w.removes as i64)
            .sum()
    }

    pub fn ops_per_sec(&self) -> f64 {
        self.total_ops() as f64 / self.elapsed.as_secs_f64().max(f64::EPSILON)
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, w) in self.workers.iter().enumerate() {
            writeln!(f, "Thread {i}")?;
            writeln!(f, "  #operations   : {}", w.ops)?;
            writeln!(f, "  #inserts      : {}", w.inserts)?;
            writeln!(f, "  #removes      : {}", w.removes)?;
        }
        writeln!(f, "Duration      : {} (ms)", self.elapsed.as_millis())?;
        writeln!(f, "#txs          : {} ({:.1} / s)", self.total_ops(), self.ops_per_sec())?;
        writeln!(f, "Expected size : {} Actual size: {}", self.expected_size(), self.actual_size)
    }
}

pub fn run_bench(config: &BenchConfig) -> Result<BenchReport> {
    config.validate()?;
    match config.list {
        ListKind::Lock => run_with::<LockedList<u64>>(config),
        ListKind::LockFree => run_with::<LockFreeList<u64>>(config),
    }
}

pub fn run_with<S: ConcurrentOrderedSet<u64>>(config: &BenchConfig) -> Result<BenchReport> {
    let set = S::new();
    let seed = config.seed.unwrap_or_else(rand::random);
    let barrier = Barrier::new(config.num_threads + 1);
    let running = AtomicBool::new(true);
    debug!(threads = config.num_threads, seed, mask = config.key_mask(), "starting workers");

    let (workers, elapsed) = thread::scope(|s| {
        let handles: Vec<_> = (0..config.num_threads)
            .map(|id| {
                let (set, barrier, running) = (&set, &barrier, &running);
                s.spawn(move || {
                    let mut ctx = WorkerContext::new(id, seed);
                    ctx.prepopulate(set, config);
                    barrier.wait();
                    ctx.run(set, config, running);
                    ctx.stats
                })
            })
            .collect();

        barrier.wait();
        debug!("all workers populated, running for {} ms", config.duration);
        let start = Instant::now();
        thread::sleep(Duration::from_millis(config.duration));
        running.store(false, Ordering::Relaxed);
        let elapsed = start.elapsed();

        let workers = handles
            .into_iter()
            .enumerate()
            .map(|(id, h)| h.join().map_err(|_| anyhow!("worker {id} panicked")))
            .collect::<Result<Vec<_>>>()?;
        Ok::<_, anyhow::Error>((workers, elapsed))
    })?;

    let report = BenchReport { list: config.list, workers, elapsed, actual_size: set.size() };
    info!(
        list = ?report.list,
        ops = report.total_ops(),
        expected = report.expected_size(),
        actual = report.actual_size,
        "bench finished"
    );
    Ok(report)
}
