//! The CPU worker state machine: Idle -> Mining -> Refreshing ->
//! Mining -> ... -> Stopped. Each worker holds a read-only reference to
//! the shared block state and its own "new block" flag; the stop flag is
//! shared by every worker so the coordinator can halt the whole pool with
//! one store.
//!
//! Grounded in `mining_thread_loop` (`consensus::mining`):
//! same `Arc<AtomicBool>` stop signal, same crossbeam-channel solution
//! queue, same per-tick stats push. The teacher reads one shared
//! `Option<MiningWork>` under an `RwLock`; here the worker never holds the
//! lock longer than a `snapshot()` call, matching the shared state's "short lock
//! acquisition" requirement.

#[cfg(feature = "cuda")]
pub mod gpu;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use rand::Rng;

use crate::block::SharedBlockState;
use crate::difficulty::{margin, meets};
use crate::hash::seal;
use crate::types::{BestCandidate, Solution};

/// Handle the coordinator keeps per spawned worker: the join handle plus
/// the flag used to signal "a new block has arrived" (ordering
/// guarantees: the coordinator writes shared state, *then* sets this).
pub struct WorkerHandle {
    pub(crate) new_block: Arc<AtomicBool>,
    join: thread::JoinHandle<()>,
}

impl WorkerHandle {
    pub fn signal_new_block(&self) {
        self.new_block.store(true, Ordering::SeqCst);
    }

    pub fn join(self) {
        let _ = self.join.join();
    }
}

/// Everything one CPU worker needs, owned exclusively by its thread.
pub struct Worker {
    pub worker_id: usize,
    pub num_workers: usize,
    pub update_interval: u64,
    pub shared: Arc<SharedBlockState>,
    pub stop: Arc<AtomicBool>,
    pub new_block: Arc<AtomicBool>,
    pub solution_tx: Sender<Solution>,
    pub best_tx: Sender<BestCandidate>,
    pub time_tx: Sender<Duration>,
}

/// Spawns one worker thread and returns the coordinator-side handle.
pub fn spawn(worker: Worker) -> WorkerHandle {
    let new_block = Arc::clone(&worker.new_block);
    let worker_id = worker.worker_id;
    let join = thread::Builder::new()
        .name(format!("pow-worker-{worker_id}"))
        .spawn(move || worker.run())
        .expect("failed to spawn PoW worker thread");
    WorkerHandle { new_block, join }
}

impl Worker {
    /// A starting nonce unique to this worker within the current block
    /// (the `worker_id` offset), combined with a random base so that a
    /// restart on the *next* block never retraces the same prefix two
    /// participants (or two of this process's own workers across block
    /// changes) might have tried.
    fn randomized_start(&self) -> u64 {
        let base: u64 = rand::thread_rng().gen();
        base.wrapping_add((self.worker_id as u64).wrapping_mul(self.update_interval))
    }

    /// Takes the shared lock, reads the current block, and clears the
    /// new-block flag (the Refreshing state).
    fn refresh(&self) -> (u64, [u8; crate::hash::BLOCK_HASH_ASCII_LEN], u128) {
        let snapshot = self.shared.snapshot();
        self.new_block.store(false, Ordering::SeqCst);
        snapshot
    }

    /// Sweeps `[nonce_start, nonce_end)`, returning the best near-miss
    /// seen (if any) and pushing any valid solution found along the way.
    fn sweep(
        &self,
        nonce_start: u64,
        nonce_end: u64,
        block_number: u64,
        block_hash_ascii: &[u8],
        difficulty: u128,
    ) -> Option<BestCandidate> {
        let mut best: Option<BestCandidate> = None;
        let mut nonce = nonce_start;
        while nonce != nonce_end {
            let candidate_seal = seal(nonce, block_hash_ascii);
            if meets(&candidate_seal, difficulty) {
                let solution = Solution {
                    nonce,
                    block_number,
                    difficulty,
                    seal: candidate_seal,
                };
                tracing::info!(worker = self.worker_id, nonce, block_number, "found solution");
                // The coordinator decides when to stop; this worker keeps
                // sweeping until it observes the stop signal itself.
                let _ = self.solution_tx.send(solution);
            } else if let Some(m) = margin(&candidate_seal, difficulty) {
                if best.as_ref().map_or(true, |b| m < b.margin) {
                    best = Some(BestCandidate { margin: m, seal: candidate_seal });
                }
            }
            nonce = nonce.wrapping_add(1);
        }
        best
    }

    /// Runs Idle -> Mining -> Refreshing -> ... -> Stopped to completion.
    pub fn run(self) {
        // Idle: wait for the initial new-block signal. The coordinator
        // raises it on every worker before spawning, so this is normally
        // instantaneous.
        while !self.new_block.load(Ordering::SeqCst) {
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }

        let (mut block_number, mut block_hash_ascii, mut difficulty) = self.refresh();
        let mut nonce_start = self.randomized_start();
        let mut nonce_end = nonce_start.wrapping_add(self.update_interval);

        let step = self.update_interval.wrapping_mul(self.num_workers as u64);

        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            if self.new_block.load(Ordering::SeqCst) {
                let (bn, bh, d) = self.refresh();
                block_number = bn;
                block_hash_ascii = bh;
                difficulty = d;
                nonce_start = self.randomized_start();
                nonce_end = nonce_start.wrapping_add(self.update_interval);
            }

            let tick_start = Instant::now();
            let best = self.sweep(nonce_start, nonce_end, block_number, &block_hash_ascii, difficulty);
            if let Some(best) = best {
                let _ = self.best_tx.send(best);
            }
            let _ = self.time_tx.send(tick_start.elapsed());

            nonce_start = nonce_start.wrapping_add(step);
            nonce_end = nonce_end.wrapping_add(step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockContext;

    fn trivial_shared_state() -> Arc<SharedBlockState> {
        Arc::new(SharedBlockState::new(&BlockContext {
            block_number: 1,
            block_hash: [0u8; 32],
            difficulty: 1,
        }))
    }

    fn test_worker(shared: Arc<SharedBlockState>, stop: Arc<AtomicBool>) -> Worker {
        let (solution_tx, _) = crossbeam_channel::unbounded();
        let (best_tx, _) = crossbeam_channel::unbounded();
        let (time_tx, _) = crossbeam_channel::unbounded();
        Worker {
            worker_id: 0,
            num_workers: 1,
            update_interval: 16,
            shared,
            stop,
            new_block: Arc::new(AtomicBool::new(true)),
            solution_tx,
            best_tx,
            time_tx,
        }
    }

    #[test]
    fn difficulty_one_always_yields_a_solution_in_one_sweep() {
        let shared = trivial_shared_state();
        let (block_number, block_hash_ascii, difficulty) = shared.snapshot();
        let (solution_tx, solution_rx) = crossbeam_channel::unbounded();
        let worker = Worker {
            solution_tx,
            ..test_worker(Arc::clone(&shared), Arc::new(AtomicBool::new(false)))
        };
        let best = worker.sweep(0, 16, block_number, &block_hash_ascii, difficulty);
        // Every seal satisfies difficulty 1, so the sweep never computes a
        // margin, but the solution channel must have received all 16.
        assert!(best.is_none());
        assert_eq!(solution_rx.try_iter().count(), 16);
    }

    #[test]
    fn worker_stops_promptly_when_stop_flag_is_set() {
        let shared = trivial_shared_state();
        let stop = Arc::new(AtomicBool::new(true));
        let worker = test_worker(shared, Arc::clone(&stop));
        // new_block is already true and stop is already true: run() must
        // return without looping forever.
        worker.run();
    }

    #[test]
    fn randomized_start_differs_by_worker_id_offset() {
        let shared = trivial_shared_state();
        let stop = Arc::new(AtomicBool::new(false));
        let mut w0 = test_worker(Arc::clone(&shared), Arc::clone(&stop));
        w0.worker_id = 0;
        w0.num_workers = 4;
        let mut w1 = test_worker(shared, stop);
        w1.worker_id = 1;
        w1.num_workers = 4;
        // Not a strict inequality test (both draw a random base), but the
        // offset term must differ by exactly update_interval.
        assert_eq!(
            w1.worker_id as u64 * w1.update_interval - w0.worker_id as u64 * w0.update_interval,
            w1.update_interval
        );
    }
}
