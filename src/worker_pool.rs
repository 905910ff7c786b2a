//! # Worker Pool
//!
//! Fixed-size pool of evaluation workers over one shared FIFO queue.
//!
//! Each idle worker takes the next opportunity, marks itself busy, runs the
//! evaluator (optimizer + simulator, pure CPU) and invokes the profitable
//! callback when the result clears the threshold. Submitting an opportunity
//! wakes at most one idle worker.
//!
//! Workers may complete out of enqueue order and the callback is unordered;
//! the only global ordering in the system is per-pool state generations.
//!
//! A panicking evaluation (logical invariant violation) is caught at the
//! worker boundary, logged at ERROR, and the worker returns to idle. `stop()`
//! finishes in-flight work and leaves pending items queued for the next
//! `start()`.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ethers::types::U256;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::finder::ArbitrageOpportunity;
use crate::metrics;
use crate::optimizer::OptimizedTrade;

/// Evaluates one candidate; pure CPU, must not block on I/O.
pub type Evaluator = dyn Fn(&ArbitrageOpportunity) -> OptimizedTrade + Send + Sync;
/// Invoked with the candidate and its optimized net profit.
pub type ProfitableCallback = dyn Fn(ArbitrageOpportunity, OptimizedTrade) + Send + Sync;

pub struct WorkerPool {
    size: usize,
    min_profit_threshold: U256,
    queue: Arc<Mutex<VecDeque<ArbitrageOpportunity>>>,
    notify: Arc<Notify>,
    running: Arc<AtomicBool>,
    busy: Arc<AtomicUsize>,
    evaluator: Arc<Evaluator>,
    on_profitable: Arc<ProfitableCallback>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        size: usize,
        min_profit_threshold: U256,
        evaluator: Arc<Evaluator>,
        on_profitable: Arc<ProfitableCallback>,
    ) -> Self {
        Self {
            size: size.max(1),
            min_profit_threshold,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            notify: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            busy: Arc::new(AtomicUsize::new(0)),
            evaluator,
            on_profitable,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the workers. Items left queued by a previous `stop()` are
    /// picked up immediately.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut workers = self.lock_workers();
        for worker_id in 0..self.size {
            let queue = Arc::clone(&self.queue);
            let notify = Arc::clone(&self.notify);
            let running = Arc::clone(&self.running);
            let busy = Arc::clone(&self.busy);
            let evaluator = Arc::clone(&self.evaluator);
            let on_profitable = Arc::clone(&self.on_profitable);
            let threshold = self.min_profit_threshold;

            workers.push(tokio::spawn(async move {
                debug!("worker {} up", worker_id);
                loop {
                    let next = {
                        let mut queue = queue.lock().unwrap_or_else(|p| p.into_inner());
                        queue.pop_front()
                    };
                    match next {
                        Some(opportunity) => {
                            busy.fetch_add(1, Ordering::SeqCst);
                            let result = catch_unwind(AssertUnwindSafe(|| evaluator(&opportunity)));
                            match result {
                                Ok(trade) => {
                                    if trade.quote.profit > threshold {
                                        metrics::record_opportunity("profitable");
                                        on_profitable(opportunity, trade);
                                    }
                                }
                                Err(panic) => {
                                    error!(
                                        "worker {}: evaluation panicked on opportunity: {:?}",
                                        worker_id, panic
                                    );
                                }
                            }
                            busy.fetch_sub(1, Ordering::SeqCst);
                        }
                        None => {
                            if !running.load(Ordering::SeqCst) {
                                break;
                            }
                            // Register interest before re-checking, so a
                            // submit or stop landing in between is not lost.
                            let notified = notify.notified();
                            tokio::pin!(notified);
                            notified.as_mut().enable();
                            let queue_empty = {
                                let queue = queue.lock().unwrap_or_else(|p| p.into_inner());
                                queue.is_empty()
                            };
                            if !queue_empty {
                                continue;
                            }
                            if !running.load(Ordering::SeqCst) {
                                break;
                            }
                            notified.await;
                        }
                    }
                }
                debug!("worker {} down", worker_id);
            }));
        }
        info!("⚙️ worker pool started with {} workers", self.size);
    }

    /// Enqueues a candidate and wakes at most one idle worker.
    pub fn submit(&self, opportunity: ArbitrageOpportunity) {
        {
            let mut queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
            queue.push_back(opportunity);
        }
        self.notify.notify_one();
    }

    /// Drains in-flight work and parks the pool. Pending queue items survive
    /// for the next `start()`.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();
        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.lock_workers();
            guard.drain(..).collect()
        };
        for worker in workers {
            let _ = worker.await;
        }
        info!("worker pool stopped, {} items pending", self.queue_size());
    }

    pub fn queue_size(&self) -> usize {
        self.queue.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn busy_count(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pools::Pool;
    use crate::simulator::Quote;
    use crate::state_manager::{PoolStateManager, StateEvent};
    use crate::token_graph::{Path, TokenGraph};
    use crate::types::{OpportunitySource, Protocol};
    use ethers::types::Address;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn sample_path() -> Path {
        let manager = PoolStateManager::new(999, std::env::temp_dir());
        let p1 = Pool::new(addr(1), Protocol::HyperSwapV2, addr(10), addr(11))
            .unwrap()
            .with_reserves(U256::from(1_000_000u64), U256::from(2_000_000u64));
        let p2 = Pool::new(addr(2), Protocol::HyperSwapV2, addr(11), addr(10))
            .unwrap()
            .with_reserves(U256::from(1_000_000u64), U256::from(3_000_000u64));
        manager.apply_event(StateEvent::PoolCreated(p1)).unwrap();
        manager.apply_event(StateEvent::PoolCreated(p2)).unwrap();
        let graph = TokenGraph::build(&manager);
        let out_edge = graph
            .edges_between(addr(10), addr(11))
            .into_iter()
            .find(|edge| edge.pool == addr(1))
            .unwrap()
            .clone();
        let back_edge = graph
            .edges_between(addr(11), addr(10))
            .into_iter()
            .find(|edge| edge.pool == addr(2))
            .unwrap()
            .clone();
        Path::new(vec![out_edge, back_edge]).unwrap()
    }

    fn opportunity_with_marker(marker: u64) -> ArbitrageOpportunity {
        let mut opportunity =
            ArbitrageOpportunity::from_cycle(sample_path(), OpportunitySource::Public);
        opportunity.input_amount = U256::from(marker);
        opportunity
    }

    async fn wait_for_drain(pool: &WorkerPool) {
        for _ in 0..200 {
            if pool.queue_size() == 0 && pool.busy_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "pool never drained: queue={} busy={}",
            pool.queue_size(),
            pool.busy_count()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn drains_and_reports_exactly_the_profitable_ones() {
        // markers < 10 are "profitable": evaluator keys off input_amount
        let evaluator: Arc<Evaluator> = Arc::new(|op: &ArbitrageOpportunity| {
            let marker = op.input_amount.low_u64();
            let profit = if marker < 10 {
                U256::from(1_000_000u64)
            } else {
                U256::zero()
            };
            OptimizedTrade {
                input_amount: op.input_amount,
                quote: Quote {
                    amount_out: profit,
                    gas_estimate: U256::zero(),
                    gas_cost: U256::zero(),
                    profit,
                },
            }
        });
        let hits = Arc::new(AtomicU64::new(0));
        let hits_clone = Arc::clone(&hits);
        let callback: Arc<ProfitableCallback> = Arc::new(move |_, _| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        let pool = WorkerPool::new(4, U256::zero(), evaluator, callback);
        pool.start();
        for marker in 0..100u64 {
            pool.submit(opportunity_with_marker(marker));
        }
        wait_for_drain(&pool).await;
        pool.stop().await;

        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert_eq!(pool.queue_size(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn panicking_evaluation_does_not_kill_workers() {
        let evaluator: Arc<Evaluator> = Arc::new(|op: &ArbitrageOpportunity| {
            if op.input_amount.low_u64() == 1 {
                panic!("induced invariant violation");
            }
            OptimizedTrade {
                input_amount: op.input_amount,
                quote: Quote {
                    amount_out: U256::one(),
                    gas_estimate: U256::zero(),
                    gas_cost: U256::zero(),
                    profit: U256::one(),
                },
            }
        });
        let hits = Arc::new(AtomicU64::new(0));
        let hits_clone = Arc::clone(&hits);
        let callback: Arc<ProfitableCallback> = Arc::new(move |_, _| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        let pool = WorkerPool::new(2, U256::zero(), evaluator, callback);
        pool.start();
        pool.submit(opportunity_with_marker(1)); // panics
        pool.submit(opportunity_with_marker(2));
        pool.submit(opportunity_with_marker(3));
        wait_for_drain(&pool).await;
        pool.stop().await;

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_preserves_pending_items() {
        let evaluator: Arc<Evaluator> = Arc::new(|_| OptimizedTrade::default());
        let callback: Arc<ProfitableCallback> = Arc::new(|_, _| {});
        let pool = WorkerPool::new(1, U256::zero(), evaluator, callback);

        // not started: submissions stay queued
        pool.submit(opportunity_with_marker(1));
        pool.submit(opportunity_with_marker(2));
        assert_eq!(pool.queue_size(), 2);

        pool.start();
        wait_for_drain(&pool).await;
        pool.stop().await;
        assert!(!pool.is_running());
    }
}
