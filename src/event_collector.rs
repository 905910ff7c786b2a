//! # Event Collector
//!
//! Fans three lazy sources (new blocks, pending transaction hashes, DEX
//! logs) into a single multiplexed stream of [`Event`]s.
//!
//! ## Ordering
//!
//! Per-source FIFO only. No order is guaranteed across sources; a block may
//! arrive before the log events it contains. Consumers rely on pool
//! generations, not stream order.
//!
//! ## Backpressure
//!
//! Blocks are never dropped (a skipped block would force a range replay).
//! Pending-tx hashes are best-effort and dropped when the downstream queue is
//! full. Log delivery blocks the poller, which is acceptable: the poller's
//! `from_block` only advances after successful delivery.
//!
//! ## Dedup
//!
//! Pending-tx hashes and `(tx_hash, log_index)` pairs pass through a bounded
//! window (default 10k entries, trimmed to half on overflow) guaranteeing
//! at-most-once delivery per source.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Filter, Log, H256};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::EngineResult;
use crate::gateway::ChainGateway;
use crate::metrics;
use crate::settings::Collector as CollectorSettings;
use crate::types::BlockEvent;
use crate::utils::jittered_ms;

/// One element of the multiplexed stream.
#[derive(Debug, Clone)]
pub enum Event {
    Block(BlockEvent),
    PendingTx(H256),
    Log(Log),
}

impl Event {
    pub fn source(&self) -> &'static str {
        match self {
            Event::Block(_) => "block",
            Event::PendingTx(_) => "pending_tx",
            Event::Log(_) => "log",
        }
    }
}

/// Insertion-ordered dedup window. Holds up to `capacity` keys and trims the
/// oldest half when full, so recent traffic always stays deduplicated.
pub(crate) struct DedupWindow<K: Eq + Hash + Clone> {
    seen: HashSet<K>,
    order: VecDeque<K>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone> DedupWindow<K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(2),
        }
    }

    /// Returns true when `key` was not in the window (first sighting).
    pub fn insert(&mut self, key: K) -> bool {
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > self.capacity {
            let keep_from = self.capacity / 2;
            while self.order.len() > keep_from {
                if let Some(old) = self.order.pop_front() {
                    self.seen.remove(&old);
                }
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}

/// Matches the family of node errors returned for oversized `getLogs` ranges.
fn is_oversized_response(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("response is too big")
        || lowered.contains("response too large")
        || lowered.contains("query returned more than")
        || lowered.contains("block range")
        || lowered.contains("exceeds the limit")
}

pub struct EventCollector {
    gateway: Arc<dyn ChainGateway>,
    settings: CollectorSettings,
    /// topic0 signatures to poll for; supplied by the indexer.
    topics: Vec<H256>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EventCollector {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        settings: CollectorSettings,
        topics: Vec<H256>,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            gateway,
            settings,
            topics,
            stop_tx,
            stop_rx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Starts the source pumps and returns the multiplexed receiver. Lazy in
    /// the sense that nothing is subscribed or polled until called; infinite
    /// until [`stop`](Self::stop).
    pub async fn stream(&self) -> EngineResult<mpsc::Receiver<Event>> {
        let (out_tx, out_rx) = mpsc::channel::<Event>(self.settings.pending_queue_capacity.max(256));
        let mut tasks = self.tasks.lock().await;

        // --- block pump: must not drop ----------------------------------
        let (mut blocks, block_handle) = self.gateway.watch_blocks().await?;
        let block_out = out_tx.clone();
        let mut stop = self.stop_rx.clone();
        tasks.push(tokio::spawn(async move {
            let _subscription = block_handle;
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    block = blocks.recv() => match block {
                        Some(block) => {
                            metrics::record_event("block");
                            if block_out.send(Event::Block(block)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        }));

        // --- pending-tx pump: best-effort, deduped, may drop -------------
        if self.settings.watch_pending_txs {
            match self.gateway.watch_pending_txs().await {
                Ok((mut hashes, pending_handle)) => {
                    let pending_out = out_tx.clone();
                    let mut stop = self.stop_rx.clone();
                    let mut dedup = DedupWindow::new(self.settings.dedup_capacity);
                    tasks.push(tokio::spawn(async move {
                        let _subscription = pending_handle;
                        loop {
                            tokio::select! {
                                _ = stop.changed() => break,
                                hash = hashes.recv() => match hash {
                                    Some(hash) => {
                                        if !dedup.insert(hash) {
                                            metrics::record_deduped_event();
                                            continue;
                                        }
                                        metrics::record_event("pending_tx");
                                        // Bounded queue: drop on overflow.
                                        let _ = pending_out.try_send(Event::PendingTx(hash));
                                    }
                                    None => break,
                                },
                            }
                        }
                    }));
                }
                Err(e) => {
                    info!("pending-tx stream unavailable: {}", e);
                }
            }
        }

        // --- log poller: push subscriptions absent, poll getLogs ---------
        if !self.topics.is_empty() {
            let gateway = Arc::clone(&self.gateway);
            let settings = self.settings.clone();
            let topics = self.topics.clone();
            let log_out = out_tx;
            let mut stop = self.stop_rx.clone();
            tasks.push(tokio::spawn(async move {
                let mut dedup: DedupWindow<(H256, u64)> =
                    DedupWindow::new(settings.dedup_capacity);
                let mut from_block: Option<u64> = None;
                loop {
                    let sleep_ms = jittered_ms(settings.poll_interval_ms, settings.poll_jitter_ms);
                    tokio::select! {
                        _ = stop.changed() => break,
                        _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {}
                    }

                    let head = match gateway.get_block_number().await {
                        Ok(head) => head,
                        Err(e) => {
                            debug!("log poller: head fetch failed: {}", e);
                            continue;
                        }
                    };
                    let from = match from_block {
                        Some(from) => from,
                        None => {
                            // First tick: start at the current head.
                            from_block = Some(head.saturating_add(1));
                            continue;
                        }
                    };
                    if head < from {
                        continue;
                    }
                    let to = head.min(from + settings.max_log_block_range.saturating_sub(1));

                    match Self::poll_range(gateway.as_ref(), &topics, from, to).await {
                        Some((logs, advanced_to)) => {
                            for log in logs {
                                let key = match (log.transaction_hash, log.log_index) {
                                    (Some(tx), Some(index)) => (tx, index.as_u64()),
                                    _ => continue,
                                };
                                if !dedup.insert(key) {
                                    metrics::record_deduped_event();
                                    continue;
                                }
                                metrics::record_event("log");
                                if log_out.send(Event::Log(log)).await.is_err() {
                                    return;
                                }
                            }
                            // Advance only on success.
                            from_block = Some(advanced_to + 1);
                        }
                        None => {
                            // Leave from_block unchanged; retried next tick.
                        }
                    }
                }
            }));
        }

        Ok(out_rx)
    }

    /// One poll attempt over `[from, to]`. On an oversized-response error the
    /// range is halved and retried once; returns the fetched logs together
    /// with the last block actually covered, or `None` when both attempts
    /// failed.
    async fn poll_range(
        gateway: &dyn ChainGateway,
        topics: &[H256],
        from: u64,
        to: u64,
    ) -> Option<(Vec<Log>, u64)> {
        let filter = Filter::new()
            .from_block(from)
            .to_block(to)
            .topic0(topics.to_vec());
        match gateway.get_logs(&filter).await {
            Ok(logs) => Some((logs, to)),
            Err(e) => {
                let message = e.to_string();
                if !is_oversized_response(&message) {
                    warn!("getLogs [{}, {}] failed: {}", from, to, message);
                    return None;
                }
                let halved_to = from + (to - from) / 2;
                metrics::record_log_poll_retry();
                debug!(
                    "getLogs [{}, {}] oversized, retrying halved range [{}, {}]",
                    from, to, from, halved_to
                );
                let filter = Filter::new()
                    .from_block(from)
                    .to_block(halved_to)
                    .topic0(topics.to_vec());
                match gateway.get_logs(&filter).await {
                    Ok(logs) => Some((logs, halved_to)),
                    Err(e) => {
                        warn!(
                            "getLogs [{}, {}] still failing after halving: {}",
                            from, halved_to, e
                        );
                        None
                    }
                }
            }
        }
    }

    /// Cancels all source pumps and releases their subscriptions.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_window_suppresses_duplicates() {
        let mut window = DedupWindow::new(100);
        assert!(window.insert(1u64));
        assert!(!window.insert(1u64));
        assert!(window.insert(2u64));
    }

    #[test]
    fn dedup_window_trims_to_half_on_overflow() {
        let mut window = DedupWindow::new(10);
        for i in 0..11u64 {
            window.insert(i);
        }
        // trimmed to capacity/2, then the overflowing key remains
        assert!(window.len() <= 6);
        // oldest entries were evicted and can be inserted again
        assert!(window.insert(0));
        // newest entries are still deduplicated
        assert!(!window.insert(10));
    }

    #[test]
    fn oversized_error_detection() {
        assert!(is_oversized_response("rpc error: Response is too big"));
        assert!(is_oversized_response("query returned more than 10000 results"));
        assert!(!is_oversized_response("connection refused"));
    }
}
