//! Orphan transaction pool.
//!
//! Holds transactions whose inputs we don't know about yet, attributed to the peer
//! that sent them. The pool is bounded: oversized transactions are never admitted,
//! entries expire, and [`TxOrphanage::limit_orphans`] evicts at random.
use std::collections::hash_map::Entry;
use std::sync::Arc;

use log::*;
use parking_lot::Mutex;

use bulwark_common::bitcoin::{OutPoint, Transaction, Txid, Wtxid};
use bulwark_common::collections::{HashMap, HashSet, RandomState};
use bulwark_common::p2p::PeerId;
use bulwark_common::time::{Clock, LocalDuration, LocalTime};

/// Maximum weight of a standard transaction.
pub const MAX_STANDARD_TX_WEIGHT: usize = 400_000;
/// Weight of the smallest possible transaction input.
pub const MIN_TX_INPUT_WEIGHT: usize = 164;
/// Maximum number of inputs of an orphan we are willing to keep.
pub const MAX_ORPHAN_TX_INPUTS: usize = MAX_STANDARD_TX_WEIGHT / MIN_TX_INPUT_WEIGHT;
/// How long an orphan is kept.
pub const ORPHAN_TX_EXPIRE_TIME: LocalDuration = LocalDuration::from_mins(20);
/// Minimum time between sweeps for expired orphans.
pub const ORPHAN_TX_EXPIRE_INTERVAL: LocalDuration = LocalDuration::from_mins(5);
/// Default maximum number of orphans kept.
pub const DEFAULT_MAX_ORPHAN_TRANSACTIONS: usize = 100;

/// Orphan pool configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Transactions heavier than this are rejected.
    pub max_tx_weight: usize,
    /// Transactions with more inputs than this are rejected.
    pub max_tx_inputs: usize,
    /// How long an orphan is kept.
    pub expire_time: LocalDuration,
    /// Minimum time between sweeps for expired orphans.
    pub expire_interval: LocalDuration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_tx_weight: MAX_STANDARD_TX_WEIGHT,
            max_tx_inputs: MAX_ORPHAN_TX_INPUTS,
            expire_time: ORPHAN_TX_EXPIRE_TIME,
            expire_interval: ORPHAN_TX_EXPIRE_INTERVAL,
        }
    }
}

#[derive(Debug)]
struct Orphan {
    tx: Arc<Transaction>,
    from: PeerId,
    expires: LocalTime,
    /// Insertion order.
    sequence: u64,
    /// Position in the eviction list.
    list_pos: usize,
}

#[derive(Debug)]
struct Inner {
    orphans: HashMap<Txid, Orphan>,
    wtxids: HashMap<Wtxid, Txid>,
    /// Orphans by the outputs they spend.
    outpoints: HashMap<OutPoint, HashSet<Txid>>,
    /// All orphans, for uniform random eviction.
    list: Vec<Txid>,
    next_sequence: u64,
    next_sweep: LocalTime,
    hasher: RandomState,
    rng: fastrand::Rng,
}

impl Inner {
    fn erase(&mut self, txid: &Txid) -> Option<Orphan> {
        let orphan = self.orphans.remove(txid)?;

        for input in &orphan.tx.input {
            if let Entry::Occupied(mut e) = self.outpoints.entry(input.previous_output) {
                e.get_mut().remove(txid);

                if e.get().is_empty() {
                    e.remove();
                }
            }
        }
        self.wtxids.remove(&orphan.tx.wtxid());

        let pos = orphan.list_pos;
        self.list.swap_remove(pos);

        if let Some(moved) = self.list.get(pos) {
            if let Some(o) = self.orphans.get_mut(moved) {
                o.list_pos = pos;
            }
        }
        Some(orphan)
    }

    fn sweep(&mut self, now: LocalTime, config: &Config) -> usize {
        let mut min_expires = now + config.expire_time - config.expire_interval;
        let mut expired = Vec::new();

        for (txid, orphan) in self.orphans.iter() {
            if orphan.expires <= now {
                expired.push(*txid);
            } else {
                min_expires = min_expires.min(orphan.expires);
            }
        }
        for txid in &expired {
            self.erase(txid);
        }
        // Sweep again shortly after the next entry expires, to batch the scan.
        self.next_sweep = min_expires + config.expire_interval;

        if !expired.is_empty() {
            debug!(target: "p2p", "Erased {} orphan tx(s) due to expiration", expired.len());
        }
        expired.len()
    }
}

/// A pool of orphan transactions.
#[derive(Debug)]
pub struct TxOrphanage<C> {
    config: Config,
    inner: Mutex<Inner>,
    clock: C,
}

impl<C: Clock> TxOrphanage<C> {
    /// Create a new, empty orphan pool.
    pub fn new(config: Config, rng: fastrand::Rng, clock: C) -> Self {
        let hasher = RandomState::from(rng.clone());

        Self {
            config,
            inner: Mutex::new(Inner {
                orphans: HashMap::with_hasher(hasher.clone()),
                wtxids: HashMap::with_hasher(hasher.clone()),
                outpoints: HashMap::with_hasher(hasher.clone()),
                list: Vec::new(),
                next_sequence: 0,
                next_sweep: LocalTime::default(),
                hasher,
                rng,
            }),
            clock,
        }
    }

    /// Add an orphan transaction received from `from`.
    ///
    /// Returns `false` if the transaction was rejected for being too large. Adding a
    /// transaction that is already in the pool has no effect and returns `true`.
    pub fn add_tx(&self, tx: Arc<Transaction>, from: PeerId) -> bool {
        let txid = tx.txid();

        if tx.input.len() > self.config.max_tx_inputs {
            debug!(
                target: "p2p",
                "{}: Ignoring orphan {} with {} inputs", from, txid, tx.input.len()
            );
            return false;
        }
        let weight = tx.weight();
        if weight > self.config.max_tx_weight {
            debug!(
                target: "p2p",
                "{}: Ignoring large orphan {} (weight = {})", from, txid, weight
            );
            return false;
        }

        let mut inner = self.inner.lock();
        if inner.orphans.contains_key(&txid) {
            return true;
        }
        let expires = self.clock.local_time() + self.config.expire_time;
        let sequence = inner.next_sequence;
        let list_pos = inner.list.len();

        inner.next_sequence += 1;
        inner.list.push(txid);
        inner.wtxids.insert(tx.wtxid(), txid);

        for input in &tx.input {
            let hasher = inner.hasher.clone();

            inner
                .outpoints
                .entry(input.previous_output)
                .or_insert_with(|| HashSet::with_hasher(hasher))
                .insert(txid);
        }
        inner.orphans.insert(
            txid,
            Orphan {
                tx,
                from,
                expires,
                sequence,
                list_pos,
            },
        );
        trace!(
            target: "p2p",
            "{}: Stored orphan {} (pool size = {})", from, txid, inner.orphans.len()
        );
        true
    }

    /// Remove an orphan. Returns `true` if it was in the pool.
    pub fn erase_tx(&self, txid: &Txid) -> bool {
        let erased = self.inner.lock().erase(txid).is_some();

        if erased {
            trace!(target: "p2p", "Erased orphan {}", txid);
        }
        erased
    }

    /// Remove all orphans received from a peer. Returns the number removed.
    pub fn erase_for_peer(&self, peer: PeerId) -> usize {
        let mut inner = self.inner.lock();
        let txids = inner
            .orphans
            .iter()
            .filter(|(_, o)| o.from == peer)
            .map(|(txid, _)| *txid)
            .collect::<Vec<_>>();

        for txid in &txids {
            inner.erase(txid);
        }
        if !txids.is_empty() {
            debug!(target: "p2p", "{}: Erased {} orphan tx(s)", peer, txids.len());
        }
        txids.len()
    }

    /// Remove orphans that were included in a block, or that conflict with it.
    /// Returns the number removed.
    pub fn erase_for_block(&self, txdata: &[Transaction]) -> usize {
        let mut inner = self.inner.lock();
        let mut erase = Vec::new();

        for tx in txdata {
            for input in &tx.input {
                if let Some(txids) = inner.outpoints.get(&input.previous_output) {
                    erase.extend(txids.iter().copied());
                }
            }
        }
        let erased = erase
            .iter()
            .filter(|txid| inner.erase(txid).is_some())
            .count();

        if erased > 0 {
            debug!(target: "p2p", "Erased {} orphan tx(s) included or conflicted by block", erased);
        }
        erased
    }

    /// Remove expired orphans, then evict random ones until at most `max` remain.
    /// Returns the number of orphans removed.
    pub fn limit_orphans(&self, max: usize) -> usize {
        let now = self.clock.local_time();
        let mut inner = self.inner.lock();
        let mut removed = 0;

        if inner.next_sweep <= now {
            removed += inner.sweep(now, &self.config);
        }

        let mut evicted = 0;
        while inner.list.len() > max {
            let pos = inner.rng.usize(..inner.list.len());
            let txid = inner.list[pos];

            inner.erase(&txid);
            evicted += 1;
        }
        if evicted > 0 {
            debug!(target: "p2p", "Orphan pool full, evicted {} tx(s)", evicted);
        }
        removed + evicted
    }

    /// Pick an orphan uniformly at random.
    pub fn random_orphan(&self) -> Option<Arc<Transaction>> {
        let inner = self.inner.lock();

        if inner.list.is_empty() {
            return None;
        }
        let pos = inner.rng.usize(..inner.list.len());

        inner
            .orphans
            .get(&inner.list[pos])
            .map(|o| o.tx.clone())
    }

    /// Orphans spending any output of `tx`, in the order they were added, along with
    /// the peer each came from. These may now be valid.
    pub fn orphans_spending(&self, tx: &Transaction) -> Vec<(Arc<Transaction>, PeerId)> {
        let inner = self.inner.lock();
        let txid = tx.txid();
        let mut found = (0..tx.output.len() as u32)
            .filter_map(|vout| inner.outpoints.get(&OutPoint { txid, vout }))
            .flatten()
            .filter_map(|txid| inner.orphans.get(txid))
            .map(|o| (o.sequence, o.tx.clone(), o.from))
            .collect::<Vec<_>>();

        found.sort_by_key(|(sequence, _, _)| *sequence);
        found.dedup_by_key(|(sequence, _, _)| *sequence);
        found.into_iter().map(|(_, tx, from)| (tx, from)).collect()
    }

    /// Get an orphan and the peer it came from.
    pub fn get(&self, txid: &Txid) -> Option<(Arc<Transaction>, PeerId)> {
        self.inner
            .lock()
            .orphans
            .get(txid)
            .map(|o| (o.tx.clone(), o.from))
    }

    /// Check whether an orphan with this txid is in the pool.
    pub fn contains(&self, txid: &Txid) -> bool {
        self.inner.lock().orphans.contains_key(txid)
    }

    /// Check whether an orphan with this witness txid is in the pool.
    pub fn contains_wtxid(&self, wtxid: &Wtxid) -> bool {
        self.inner.lock().wtxids.contains_key(wtxid)
    }

    /// Number of orphans in the pool.
    pub fn len(&self) -> usize {
        self.inner.lock().orphans.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
