//! Peer manager. Decides which peers to keep, which to drop and which to punish.
//!
//! The peer manager keeps ephemeral state for every connected peer and runs two
//! algorithms over it:
//!
//!   1. *Stale-tip outbound eviction*. Outbound peers that fail to keep up with our
//!      chain are probed with a `getheaders` and dropped if they don't catch up. When
//!      our own tip looks stale, we ask for an extra outbound peer, and once we have
//!      more peers than we want, the least useful one is evicted.
//!
//!   2. *Misbehavior scoring*. Peers accumulate misbehavior points. Once a peer
//!      reaches the discouragement threshold it is disconnected, and its address is
//!      discouraged, along with every other peer connected from that address.
//!
//! The manager performs no I/O: messages, disconnects and events are pushed to an
//! [`Outbox`], and disconnect intent is also visible through [`PeerInfo`].
//!
//! Locks are always taken in this order: `state`, then the `peers` map, then a single
//! peer. A per-peer lock is never held while acquiring another lock.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{self, AtomicU64, AtomicUsize};
use std::sync::Arc;

use log::*;
use parking_lot::{Mutex, RwLock};

use bulwark_common::bitcoin::hashes::Hash as _;
use bulwark_common::bitcoin::util::uint::Uint256;
use bulwark_common::bitcoin::{BlockHash, Transaction};
use bulwark_common::network::Network;
use bulwark_common::p2p::{ConnectionType, NetAddr, Permissions, PeerId, Service};
use bulwark_common::time::{Clock, LocalDuration, LocalTime};

use crate::banman::Discourage;
use crate::event::Event;
use crate::orphanage::{self, TxOrphanage};
use crate::output::{DisconnectReason, Outbox};


/// Misbehavior score at which a peer is discouraged.
pub const DISCOURAGEMENT_THRESHOLD: u32 = 100;
/// Number of outbound full-relay peers we want.
pub const MAX_OUTBOUND_FULL_RELAY: usize = 8;
/// Number of block-relay-only peers we want.
pub const MAX_BLOCK_RELAY_ONLY: usize = 2;
/// Maximum number of outbound full-relay peers protected from eviction.
pub const MAX_PROTECTED_OUTBOUND: usize = 4;
/// Minimum time an outbound peer must be connected before it can be evicted.
pub const MINIMUM_CONNECT_TIME: LocalDuration = LocalDuration::from_secs(30);
/// How often we check whether our tip is stale.
pub const STALE_CHECK_INTERVAL: LocalDuration = LocalDuration::from_mins(10);
/// Time an outbound peer has to show us a chain with as much work as ours.
pub const CHAIN_SYNC_TIMEOUT: LocalDuration = LocalDuration::from_mins(20);
/// Time an outbound peer has to respond to our `getheaders` probe.
pub const HEADERS_RESPONSE_TIME: LocalDuration = LocalDuration::from_mins(2);

/// Accumulated proof-of-work of a chain.
pub type Work = Uint256;

/// A block, identified by hash, and the total work of the chain ending in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tip {
    /// Block hash.
    pub hash: BlockHash,
    /// Chain work up to and including this block.
    pub work: Work,
}

impl Tip {
    /// Create a new tip.
    pub fn new(hash: BlockHash, work: Work) -> Self {
        Self { hash, work }
    }
}

/// Peer manager configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Misbehavior score at which a peer is discouraged.
    pub discouragement_threshold: u32,
    /// Number of outbound full-relay peers we want.
    pub max_outbound_full_relay: usize,
    /// Number of block-relay-only peers we want.
    pub max_block_relay_only: usize,
    /// Maximum number of outbound full-relay peers protected from eviction.
    pub max_protected_outbound: usize,
    /// Minimum time an outbound peer must be connected before it can be evicted.
    pub minimum_connect_time: LocalDuration,
    /// How often we check whether our tip is stale.
    pub stale_check_interval: LocalDuration,
    /// Time an outbound peer has to catch up with our tip.
    pub chain_sync_timeout: LocalDuration,
    /// Time an outbound peer has to respond to a `getheaders` probe.
    pub headers_response_time: LocalDuration,
    /// Expected time between blocks.
    pub pow_target_spacing: LocalDuration,
    /// Maximum number of orphan transactions kept.
    pub max_orphan_transactions: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::from(Network::default())
    }
}

impl From<Network> for Config {
    fn from(network: Network) -> Self {
        Self {
            discouragement_threshold: DISCOURAGEMENT_THRESHOLD,
            max_outbound_full_relay: MAX_OUTBOUND_FULL_RELAY,
            max_block_relay_only: MAX_BLOCK_RELAY_ONLY,
            max_protected_outbound: MAX_PROTECTED_OUTBOUND,
            minimum_connect_time: MINIMUM_CONNECT_TIME,
            stale_check_interval: STALE_CHECK_INTERVAL,
            chain_sync_timeout: CHAIN_SYNC_TIMEOUT,
            headers_response_time: HEADERS_RESPONSE_TIME,
            pow_target_spacing: network.pow_target_spacing(),
            max_orphan_transactions: orphanage::DEFAULT_MAX_ORPHAN_TRANSACTIONS,
        }
    }
}

/// Chain-sync timeout state of an outbound peer.
#[derive(Debug, Default, Clone, Copy)]
struct ChainSync {
    /// Deadline for the peer to catch up to `work_header`.
    timeout: Option<LocalTime>,
    /// Our tip at the time the deadline was set.
    work_header: Option<Tip>,
    /// Whether we've sent a `getheaders` probe since the deadline passed.
    sent_getheaders: bool,
}

#[derive(Debug)]
struct Peer {
    id: PeerId,
    addr: Service,
    conn_type: ConnectionType,
    permissions: Permissions,
    connected: LocalTime,
    best_known: Option<Tip>,
    last_block_announcement: Option<LocalTime>,
    last_block_time: Option<LocalTime>,
    blocks_in_flight: usize,
    sync_started: bool,
    chain_sync: ChainSync,
    protected: bool,
    misbehavior: u32,
    should_discourage: bool,
    should_disconnect: bool,
    /// Set once the peer is removed. Nothing may change a finalized peer.
    finalized: bool,
}

impl Peer {
    fn new(
        id: PeerId,
        addr: Service,
        conn_type: ConnectionType,
        permissions: Permissions,
        connected: LocalTime,
    ) -> Self {
        Self {
            id,
            addr,
            conn_type,
            permissions,
            connected,
            best_known: None,
            last_block_announcement: None,
            last_block_time: None,
            blocks_in_flight: 0,
            sync_started: false,
            chain_sync: ChainSync::default(),
            protected: false,
            misbehavior: 0,
            should_discourage: false,
            should_disconnect: false,
            finalized: false,
        }
    }

    /// Peers we never punish for misbehavior.
    fn is_exempt(&self) -> bool {
        self.permissions.noban || self.conn_type.is_manual()
    }

    /// Flag the peer for disconnection. Returns `true` if it wasn't already flagged.
    fn flag_disconnect(&mut self) -> bool {
        debug_assert!(!self.finalized, "{}: Peer is finalized", self.id);

        if self.should_disconnect {
            return false;
        }
        self.should_disconnect = true;
        true
    }

    fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id,
            addr: self.addr,
            conn_type: self.conn_type,
            permissions: self.permissions,
            connected: self.connected,
            best_known: self.best_known,
            last_block_announcement: self.last_block_announcement,
            last_block_time: self.last_block_time,
            blocks_in_flight: self.blocks_in_flight,
            sync_started: self.sync_started,
            protected: self.protected,
            misbehavior: self.misbehavior,
            should_discourage: self.should_discourage,
            should_disconnect: self.should_disconnect,
        }
    }
}

/// A snapshot of a peer's state.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Peer id.
    pub id: PeerId,
    /// Remote address.
    pub addr: Service,
    /// Connection type.
    pub conn_type: ConnectionType,
    /// Operator-granted permissions.
    pub permissions: Permissions,
    /// Time the peer was registered.
    pub connected: LocalTime,
    /// Best block the peer is known to have.
    pub best_known: Option<Tip>,
    /// Last time the peer announced a block with more work than our tip.
    pub last_block_announcement: Option<LocalTime>,
    /// Last time the peer sent us a block we didn't have.
    pub last_block_time: Option<LocalTime>,
    /// Blocks requested from the peer and not yet received.
    pub blocks_in_flight: usize,
    /// Whether we've started syncing headers with the peer.
    pub sync_started: bool,
    /// Whether the peer is protected from eviction.
    pub protected: bool,
    /// Misbehavior score.
    pub misbehavior: u32,
    /// Whether the peer's address is pending discouragement.
    pub should_discourage: bool,
    /// Whether the peer should be disconnected. Never reset.
    pub should_disconnect: bool,
}

#[derive(Debug)]
struct State {
    /// Our active chain tip.
    tip: Option<Tip>,
    /// Last time our tip changed.
    last_tip_update: Option<LocalTime>,
    /// Next time we check whether our tip is stale.
    stale_check_time: LocalTime,
    /// Whether we should connect to an extra outbound peer.
    try_new_outbound: bool,
}

/// Manages connected peers.
pub struct PeerManager<B, C> {
    /// Peer manager configuration.
    pub config: Config,

    state: Mutex<State>,
    peers: RwLock<BTreeMap<PeerId, Arc<Mutex<Peer>>>>,
    next_id: AtomicU64,
    /// Number of peers we've started syncing headers with.
    sync_started: AtomicUsize,
    banman: Option<B>,
    orphanage: Arc<TxOrphanage<C>>,
    outbox: Outbox,
    clock: C,
}

impl<B: Discourage, C: Clock> PeerManager<B, C> {
    /// Create a new peer manager.
    pub fn new(
        config: Config,
        banman: Option<B>,
        orphanage: Arc<TxOrphanage<C>>,
        clock: C,
        outbox: Outbox,
    ) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                tip: None,
                last_tip_update: None,
                stale_check_time: LocalTime::default(),
                try_new_outbound: false,
            }),
            peers: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(0),
            sync_started: AtomicUsize::new(0),
            banman,
            orphanage,
            outbox,
            clock,
        }
    }

    /// Register a new peer connection. Returns the peer's id.
    pub fn peer_connected(
        &self,
        addr: Service,
        conn_type: ConnectionType,
        permissions: Permissions,
    ) -> PeerId {
        let id = self.next_id.fetch_add(1, atomic::Ordering::SeqCst);
        let now = self.clock.local_time();
        let peer = Peer::new(id, addr, conn_type, permissions, now);

        self.peers.write().insert(id, Arc::new(Mutex::new(peer)));

        debug!(target: "p2p", "{}: Connected to {} ({})", id, addr, conn_type);

        self.outbox.event(Event::PeerConnected {
            peer: id,
            addr,
            conn_type,
        });
        id
    }

    /// Unregister a peer. Its orphan transactions are dropped.
    pub fn peer_disconnected(&self, id: PeerId) {
        let peer = match self.peers.write().remove(&id) {
            Some(peer) => peer,
            None => return,
        };
        let addr = {
            let mut peer = peer.lock();

            if peer.sync_started {
                self.sync_started.fetch_sub(1, atomic::Ordering::SeqCst);
            }
            peer.finalized = true;
            peer.addr
        };
        let erased = self.orphanage.erase_for_peer(id);

        debug!(
            target: "p2p",
            "{}: Disconnected from {} ({} orphan(s) erased)", id, addr, erased
        );
        self.outbox
            .event(Event::PeerDisconnected { peer: id, addr });
    }

    /// Add misbehavior points to a peer.
    ///
    /// When the peer's score reaches the discouragement threshold, it is flagged for
    /// discouragement and, unless exempt, for disconnection.
    pub fn misbehaving(&self, id: PeerId, points: u32, reason: &str) {
        let peer = match self.lookup(id) {
            Some(peer) => peer,
            None => return,
        };
        let mut peer = peer.lock();

        if peer.finalized {
            return;
        }
        let threshold = self.config.discouragement_threshold;
        let before = peer.misbehavior;
        let score = before.saturating_add(points);

        peer.misbehavior = score;

        if score >= threshold && before < threshold {
            warn!(
                target: "p2p",
                "{}: Misbehaving ({} -> {}): {}: discouragement threshold reached",
                id, before, score, reason
            );
            peer.should_discourage = true;

            if !peer.is_exempt() && peer.flag_disconnect() {
                self.outbox
                    .disconnect(id, DisconnectReason::PeerMisbehaving(score));
            }
        } else {
            debug!(target: "p2p", "{}: Misbehaving ({} -> {}): {}", id, before, score, reason);
        }
        self.outbox.event(Event::PeerMisbehaved {
            peer: id,
            score,
            reason: reason.to_owned(),
        });
    }

    /// Process a peer before sending it messages.
    ///
    /// Applies pending discouragement, starts header sync and enforces the chain-sync
    /// timeout. Returns `false` if the peer is unknown or was disconnected meanwhile.
    pub fn send_messages(&self, id: PeerId) -> bool {
        let tip = self.state.lock().tip;
        let peer = match self.lookup(id) {
            Some(peer) => peer,
            None => return false,
        };
        if self.maybe_discourage_and_disconnect(&peer) {
            return true;
        }
        let now = self.clock.local_time();
        let mut peer = peer.lock();

        if peer.finalized {
            return false;
        }
        if peer.should_disconnect {
            return true;
        }
        if !peer.sync_started && self.should_start_sync(&peer) {
            peer.sync_started = true;
            self.sync_started.fetch_add(1, atomic::Ordering::SeqCst);

            debug!(target: "p2p", "{}: Starting header sync", id);

            let locators = tip.map(|t| vec![t.hash]).unwrap_or_default();
            self.outbox.get_headers(id, locators, BlockHash::all_zeros());
        }
        if let Some(tip) = tip {
            self.consider_eviction(&mut peer, tip, now);
        }
        true
    }

    /// Evict extra outbound peers, and check whether our tip is stale.
    ///
    /// Meant to be called periodically.
    pub fn check_for_stale_tip_and_evict_peers(&self) {
        let now = self.clock.local_time();
        let mut state = self.state.lock();
        let tip_work = state.tip.map_or(Uint256([0; 4]), |t| t.work);

        self.update_protection(tip_work);
        self.evict_extra_outbound_peers(now, &mut state);

        if now > state.stale_check_time {
            if self.tip_may_be_stale(now, &mut state) {
                let last_update = state.last_tip_update.unwrap_or(now);

                info!(
                    target: "p2p",
                    "Potential stale tip detected, will try using extra outbound peer \
                     (last tip update: {} ago)",
                    now - last_update
                );
                state.try_new_outbound = true;
                self.outbox.event(Event::StaleTip { last_update });
            } else if state.try_new_outbound {
                state.try_new_outbound = false;
            }
            state.stale_check_time = now + self.config.stale_check_interval;
        }
    }

    /// Whether we should try connecting to an extra outbound peer.
    pub fn try_new_outbound_peer(&self) -> bool {
        self.state.lock().try_new_outbound
    }

    /// Our active chain tip changed.
    pub fn tip_updated(&self, tip: Tip) {
        let now = self.clock.local_time();
        let mut state = self.state.lock();

        debug!(target: "p2p", "Tip updated to {}", tip.hash);

        state.tip = Some(tip);
        state.last_tip_update = Some(now);
    }

    /// Our active chain tip.
    pub fn tip(&self) -> Option<Tip> {
        self.state.lock().tip
    }

    /// A peer sent us headers ending in `best`. If `new` is set, some of the headers
    /// were new to us.
    pub fn received_headers(&self, id: PeerId, best: Tip, new: bool) {
        let tip = self.state.lock().tip;
        let now = self.clock.local_time();
        let peer = match self.lookup(id) {
            Some(peer) => peer,
            None => return,
        };
        let mut peer = peer.lock();

        if peer.finalized {
            return;
        }
        if peer.best_known.map_or(true, |b| best.work > b.work) {
            peer.best_known = Some(best);
        }
        if new && tip.map_or(true, |t| best.work > t.work) {
            peer.last_block_announcement = Some(now);
        }
    }

    /// Set the last time a peer announced a new block.
    pub fn update_last_block_announce_time(&self, id: PeerId, time: LocalTime) {
        self.with_peer(id, |peer| peer.last_block_announcement = Some(time));
    }

    /// We requested a block from a peer. Returns `false` if the peer is unknown.
    pub fn block_requested(&self, id: PeerId) -> bool {
        self.with_peer(id, |peer| peer.blocks_in_flight += 1)
            .is_some()
    }

    /// A peer delivered a block we requested. If `novel` is set, we didn't have it.
    pub fn block_received(&self, id: PeerId, novel: bool) {
        let now = self.clock.local_time();

        self.with_peer(id, |peer| {
            peer.blocks_in_flight = peer.blocks_in_flight.saturating_sub(1);
            if novel {
                peer.last_block_time = Some(now);
            }
        });
    }

    /// A peer sent us a transaction with missing inputs. Stores it in the orphan pool,
    /// then trims the pool. Returns `false` if the transaction was rejected or the peer
    /// is unknown.
    pub fn received_orphan(&self, id: PeerId, tx: Arc<Transaction>) -> bool {
        if !self.peers.read().contains_key(&id) {
            return false;
        }
        if !self.orphanage.add_tx(tx, id) {
            return false;
        }
        // The peer may have been removed, and its orphans erased, since we checked.
        if !self.peers.read().contains_key(&id) {
            self.orphanage.erase_for_peer(id);
            return false;
        }
        self.orphanage
            .limit_orphans(self.config.max_orphan_transactions);

        true
    }

    /// The orphan pool.
    pub fn orphanage(&self) -> &Arc<TxOrphanage<C>> {
        &self.orphanage
    }

    /// Get a snapshot of a peer's state.
    pub fn peer(&self, id: PeerId) -> Option<PeerInfo> {
        self.with_peer(id, |peer| peer.info())
    }

    /// Get a snapshot of all peers, ordered by id.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers
            .read()
            .values()
            .map(|peer| peer.lock().info())
            .collect()
    }

    fn lookup(&self, id: PeerId) -> Option<Arc<Mutex<Peer>>> {
        self.peers.read().get(&id).cloned()
    }

    /// Run `f` on a connected peer. Peers removed between lookup and locking are
    /// treated as unknown.
    fn with_peer<T>(&self, id: PeerId, f: impl FnOnce(&mut Peer) -> T) -> Option<T> {
        let peer = self.lookup(id)?;
        let mut peer = peer.lock();

        if peer.finalized {
            return None;
        }
        Some(f(&mut peer))
    }

    fn should_start_sync(&self, peer: &Peer) -> bool {
        peer.conn_type.is_sync_candidate()
            || (peer.conn_type.is_inbound()
                && self.sync_started.load(atomic::Ordering::SeqCst) == 0)
    }

    /// Apply a pending discouragement. Returns `true` if the peer was disconnected.
    fn maybe_discourage_and_disconnect(&self, peer: &Arc<Mutex<Peer>>) -> bool {
        let (id, addr, score, exempt) = {
            let mut peer = peer.lock();

            if peer.finalized || !peer.should_discourage {
                return false;
            }
            peer.should_discourage = false;

            (peer.id, peer.addr.addr, peer.misbehavior, peer.is_exempt())
        };
        if exempt {
            warn!(target: "p2p", "{}: Not punishing exempt peer {}", id, addr);
            return false;
        }
        if !addr.is_discourageable() {
            warn!(
                target: "p2p",
                "{}: Disconnecting but not discouraging local peer {}", id, addr
            );
            let mut peer = peer.lock();

            if !peer.finalized && peer.flag_disconnect() {
                self.outbox
                    .disconnect(id, DisconnectReason::PeerMisbehaving(score));
            }
            return true;
        }
        info!(target: "p2p", "{}: Disconnecting and discouraging {}", id, addr);

        if let Some(banman) = &self.banman {
            banman.discourage(&addr);
        }
        self.outbox
            .event(Event::PeerDiscouraged { peer: id, addr });
        self.disconnect_address(&addr, id, score);

        true
    }

    /// Flag every peer connected from `addr` for disconnection.
    fn disconnect_address(&self, addr: &NetAddr, offender: PeerId, score: u32) {
        let peers = self.peers.read();

        for (id, peer) in peers.iter() {
            let mut peer = peer.lock();

            if peer.addr.addr != *addr || !peer.flag_disconnect() {
                continue;
            }
            let reason = if *id == offender {
                DisconnectReason::PeerMisbehaving(score)
            } else {
                DisconnectReason::Discouraged
            };
            self.outbox.disconnect(*id, reason);
        }
    }

    /// Enforce the chain-sync timeout on an outbound peer.
    fn consider_eviction(&self, peer: &mut Peer, tip: Tip, now: LocalTime) {
        if !(peer.conn_type.is_outbound_full_relay() || peer.conn_type.is_block_only())
            || !peer.sync_started
        {
            return;
        }
        let best = peer.best_known.map(|b| b.work);

        if best.map_or(false, |work| work >= tip.work) {
            // The peer has caught up with us.
            if peer.chain_sync.timeout.is_some() {
                debug!(target: "p2p", "{}: Peer caught up with our tip", peer.id);
                peer.chain_sync = ChainSync::default();
            }
        } else if peer.chain_sync.timeout.is_none()
            || matches!(
                (peer.chain_sync.work_header, best),
                (Some(header), Some(work)) if work >= header.work
            )
        {
            // Either no deadline is set, or the peer reached the benchmark we set
            // earlier but our tip moved on. Set a new deadline against our current tip.
            peer.chain_sync = ChainSync {
                timeout: Some(now + self.config.chain_sync_timeout),
                work_header: Some(tip),
                sent_getheaders: false,
            };
        } else if let (Some(timeout), Some(header)) =
            (peer.chain_sync.timeout, peer.chain_sync.work_header)
        {
            if now <= timeout {
                return;
            }
            if peer.chain_sync.sent_getheaders {
                info!(
                    target: "p2p",
                    "{}: Outbound peer has old chain (best known block = {:?})",
                    peer.id,
                    peer.best_known.map(|b| b.hash)
                );
                if peer.flag_disconnect() {
                    self.outbox.disconnect(peer.id, DisconnectReason::StaleChain);
                    self.outbox.event(Event::PeerEvicted {
                        peer: peer.id,
                        reason: DisconnectReason::StaleChain,
                    });
                }
            } else {
                debug!(
                    target: "p2p",
                    "{}: Sending getheaders to verify chain work (benchmark = {})",
                    peer.id,
                    header.hash
                );
                peer.chain_sync.sent_getheaders = true;
                peer.chain_sync.timeout = Some(now + self.config.headers_response_time);

                self.outbox
                    .get_headers(peer.id, vec![header.hash], BlockHash::all_zeros());
            }
        }
    }

    /// Protect the outbound full-relay peers with the most work, as long as they have at
    /// least as much as our tip.
    fn update_protection(&self, tip_work: Work) {
        let peers = self.peers.read();
        let mut candidates = Vec::new();

        for (id, peer) in peers.iter() {
            let peer = peer.lock();

            if !peer.conn_type.is_outbound_full_relay() || peer.should_disconnect {
                continue;
            }
            if let Some(best) = peer.best_known {
                if best.work >= tip_work {
                    candidates.push((best.work, *id));
                }
            }
        }
        // Most work first, lower id breaks ties.
        candidates.sort_by(|(a, a_id), (b, b_id)| b.cmp(a).then(a_id.cmp(b_id)));

        let protected = candidates
            .into_iter()
            .take(self.config.max_protected_outbound)
            .map(|(_, id)| id)
            .collect::<BTreeSet<_>>();

        for (id, peer) in peers.iter() {
            let mut peer = peer.lock();
            let protect = protected.contains(id);

            if protect && !peer.protected {
                debug!(target: "p2p", "{}: Protecting outbound peer from eviction", id);
                self.outbox.event(Event::PeerProtected { peer: *id });
            }
            peer.protected = protect;
        }
    }

    /// Evict at most one outbound full-relay and one block-relay-only peer, if we have
    /// more than we want.
    fn evict_extra_outbound_peers(&self, now: LocalTime, state: &mut State) {
        let peers = self.peers.read();

        // Full relay: the unprotected peer that announced a block least recently.
        let mut count = 0;
        let mut worst: Option<(Option<LocalTime>, PeerId)> = None;

        for (id, peer) in peers.iter() {
            let peer = peer.lock();

            if !peer.conn_type.is_outbound_full_relay() || peer.should_disconnect {
                continue;
            }
            count += 1;

            if peer.protected {
                continue;
            }
            // Peers are visited in ascending id order, so ties go to the youngest.
            if worst.map_or(true, |(announced, _)| peer.last_block_announcement <= announced) {
                worst = Some((peer.last_block_announcement, *id));
            }
        }
        if count > self.config.max_outbound_full_relay {
            if let Some((_, id)) = worst {
                if self.evict(&peers, id, now, DisconnectReason::ExtraOutbound) {
                    // We managed to connect to a new peer since our tip went stale.
                    state.try_new_outbound = false;
                }
            }
        }

        // Block relay: the youngest peer, unless it gave us a block more recently
        // than the next youngest.
        let mut count = 0;
        let mut youngest: Option<(PeerId, Option<LocalTime>)> = None;
        let mut next_youngest: Option<(PeerId, Option<LocalTime>)> = None;

        for (id, peer) in peers.iter() {
            let peer = peer.lock();

            if !peer.conn_type.is_block_only() || peer.should_disconnect {
                continue;
            }
            count += 1;
            next_youngest = youngest;
            youngest = Some((*id, peer.last_block_time));
        }
        if count > self.config.max_block_relay_only {
            if let Some((id, last_block_time)) = youngest {
                let target = match next_youngest {
                    Some((next, next_block_time)) if last_block_time > next_block_time => next,
                    _ => id,
                };
                self.evict(&peers, target, now, DisconnectReason::ExtraBlockRelay);
            }
        }
    }

    /// Flag a peer for eviction, if it has been connected long enough and isn't
    /// sending us blocks. Returns `true` if the peer was flagged.
    fn evict(
        &self,
        peers: &BTreeMap<PeerId, Arc<Mutex<Peer>>>,
        id: PeerId,
        now: LocalTime,
        reason: DisconnectReason,
    ) -> bool {
        let mut peer = match peers.get(&id) {
            Some(peer) => peer.lock(),
            None => return false,
        };
        let connected = now - peer.connected;

        if connected < self.config.minimum_connect_time || peer.blocks_in_flight > 0 {
            debug!(
                target: "p2p",
                "{}: Keeping extra peer for now (connected {} ago, {} block(s) in flight)",
                id, connected, peer.blocks_in_flight
            );
            return false;
        }
        if !peer.flag_disconnect() {
            return false;
        }
        self.outbox.disconnect(id, reason);
        self.outbox.event(Event::PeerEvicted { peer: id, reason });

        true
    }

    /// Whether our tip hasn't changed in a while, and we aren't downloading blocks.
    fn tip_may_be_stale(&self, now: LocalTime, state: &mut State) -> bool {
        let last_update = *state.last_tip_update.get_or_insert(now);
        let blocks_in_flight = self
            .peers
            .read()
            .values()
            .map(|peer| peer.lock().blocks_in_flight)
            .sum::<usize>();

        last_update < now - self.config.pow_target_spacing * 3 && blocks_in_flight == 0
    }
}
