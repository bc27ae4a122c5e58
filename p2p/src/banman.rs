//! Ban manager. Keeps track of discouraged and banned network addresses.
//!
//! Discouragement is the automatic response to a misbehaving peer: the address is
//! remembered until the list is cleared, and the connection owner may use it to
//! prefer other peers. Bans are set explicitly by the operator and expire.
//!
//! Entries are keyed by [`NetAddr`], never by peer, so they outlive the connection
//! that caused them. The list is persisted through a [`Store`].
pub mod store;

use std::sync::atomic::{self, AtomicBool};
use std::sync::Arc;

use log::*;
use parking_lot::{Mutex, RwLock};

use bulwark_common::p2p::NetAddr;
use bulwark_common::time::{Clock, LocalDuration, LocalTime};

use crate::error::Error;

pub use store::{BanEntry, BanList, Store};

/// Default duration of a ban.
pub const DEFAULT_BAN_TIME: LocalDuration = LocalDuration::from_hours(24);
/// How often the ban list is swept and written out.
pub const DUMP_INTERVAL: LocalDuration = LocalDuration::from_mins(15);

/// Ability to discourage network addresses.
pub trait Discourage: Send + Sync {
    /// Discourage an address.
    fn discourage(&self, addr: &NetAddr);
    /// Check whether an address is discouraged.
    fn is_discouraged(&self, addr: &NetAddr) -> bool;
}

impl<T: Discourage + ?Sized> Discourage for Arc<T> {
    fn discourage(&self, addr: &NetAddr) {
        (**self).discourage(addr)
    }

    fn is_discouraged(&self, addr: &NetAddr) -> bool {
        (**self).is_discouraged(addr)
    }
}

/// Ban manager configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ban duration used when none is given.
    pub default_ban_time: LocalDuration,
    /// How often [`BanManager::maintain`] sweeps and flushes.
    pub dump_interval: LocalDuration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_ban_time: DEFAULT_BAN_TIME,
            dump_interval: DUMP_INTERVAL,
        }
    }
}

/// Manages discouraged and banned addresses.
pub struct BanManager<S, C> {
    config: Config,
    list: RwLock<BanList>,
    /// Whether the in-memory list has changes not yet written to the store.
    dirty: AtomicBool,
    /// Next time `maintain` does any work.
    next_dump: Mutex<LocalTime>,
    store: Mutex<S>,
    clock: C,
}

impl<S: Store, C: Clock> BanManager<S, C> {
    /// Open a ban manager, loading the ban list from the store.
    ///
    /// Bans that expired while we were away are dropped.
    pub fn open(config: Config, mut store: S, clock: C) -> Result<Self, Error> {
        let list = store.load()?;
        let now = clock.local_time();

        info!(
            target: "p2p",
            "Loaded {} discouraged and {} banned address(es)",
            list.discouraged.len(),
            list.banned.len()
        );

        let banman = Self {
            next_dump: Mutex::new(now + config.dump_interval),
            config,
            list: RwLock::new(list),
            dirty: AtomicBool::new(false),
            store: Mutex::new(store),
            clock,
        };
        banman.sweep_banned();

        Ok(banman)
    }

    /// Discourage an address. Has no effect if it is already discouraged.
    pub fn discourage(&self, addr: &NetAddr) {
        let now = self.clock.local_time();
        let mut list = self.list.write();

        if !list.discouraged.contains_key(addr) {
            info!(target: "p2p", "Discouraging {}", addr);

            list.discouraged.insert(*addr, now);
            self.set_dirty();
        }
    }

    /// Check whether an address is discouraged.
    pub fn is_discouraged(&self, addr: &NetAddr) -> bool {
        self.list.read().discouraged.contains_key(addr)
    }

    /// Ban an address for the given duration, or the configured default.
    /// Replaces any existing ban on the address.
    pub fn ban(&self, addr: &NetAddr, duration: Option<LocalDuration>) {
        let now = self.clock.local_time();
        let until = now + duration.unwrap_or(self.config.default_ban_time);

        info!(target: "p2p", "Banning {} until {}", addr, until);

        self.list
            .write()
            .banned
            .insert(*addr, BanEntry { created: now, until });
        self.set_dirty();
    }

    /// Lift a ban. Returns `true` if the address was banned.
    pub fn unban(&self, addr: &NetAddr) -> bool {
        let removed = self.list.write().banned.remove(addr).is_some();

        if removed {
            info!(target: "p2p", "Unbanned {}", addr);
            self.set_dirty();
        }
        removed
    }

    /// Check whether an address is banned. Expired bans don't count, even before
    /// they are swept.
    pub fn is_banned(&self, addr: &NetAddr) -> bool {
        let now = self.clock.local_time();

        self.list
            .read()
            .banned
            .get(addr)
            .map_or(false, |entry| now < entry.until)
    }

    /// Remove expired bans. Returns the number of bans removed.
    pub fn sweep_banned(&self) -> usize {
        let now = self.clock.local_time();
        let mut list = self.list.write();
        let before = list.banned.len();

        list.banned.retain(|addr, entry| {
            if now >= entry.until {
                debug!(target: "p2p", "Ban on {} expired", addr);
                return false;
            }
            true
        });

        let removed = before - list.banned.len();
        if removed > 0 {
            self.set_dirty();
        }
        removed
    }

    /// Forget all discouraged and banned addresses.
    pub fn clear_banned(&self) {
        let mut list = self.list.write();

        if !list.is_empty() {
            info!(target: "p2p", "Clearing ban list");

            *list = BanList::default();
            self.set_dirty();
        }
    }

    /// Currently banned addresses.
    pub fn banned(&self) -> Vec<(NetAddr, BanEntry)> {
        self.list
            .read()
            .banned
            .iter()
            .map(|(addr, entry)| (*addr, *entry))
            .collect()
    }

    /// Currently discouraged addresses, with the time they were discouraged.
    pub fn discouraged(&self) -> Vec<(NetAddr, LocalTime)> {
        self.list
            .read()
            .discouraged
            .iter()
            .map(|(addr, since)| (*addr, *since))
            .collect()
    }

    /// Write the ban list to the store.
    ///
    /// Saves are serialized by the store lock, and each one writes a snapshot taken
    /// under it, so a later save never writes an older list.
    pub fn flush(&self) -> Result<(), Error> {
        let mut store = self.store.lock();

        self.dirty.store(false, atomic::Ordering::SeqCst);
        let snapshot = self.list.read().clone();

        if let Err(err) = store.save(&snapshot) {
            self.set_dirty();
            return Err(err);
        }
        debug!(
            target: "p2p",
            "Flushed ban list ({} discouraged, {} banned)",
            snapshot.discouraged.len(),
            snapshot.banned.len()
        );
        Ok(())
    }

    /// Sweep expired bans and flush pending changes, at most once per dump interval.
    /// Returns `true` if the list was written.
    pub fn maintain(&self) -> Result<bool, Error> {
        let now = self.clock.local_time();
        {
            let mut next_dump = self.next_dump.lock();

            if now < *next_dump {
                return Ok(false);
            }
            *next_dump = now + self.config.dump_interval;
        }
        self.sweep_banned();

        if self.is_dirty() {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Whether there are changes not yet written to the store.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(atomic::Ordering::SeqCst)
    }

    fn set_dirty(&self) {
        self.dirty.store(true, atomic::Ordering::SeqCst);
    }
}

impl<S: Store, C: Clock> Discourage for BanManager<S, C> {
    fn discourage(&self, addr: &NetAddr) {
        BanManager::discourage(self, addr)
    }

    fn is_discouraged(&self, addr: &NetAddr) -> bool {
        BanManager::is_discouraged(self, addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bulwark_common::time::RefClock;
    use bulwark_test::gen::ArbitraryNetAddr;
    use quickcheck_macros::quickcheck;

    fn banman(clock: RefClock) -> BanManager<store::Memory, RefClock> {
        BanManager::open(Config::default(), store::Memory::default(), clock).unwrap()
    }

    #[test]
    fn test_discourage() {
        let banman = banman(RefClock::from(LocalTime::from_secs(1000)));
        let addr = NetAddr::from([1, 2, 3, 4]);
        let other = NetAddr::from([1, 2, 3, 5]);

        assert!(!banman.is_discouraged(&addr));
        banman.discourage(&addr);

        assert!(banman.is_discouraged(&addr));
        assert!(!banman.is_discouraged(&other));
        assert!(!banman.is_banned(&addr), "Discouraged is not banned");
        assert!(banman.is_dirty());

        banman.clear_banned();
        assert!(!banman.is_discouraged(&addr));
    }

    #[test]
    fn test_ipv4_mapped_is_discouraged() {
        let banman = banman(RefClock::from(LocalTime::from_secs(1000)));
        let mapped = "::ffff:10.0.0.1".parse::<NetAddr>().unwrap();

        banman.discourage(&NetAddr::from([10, 0, 0, 1]));
        assert!(banman.is_discouraged(&mapped));
    }

    #[test]
    fn test_bantime() {
        let clock = RefClock::from(LocalTime::from_secs(1000));
        let banman = banman(clock.clone());
        let addr = NetAddr::from([10, 0, 0, 1]);

        banman.ban(&addr, None);
        assert!(banman.is_banned(&addr));

        clock.elapse(DEFAULT_BAN_TIME - LocalDuration::from_secs(1));
        assert!(banman.is_banned(&addr));
        assert_eq!(banman.sweep_banned(), 0);

        clock.elapse(LocalDuration::from_secs(1));
        assert!(!banman.is_banned(&addr), "Ban has expired");
        assert_eq!(banman.banned().len(), 1, "Expired ban isn't swept yet");
        assert_eq!(banman.sweep_banned(), 1);
        assert!(banman.banned().is_empty());
    }

    #[test]
    fn test_unban() {
        let banman = banman(RefClock::from(LocalTime::from_secs(1000)));
        let addr = NetAddr::from([10, 0, 0, 1]);

        banman.ban(&addr, Some(LocalDuration::from_mins(5)));
        assert!(banman.unban(&addr));
        assert!(!banman.unban(&addr));
        assert!(!banman.is_banned(&addr));
    }

    #[test]
    fn test_maintain() {
        let clock = RefClock::from(LocalTime::from_secs(1000));
        let banman = banman(clock.clone());

        banman.discourage(&NetAddr::from([10, 0, 0, 1]));
        assert!(!banman.maintain().unwrap(), "Too early to dump");

        clock.elapse(DUMP_INTERVAL);
        assert!(banman.maintain().unwrap());
        assert!(!banman.is_dirty());
        assert_eq!(banman.store.lock().list().discouraged.len(), 1);

        clock.elapse(DUMP_INTERVAL);
        assert!(!banman.maintain().unwrap(), "Nothing changed");
    }

    #[test]
    fn test_persistence() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("banlist.json");
        let clock = RefClock::from(LocalTime::from_secs(1000));
        let discouraged = NetAddr::from([10, 0, 0, 1]);
        let banned = NetAddr::from([10, 0, 0, 2]);
        let expiring = NetAddr::from([10, 0, 0, 3]);

        {
            let store = store::File::open(&path).unwrap();
            let banman = BanManager::open(Config::default(), store, clock.clone()).unwrap();

            banman.discourage(&discouraged);
            banman.ban(&banned, None);
            banman.ban(&expiring, Some(LocalDuration::from_mins(1)));
            banman.flush().unwrap();
        }
        clock.elapse(LocalDuration::from_mins(2));

        let store = store::File::open(&path).unwrap();
        let banman = BanManager::open(Config::default(), store, clock).unwrap();

        assert!(banman.is_discouraged(&discouraged));
        assert!(banman.is_banned(&banned));
        assert!(!banman.is_banned(&expiring));
        assert_eq!(banman.banned().len(), 1, "Expired ban was dropped on load");
        assert!(banman.is_dirty());
    }

    /// Remembers every list it was asked to save, in order.
    #[derive(Default, Clone)]
    struct Recording {
        saves: Arc<Mutex<Vec<BanList>>>,
    }

    impl Store for Recording {
        fn load(&mut self) -> Result<BanList, Error> {
            Ok(BanList::default())
        }

        fn save(&mut self, list: &BanList) -> Result<(), Error> {
            self.saves.lock().push(list.clone());
            Ok(())
        }
    }

    #[test]
    fn test_concurrent_flushes_are_ordered() {
        let store = Recording::default();
        let saves = store.saves.clone();
        let clock = RefClock::from(LocalTime::from_secs(1000));
        let banman = BanManager::open(Config::default(), store, clock).unwrap();

        std::thread::scope(|s| {
            for t in 0..8u8 {
                let banman = &banman;

                s.spawn(move || {
                    for i in 0..32u8 {
                        banman.discourage(&NetAddr::from([10, t, i, 1]));
                        banman.flush().unwrap();
                    }
                });
            }
        });
        let saves = saves.lock();

        // Only discouragements happen, so every save holds the previous one.
        for pair in saves.windows(2) {
            assert!(
                pair[0].discouraged.keys().all(|a| pair[1].discouraged.contains_key(a)),
                "A later save never writes an older list"
            );
        }
        assert_eq!(saves.last(), Some(&*banman.list.read()));
        assert_eq!(banman.discouraged().len(), 8 * 32);
        assert!(!banman.is_dirty());
    }

    #[quickcheck]
    fn prop_discouragement_is_per_address(addrs: Vec<ArbitraryNetAddr>, other: ArbitraryNetAddr) {
        let banman = banman(RefClock::from(LocalTime::from_secs(1000)));
        let other = other.0;
        let addrs = addrs
            .into_iter()
            .map(|a| a.0)
            .filter(|a| *a != other)
            .collect::<Vec<_>>();

        for addr in &addrs {
            banman.discourage(addr);
            assert!(banman.is_discouraged(addr));
        }
        assert!(!banman.is_discouraged(&other));
        assert!(addrs.iter().all(|a| banman.is_discouraged(a)));
    }
}
