//! Local time, durations and the clocks that tell them.
//!
//! Every timeout and staleness check in `bulwark` is expressed in terms of
//! [`LocalTime`] as reported by a [`Clock`]. Production code uses [`SystemClock`];
//! tests share a [`RefClock`] between components and move it forward by hand.
use std::sync::atomic::{self, AtomicU64};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Local time.
///
/// Millisecond resolution, measured from the Unix Epoch.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Ord, PartialOrd, Hash, Default)]
pub struct LocalTime {
    millis: u64,
}

impl std::fmt::Display for LocalTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_secs())
    }
}

impl LocalTime {
    /// Construct a local time from the current system time.
    ///
    /// Never goes backwards, even if the system clock does.
    pub fn now() -> Self {
        static LAST: AtomicU64 = AtomicU64::new(0);

        let now = Self::from(SystemTime::now()).millis;
        let last = LAST.fetch_max(now, atomic::Ordering::SeqCst);

        Self {
            millis: now.max(last),
        }
    }

    /// Construct a local time from whole seconds since Epoch.
    pub const fn from_secs(secs: u64) -> Self {
        Self {
            millis: secs * 1000,
        }
    }

    /// Construct a local time from milliseconds since Epoch.
    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    /// Whole seconds since Epoch.
    pub const fn as_secs(&self) -> u64 {
        self.millis / 1000
    }

    /// Milliseconds since Epoch.
    pub const fn as_millis(&self) -> u64 {
        self.millis
    }
}

impl From<SystemTime> for LocalTime {
    fn from(system: SystemTime) -> Self {
        let millis = system
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self { millis }
    }
}

/// Subtract two local times. Yields a duration, saturating at zero.
impl std::ops::Sub<LocalTime> for LocalTime {
    type Output = LocalDuration;

    fn sub(self, other: LocalTime) -> LocalDuration {
        LocalDuration(self.millis.saturating_sub(other.millis))
    }
}

/// Subtract a duration from a local time, saturating at the Epoch.
impl std::ops::Sub<LocalDuration> for LocalTime {
    type Output = LocalTime;

    fn sub(self, other: LocalDuration) -> LocalTime {
        LocalTime {
            millis: self.millis.saturating_sub(other.0),
        }
    }
}

impl std::ops::Add<LocalDuration> for LocalTime {
    type Output = LocalTime;

    fn add(self, other: LocalDuration) -> LocalTime {
        LocalTime {
            millis: self.millis.saturating_add(other.0),
        }
    }
}

/// Time duration as measured locally, in milliseconds.
#[derive(Debug, Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Hash, Default)]
pub struct LocalDuration(u64);

impl LocalDuration {
    /// The zero duration.
    pub const ZERO: LocalDuration = LocalDuration(0);

    /// Create a new duration from whole seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * 1000)
    }

    /// Create a new duration from whole minutes.
    pub const fn from_mins(mins: u64) -> Self {
        Self::from_secs(mins * 60)
    }

    /// Create a new duration from whole hours.
    pub const fn from_hours(hours: u64) -> Self {
        Self::from_mins(hours * 60)
    }

    /// Construct a new duration from milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Return the number of minutes in this duration.
    pub const fn as_mins(&self) -> u64 {
        self.as_secs() / 60
    }

    /// Return the number of seconds in this duration.
    pub const fn as_secs(&self) -> u64 {
        self.0 / 1000
    }

    /// Return the number of milliseconds in this duration.
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for LocalDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.as_secs() < 1 {
            write!(f, "{}ms", self.as_millis())
        } else if self.as_mins() < 1 {
            write!(f, "{}s", self.as_secs())
        } else if self.as_mins() < 60 {
            write!(f, "{}m{}s", self.as_mins(), self.as_secs() % 60)
        } else {
            write!(f, "{}h{}m", self.as_mins() / 60, self.as_mins() % 60)
        }
    }
}

impl std::ops::Add<LocalDuration> for LocalDuration {
    type Output = LocalDuration;

    fn add(self, other: LocalDuration) -> LocalDuration {
        LocalDuration(self.0.saturating_add(other.0))
    }
}

impl std::ops::Sub<LocalDuration> for LocalDuration {
    type Output = LocalDuration;

    fn sub(self, other: LocalDuration) -> LocalDuration {
        LocalDuration(self.0.saturating_sub(other.0))
    }
}

impl std::ops::Mul<u64> for LocalDuration {
    type Output = LocalDuration;

    fn mul(self, other: u64) -> LocalDuration {
        LocalDuration(self.0.saturating_mul(other))
    }
}

/// Clock that tells the time.
pub trait Clock: Clone + Send + Sync {
    /// Tell the time in local time.
    fn local_time(&self) -> LocalTime;
}

/// A frozen clock. Always tells the same time.
impl Clock for LocalTime {
    fn local_time(&self) -> LocalTime {
        *self
    }
}

/// The operating system's clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn local_time(&self) -> LocalTime {
        LocalTime::now()
    }
}

/// A clock shared between its clones, moved forward by hand.
#[derive(Debug, Clone, Default)]
pub struct RefClock {
    millis: Arc<AtomicU64>,
}

impl RefClock {
    /// Elapse time. Saturates at the maximum representable time.
    pub fn elapse(&self, duration: LocalDuration) {
        self.millis
            .fetch_update(atomic::Ordering::SeqCst, atomic::Ordering::SeqCst, |millis| {
                Some(millis.saturating_add(duration.as_millis()))
            })
            .ok();
    }
}

impl From<LocalTime> for RefClock {
    fn from(time: LocalTime) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(time.as_millis())),
        }
    }
}

impl Clock for RefClock {
    fn local_time(&self) -> LocalTime {
        LocalTime::from_millis(self.millis.load(atomic::Ordering::SeqCst))
    }
}
