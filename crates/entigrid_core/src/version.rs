//! Time-ordered version tokens.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const COUNTER_BITS: u32 = 12;
const MAX_COUNTER: u16 = (1 << COUNTER_BITS) - 1;

/// A time-ordered, unique write token.
///
/// Versions are version-8 UUIDs laid out as 48 bits of unix milliseconds,
/// a 12-bit per-millisecond counter and a random tail. Comparing versions
/// compares creation time first, so byte order is version order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(Uuid);

impl Version {
    /// Builds a version from its fields. `counter` is truncated to 12 bits.
    #[must_use]
    pub fn from_parts(millis: u64, counter: u16, random: [u8; 8]) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..6].copy_from_slice(&millis.to_be_bytes()[2..]);
        let counter = counter & MAX_COUNTER;
        bytes[6] = (counter >> 8) as u8;
        bytes[7] = (counter & 0xff) as u8;
        bytes[8..].copy_from_slice(&random);
        Self(Uuid::new_v8(bytes))
    }

    /// Parses a version from its 16 raw bytes.
    ///
    /// Returns `None` if the slice has the wrong length or is not a version-8 UUID.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let uuid = Uuid::from_slice(slice).ok()?;
        (uuid.get_version_num() == 8).then_some(Self(uuid))
    }

    /// Unix milliseconds at which the version was minted.
    #[must_use]
    pub fn millis(&self) -> u64 {
        let bytes = self.0.as_bytes();
        let mut buf = [0u8; 8];
        buf[2..].copy_from_slice(&bytes[..6]);
        u64::from_be_bytes(buf)
    }

    /// Per-millisecond sequence number.
    #[must_use]
    pub fn counter(&self) -> u16 {
        let bytes = self.0.as_bytes();
        (u16::from(bytes[6] & 0x0f) << 8) | u16::from(bytes[7])
    }

    /// Column store timestamp for writes made at this version.
    ///
    /// Strictly increasing for versions from one generator, and always > 0.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        (self.millis() << COUNTER_BITS) | u64::from(self.counter())
    }

    /// Raw bytes, used as column names.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn to_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({}@{}.{})", self.0, self.millis(), self.counter())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of versions and new entity uuids.
///
/// Versions returned by one generator must be strictly increasing.
pub trait VersionGenerator: Send + Sync {
    /// Mints the next version.
    fn next_version(&self) -> Version;

    /// Mints a uuid for a new entity.
    fn next_uuid(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Clock used by [`TimeVersionGenerator`], returning unix milliseconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Version generator driven by the wall clock.
///
/// If the clock stalls or steps backwards the generator keeps counting from
/// the last millisecond it issued, so versions never go backwards.
pub struct TimeVersionGenerator {
    clock: Clock,
    last: Mutex<(u64, u16)>,
}

impl TimeVersionGenerator {
    /// Creates a generator on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(system_millis))
    }

    /// Creates a generator on a custom clock.
    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            clock,
            last: Mutex::new((0, 0)),
        }
    }
}

impl Default for TimeVersionGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimeVersionGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (millis, counter) = *self.last.lock();
        f.debug_struct("TimeVersionGenerator")
            .field("last_millis", &millis)
            .field("last_counter", &counter)
            .finish_non_exhaustive()
    }
}

impl VersionGenerator for TimeVersionGenerator {
    fn next_version(&self) -> Version {
        let now = (self.clock)();
        let mut last = self.last.lock();
        let (millis, counter) = if now > last.0 {
            (now, 0)
        } else if last.1 < MAX_COUNTER {
            (last.0, last.1 + 1)
        } else {
            (last.0 + 1, 0)
        };
        *last = (millis, counter);
        drop(last);
        Version::from_parts(millis, counter, rand::random())
    }
}

/// Current unix time in milliseconds.
#[must_use]
pub fn system_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
