//! Monotonic timestamps shared by the detector and its host adapters.
//!
//! All values are nanoseconds since boot, the clock the kernel uses for
//! process start times in `/proc/<pid>/stat`.

use std::{fmt, sync::OnceLock};

use nix::unistd::{SysconfVar, sysconf};

const NANOS_PER_SEC: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Convert a value expressed in clock ticks since boot, like the `starttime`
    /// field of `/proc/<pid>/stat`.
    pub fn from_clock_ticks(ticks: u64) -> Self {
        let hz = clock_ticks_per_second();
        Self(ticks.saturating_mul(NANOS_PER_SEC / hz))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Distance between two timestamps, regardless of their order.
    pub fn abs_diff(self, other: Timestamp) -> u64 {
        self.0.abs_diff(other.0)
    }
}

fn clock_ticks_per_second() -> u64 {
    static CLK_TCK: OnceLock<u64> = OnceLock::new();
    *CLK_TCK.get_or_init(|| {
        match sysconf(SysconfVar::CLK_TCK) {
            Ok(Some(hz)) if hz > 0 => hz as u64,
            result => {
                log::warn!("Unable to read CLK_TCK ({result:?}), assuming 100Hz");
                100
            }
        }
    })
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Timestamp> for u64 {
    fn from(value: Timestamp) -> Self {
        value.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abs_diff_ignores_order() {
        let a = Timestamp::from(100);
        let b = Timestamp::from(350);
        assert_eq!(a.abs_diff(b), 250);
        assert_eq!(b.abs_diff(a), 250);
    }

    #[test]
    fn clock_ticks_scale_to_nanos() {
        let hz = clock_ticks_per_second();
        assert!(hz > 0);
        assert_eq!(Timestamp::from_clock_ticks(hz).raw(), NANOS_PER_SEC);
        assert_eq!(Timestamp::from_clock_ticks(0).raw(), 0);
    }
}
