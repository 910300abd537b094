use host_common::time::Timestamp;

/// Distance in nanoseconds between two creation times.
///
/// The order of the arguments doesn't matter: a concurrent overwrite of the
/// ancestor record can make it look younger than its descendant.
pub fn delta(t1: Timestamp, t2: Timestamp) -> u64 {
    t1.abs_diff(t2)
}

/// A creation is a burst when it happens strictly within the threshold.
pub fn is_burst(delta: u64, threshold_ns: u64) -> bool {
    delta < threshold_ns
}
