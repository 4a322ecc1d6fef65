//! Retry schedule shared by both mux peers.
//!
//! Sends are spaced along the convex curve `f(e, n) = (e^n - 1) / e`; a
//! midpoint search on the scalar `e` fits the sum of the delays to the
//! configured wall-clock budget. The first delay is always zero, so the
//! second datagram chases the first immediately and the gaps widen from
//! there.

use std::time::Duration;

/// Tolerance for the fitted sum against the requested budget, in seconds.
const SUM_TOLERANCE: f64 = 1e-2;

/// Midpoint iterations. The search interval halves each round; this is far
/// more than needed to get under [`SUM_TOLERANCE`] for any sane budget.
const MAX_ITERATIONS: u32 = 200;

fn delays_for(e: f64, tries: u32) -> Vec<f64> {
    (0..tries).map(|n| (e.powi(n as i32) - 1.0) / e).collect()
}

/// Compute `tries` inter-send delays whose sum approximates `timeout`
/// seconds.
///
/// Delays are non-negative and monotonically non-decreasing. Peers compute
/// their schedules independently; the retries are plain repeats, so the
/// schedules do not need to line up.
pub fn retries_within_timeout(tries: u32, timeout: f64) -> Vec<Duration> {
    if tries == 0 {
        return Vec::new();
    }
    if !timeout.is_finite() || timeout <= 0.0 {
        return vec![Duration::ZERO; tries as usize];
    }

    // At e = 1 every delay is zero; grow the upper bound until the curve
    // overshoots the budget. Schedules too short to ever reach the budget
    // (tries <= 2) saturate at the bound and come out flat.
    let mut lo = 1.0_f64;
    let mut hi = timeout.max(2.0);
    while delays_for(hi, tries).iter().sum::<f64>() < timeout && hi < 1e9 {
        hi *= 2.0;
    }

    let mut mid = hi;
    for _ in 0..MAX_ITERATIONS {
        mid = (lo + hi) / 2.0;
        let sum: f64 = delays_for(mid, tries).iter().sum();
        if (sum - timeout).abs() < SUM_TOLERANCE / 10.0 {
            break;
        }
        if sum < timeout {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    delays_for(mid, tries)
        .into_iter()
        .map(|d| Duration::from_secs_f64(d.max(0.0)))
        .collect()
}
